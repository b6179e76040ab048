//! Content stream interpretation for text extraction.
//!
//! Content streams are sequences of operands followed by an operator. Only
//! the operators that move the text position or show text are simulated;
//! every other operator is skipped along with its operands.

use super::font::Font;
use super::options::ReaderOptions;
use super::parser::{PDFObject, Parser};
use super::stream::Stream;
use log::{debug, warn};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;

/// Affine matrix `[a b c d e f]`, applied to row vectors.
pub type Matrix = [f64; 6];

pub const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Returns `m1 × m2`.
pub fn multiply(m1: &Matrix, m2: &Matrix) -> Matrix {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

fn translate(tx: f64, ty: f64) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

/// Content stream operators that affect text extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// q - Save graphics state
    Save,
    /// Q - Restore graphics state
    Restore,
    /// cm - Concatenate matrix to current transformation matrix
    Transform,
    /// BT - Begin text object
    BeginText,
    /// ET - End text object
    EndText,
    /// Tc - Set character spacing
    SetCharSpacing,
    /// Tw - Set word spacing
    SetWordSpacing,
    /// Tz - Set horizontal scaling
    SetHScale,
    /// TL - Set text leading
    SetLeading,
    /// Tf - Set text font and size
    SetFont,
    /// Tr - Set text rendering mode
    SetTextRenderingMode,
    /// Ts - Set text rise
    SetTextRise,
    /// Td - Move text position
    MoveText,
    /// TD - Move text position and set leading
    SetLeadingMoveText,
    /// Tm - Set text matrix
    SetTextMatrix,
    /// T* - Move to start of next line
    NextLine,
    /// Tj - Show text string
    ShowText,
    /// TJ - Show text with individual glyph positioning
    ShowSpacedText,
    /// ' - Move to next line and show text
    NextLineShowText,
    /// " - Set spacing, move to next line, show text
    NextLineSetSpacingShowText,
}

impl OpCode {
    /// Converts an operator to an OpCode; `None` for operators text
    /// extraction ignores.
    pub fn from_command(cmd: &str) -> Option<OpCode> {
        let op = match cmd {
            "q" => OpCode::Save,
            "Q" => OpCode::Restore,
            "cm" => OpCode::Transform,
            "BT" => OpCode::BeginText,
            "ET" => OpCode::EndText,
            "Tc" => OpCode::SetCharSpacing,
            "Tw" => OpCode::SetWordSpacing,
            "Tz" => OpCode::SetHScale,
            "TL" => OpCode::SetLeading,
            "Tf" => OpCode::SetFont,
            "Tr" => OpCode::SetTextRenderingMode,
            "Ts" => OpCode::SetTextRise,
            "Td" => OpCode::MoveText,
            "TD" => OpCode::SetLeadingMoveText,
            "Tm" => OpCode::SetTextMatrix,
            "T*" => OpCode::NextLine,
            "Tj" => OpCode::ShowText,
            "TJ" => OpCode::ShowSpacedText,
            "'" => OpCode::NextLineShowText,
            "\"" => OpCode::NextLineSetSpacingShowText,
            _ => return None,
        };
        Some(op)
    }

    /// Number of operands the operator consumes.
    pub fn operand_count(self) -> usize {
        match self {
            OpCode::Save
            | OpCode::Restore
            | OpCode::BeginText
            | OpCode::EndText
            | OpCode::NextLine => 0,
            OpCode::SetCharSpacing
            | OpCode::SetWordSpacing
            | OpCode::SetHScale
            | OpCode::SetLeading
            | OpCode::SetTextRenderingMode
            | OpCode::SetTextRise
            | OpCode::ShowText
            | OpCode::ShowSpacedText
            | OpCode::NextLineShowText => 1,
            OpCode::SetFont | OpCode::MoveText | OpCode::SetLeadingMoveText => 2,
            OpCode::NextLineSetSpacingShowText => 3,
            OpCode::Transform | OpCode::SetTextMatrix => 6,
        }
    }
}

/// One shown string with its baseline origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    /// Decoded text
    pub s: String,
    /// Baseline origin, text matrix combined with the CTM
    pub x: f64,
    pub y: f64,
    /// Font resource name from `Tf`
    pub font: String,
    pub font_size: f64,
    /// Advance of the whole run in text space
    pub w: f64,
}

/// All text runs of a page, in content-stream order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Content {
    pub text: Vec<TextRun>,
}

/// Graphics state saved by `q` and restored by `Q`.
#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    char_spacing: f64,
    word_spacing: f64,
    /// `Tz` / 100
    h_scale: f64,
    leading: f64,
    font_name: String,
    font: Arc<Font>,
    font_size: f64,
    rise: f64,
}

/// Lazy iterator over the text runs of a content stream.
///
/// Operators are executed as runs are requested. A malformed stream ends
/// the iteration at the fault; runs produced before it are still yielded.
pub struct TextRuns {
    parser: Option<Parser>,
    operands: SmallVec<[PDFObject; 8]>,
    fonts: FxHashMap<String, Arc<Font>>,
    fallback_font: Arc<Font>,
    state: GraphicsState,
    saved: SmallVec<[GraphicsState; 4]>,
    /// Text matrix (Tm)
    text_matrix: Matrix,
    /// Text line matrix (Tlm)
    line_matrix: Matrix,
    pending: VecDeque<TextRun>,
    ops_executed: usize,
    max_ops: Option<usize>,
}

impl TextRuns {
    /// Creates an interpreter over decoded content bytes and the page's
    /// font table.
    pub fn new(data: Vec<u8>, fonts: FxHashMap<String, Arc<Font>>, options: &ReaderOptions) -> Self {
        let parser = match Parser::from_stream(Box::new(Stream::from_bytes(data))) {
            Ok(parser) => Some(parser),
            Err(e) => {
                warn!("Cannot read content stream: {}", e);
                None
            }
        };
        let fallback_font = Arc::new(Font::fallback(options.default_glyph_width));

        TextRuns {
            parser,
            operands: SmallVec::new(),
            fonts,
            state: GraphicsState {
                ctm: IDENTITY,
                char_spacing: 0.0,
                word_spacing: 0.0,
                h_scale: 1.0,
                leading: 0.0,
                font_name: String::new(),
                font: Arc::clone(&fallback_font),
                font_size: 0.0,
                rise: 0.0,
            },
            fallback_font,
            saved: SmallVec::new(),
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            pending: VecDeque::new(),
            ops_executed: 0,
            max_ops: options.max_content_ops,
        }
    }

    /// Pops the operator's operands and executes it.
    ///
    /// Unknown operators, and operators short of operands, are dropped with
    /// their operands.
    fn execute(&mut self, cmd: &str) {
        let Some(op) = OpCode::from_command(cmd) else {
            self.operands.clear();
            return;
        };

        let needed = op.operand_count();
        if self.operands.len() < needed {
            debug!("Skipping '{}' with {} operands", cmd, self.operands.len());
            self.operands.clear();
            return;
        }
        let first = self.operands.len() - needed;
        let args: SmallVec<[PDFObject; 6]> = self.operands.drain(first..).collect();
        self.operands.clear();

        self.apply(op, &args);
    }

    fn apply(&mut self, op: OpCode, args: &[PDFObject]) {
        match op {
            OpCode::Save => self.saved.push(self.state.clone()),
            OpCode::Restore => {
                if let Some(state) = self.saved.pop() {
                    self.state = state;
                }
            }
            OpCode::Transform => {
                if let Some(m) = numbers::<6>(args) {
                    self.state.ctm = multiply(&m, &self.state.ctm);
                }
            }
            OpCode::BeginText => {
                self.text_matrix = IDENTITY;
                self.line_matrix = IDENTITY;
            }
            OpCode::EndText | OpCode::SetTextRenderingMode => {}
            OpCode::SetCharSpacing => {
                if let Some([tc]) = numbers::<1>(args) {
                    self.state.char_spacing = tc;
                }
            }
            OpCode::SetWordSpacing => {
                if let Some([tw]) = numbers::<1>(args) {
                    self.state.word_spacing = tw;
                }
            }
            OpCode::SetHScale => {
                if let Some([tz]) = numbers::<1>(args) {
                    self.state.h_scale = tz / 100.0;
                }
            }
            OpCode::SetLeading => {
                if let Some([tl]) = numbers::<1>(args) {
                    self.state.leading = tl;
                }
            }
            OpCode::SetTextRise => {
                if let Some([ts]) = numbers::<1>(args) {
                    self.state.rise = ts;
                }
            }
            OpCode::SetFont => self.set_font(&args[0], &args[1]),
            OpCode::MoveText => {
                if let Some([tx, ty]) = numbers::<2>(args) {
                    self.move_text(tx, ty);
                }
            }
            OpCode::SetLeadingMoveText => {
                if let Some([tx, ty]) = numbers::<2>(args) {
                    self.state.leading = -ty;
                    self.move_text(tx, ty);
                }
            }
            OpCode::SetTextMatrix => {
                if let Some(m) = numbers::<6>(args) {
                    self.text_matrix = m;
                    self.line_matrix = m;
                }
            }
            OpCode::NextLine => self.next_line(),
            OpCode::ShowText => self.show_operand(&args[0]),
            OpCode::ShowSpacedText => self.show_spaced(&args[0]),
            OpCode::NextLineShowText => {
                self.next_line();
                self.show_operand(&args[0]);
            }
            OpCode::NextLineSetSpacingShowText => {
                if let Some([tw, tc]) = numbers::<2>(&args[..2]) {
                    self.state.word_spacing = tw;
                    self.state.char_spacing = tc;
                }
                self.next_line();
                self.show_operand(&args[2]);
            }
        }
    }

    fn set_font(&mut self, name: &PDFObject, size: &PDFObject) {
        if let Some(name) = name.as_name() {
            self.state.font = match self.fonts.get(name) {
                Some(font) => Arc::clone(font),
                None => {
                    debug!("Font /{} not in page resources", name);
                    Arc::clone(&self.fallback_font)
                }
            };
            self.state.font_name = name.to_string();
        }
        if let Some(size) = size.as_number() {
            self.state.font_size = size;
        }
    }

    fn move_text(&mut self, tx: f64, ty: f64) {
        self.line_matrix = multiply(&translate(tx, ty), &self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        self.move_text(0.0, -self.state.leading);
    }

    fn show_operand(&mut self, operand: &PDFObject) {
        if let Some(bytes) = operand.as_bytes() {
            self.show(bytes);
        }
    }

    /// `TJ`: strings are shown, numbers shift the position by
    /// -n/1000 of the font size.
    fn show_spaced(&mut self, operand: &PDFObject) {
        let Some(items) = operand.as_array() else {
            return;
        };
        for item in items {
            match item {
                PDFObject::String(bytes) => self.show(bytes),
                other => {
                    if let Some(adjust) = other.as_number() {
                        let tx = -adjust / 1000.0 * self.state.font_size * self.state.h_scale;
                        self.text_matrix = multiply(&translate(tx, 0.0), &self.text_matrix);
                    }
                }
            }
        }
    }

    /// Emits one run for a string operand and advances the text matrix.
    fn show(&mut self, bytes: &[u8]) {
        let state = &self.state;
        let origin = multiply(
            &multiply(&[1.0, 0.0, 0.0, 1.0, 0.0, state.rise], &self.text_matrix),
            &state.ctm,
        );

        let mut text = String::new();
        let mut advance = 0.0;
        for glyph in state.font.decode(bytes) {
            let mut width = glyph.width / 1000.0 * state.font_size + state.char_spacing;
            if glyph.code == 32 && !state.font.is_two_byte() {
                width += state.word_spacing;
            }
            advance += width * state.h_scale;
            text.push_str(&glyph.text);
        }

        let run = TextRun {
            s: text,
            x: origin[4],
            y: origin[5],
            font: state.font_name.clone(),
            font_size: state.font_size,
            w: advance,
        };
        self.text_matrix = multiply(&translate(advance, 0.0), &self.text_matrix);

        if !run.s.is_empty() {
            self.pending.push_back(run);
        }
    }
}

impl Iterator for TextRuns {
    type Item = TextRun;

    fn next(&mut self) -> Option<TextRun> {
        loop {
            if let Some(run) = self.pending.pop_front() {
                return Some(run);
            }

            let parser = self.parser.as_mut()?;
            let obj = match parser.get_object() {
                Ok(PDFObject::EOF) => {
                    self.parser = None;
                    continue;
                }
                Ok(obj) => obj,
                Err(e) => {
                    warn!("Content stream ends at a fault: {}", e);
                    self.parser = None;
                    continue;
                }
            };

            match obj {
                PDFObject::Command(cmd) => {
                    if self.max_ops.is_some_and(|max| self.ops_executed >= max) {
                        warn!("Stopping after {} content operators", self.ops_executed);
                        self.parser = None;
                        continue;
                    }
                    self.ops_executed += 1;
                    self.execute(&cmd);
                }
                operand => self.operands.push(operand),
            }
        }
    }
}

/// Reads exactly `N` numeric operands.
fn numbers<const N: usize>(args: &[PDFObject]) -> Option<[f64; N]> {
    if args.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.as_number()?;
    }
    Some(out)
}
