//! Font handling for text extraction.
//!
//! Only what text extraction needs is read from a font dictionary: how
//! string bytes split into character codes, what text each code stands
//! for, and how far each glyph advances. Embedded font programs are never
//! interpreted.

use super::cmap::CMap;
use super::encoding::{BaseEncoding, glyph_name_to_unicode};
use super::error::{PDFError, PDFResult};
use super::parser::{PDFDict, PDFObject};
use super::xref::XRef;
use log::{debug, warn};
use rustc_hash::FxHashMap;

/// PDF font type enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontType {
    /// Type1 font
    Type1,
    /// Multiple master Type1 font
    MMType1,
    /// TrueType font
    TrueType,
    /// Type3 font (user-defined glyphs)
    Type3,
    /// Composite font with a descendant CIDFont
    Type0,
    /// Unknown font type
    Unknown,
}

impl FontType {
    /// Parse font type from PDF font dictionary Subtype.
    pub fn from_subtype(subtype: &str) -> Self {
        match subtype {
            "Type1" => FontType::Type1,
            "MMType1" => FontType::MMType1,
            "TrueType" => FontType::TrueType,
            "Type3" => FontType::Type3,
            "Type0" => FontType::Type0,
            _ => FontType::Unknown,
        }
    }

    /// Returns true for composite fonts, whose strings use 2-byte codes.
    pub fn is_composite(&self) -> bool {
        matches!(self, FontType::Type0)
    }
}

/// One decoded character code.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub code: u32,
    /// Unicode text for the code; may be empty or hold several characters.
    pub text: String,
    /// Horizontal advance in glyph space (1/1000 of text space).
    pub width: f64,
}

/// Font with the encoding and metrics text extraction needs.
#[derive(Debug, Clone)]
pub struct Font {
    font_type: FontType,

    /// Font base name (e.g., "Helvetica", "Times-Roman")
    base_font: String,

    /// Base encoding for simple fonts
    encoding: BaseEncoding,

    /// `/Differences` overrides for simple fonts
    differences: FxHashMap<u32, String>,

    /// /ToUnicode CMap, preferred over every other source
    to_unicode: Option<CMap>,

    /// Character width table (code -> width in glyph space units)
    widths: FxHashMap<u32, f64>,

    /// Width for codes missing from `widths`
    default_width: f64,
}

impl Font {
    /// Font used when a text operator runs with no (or an unknown) font.
    pub fn fallback(default_width: f64) -> Self {
        Font {
            font_type: FontType::Unknown,
            base_font: "Unknown".to_string(),
            encoding: BaseEncoding::PdfDoc,
            differences: FxHashMap::default(),
            to_unicode: None,
            widths: FxHashMap::default(),
            default_width,
        }
    }

    /// Loads a font from its (resolved) font dictionary.
    ///
    /// Nested references (`/Encoding`, `/ToUnicode`, `/DescendantFonts`,
    /// width arrays) are resolved through `xref`. A `/ToUnicode` stream
    /// that fails to decode is dropped with a warning.
    pub fn load(font_obj: &PDFObject, xref: &mut XRef, default_width: f64) -> PDFResult<Self> {
        let dict = font_obj
            .as_dict()
            .ok_or_else(|| PDFError::Generic("Font is not a dictionary".to_string()))?;

        let font_type = FontType::from_subtype(dict_name(dict, "Subtype").unwrap_or("Unknown"));
        let base_font = dict_name(dict, "BaseFont").unwrap_or("Unknown").to_string();

        let mut font = Font::fallback(default_width);
        font.font_type = font_type;
        font.base_font = base_font;
        font.to_unicode = Self::load_to_unicode(dict, xref);

        if font.font_type.is_composite() {
            font.load_cid_metrics(dict, xref);
        } else {
            font.load_simple_encoding(dict, xref);
            font.load_simple_widths(dict, xref);
        }

        debug!(
            "Loaded font {} ({:?}, {} widths, ToUnicode: {})",
            font.base_font,
            font.font_type,
            font.widths.len(),
            font.to_unicode.is_some()
        );
        Ok(font)
    }

    fn load_to_unicode(dict: &PDFDict, xref: &mut XRef) -> Option<CMap> {
        let stream = xref.fetch_if_ref(dict.get("ToUnicode")?).ok()?;
        if !matches!(stream, PDFObject::Stream { .. }) {
            return None;
        }
        match xref.decode_stream(&stream).and_then(|data| CMap::parse(&data)) {
            Ok(cmap) => Some(cmap),
            Err(e) => {
                warn!("Ignoring unreadable /ToUnicode: {}", e);
                None
            }
        }
    }

    /// Reads `/Encoding` as a name or as a dictionary with
    /// `/BaseEncoding` and `/Differences`.
    fn load_simple_encoding(&mut self, dict: &PDFDict, xref: &mut XRef) {
        let Some(encoding) = dict.get("Encoding") else {
            return;
        };
        let encoding = xref.fetch_if_ref(encoding).unwrap_or(PDFObject::Null);

        match &encoding {
            PDFObject::Name(name) => {
                if let Some(base) = BaseEncoding::from_name(name) {
                    self.encoding = base;
                }
            }
            PDFObject::Dictionary(enc_dict) => {
                if let Some(base) = dict_name(enc_dict, "BaseEncoding").and_then(BaseEncoding::from_name) {
                    self.encoding = base;
                }
                let differences = enc_dict
                    .get("Differences")
                    .map(|d| xref.fetch_if_ref(d).unwrap_or(PDFObject::Null));
                if let Some(PDFObject::Array(items)) = differences {
                    self.apply_differences(&items);
                }
            }
            _ => {}
        }
    }

    /// `/Differences [code name1 name2 ... code name ...]`
    fn apply_differences(&mut self, items: &[PDFObject]) {
        let mut code: u32 = 0;
        for item in items {
            match item {
                PDFObject::Integer(start) => code = u32::try_from(*start).unwrap_or(0),
                PDFObject::Name(name) => {
                    if let Some(text) = glyph_name_to_unicode(name) {
                        self.differences.insert(code, text);
                    }
                    code = code.saturating_add(1);
                }
                _ => {}
            }
        }
    }

    /// `/FirstChar` + `/Widths`, with `/MissingWidth` from the descriptor.
    fn load_simple_widths(&mut self, dict: &PDFDict, xref: &mut XRef) {
        if let Some(descriptor) = dict.get("FontDescriptor") {
            let descriptor = xref.fetch_if_ref(descriptor).unwrap_or(PDFObject::Null);
            if let Some(missing) = descriptor.dict_get("MissingWidth").and_then(PDFObject::as_number) {
                if missing > 0.0 {
                    self.default_width = missing;
                }
            }
        }

        let first_char = dict
            .get("FirstChar")
            .and_then(PDFObject::as_int)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);
        let widths = dict
            .get("Widths")
            .map(|w| xref.fetch_if_ref(w).unwrap_or(PDFObject::Null));
        if let Some(PDFObject::Array(widths)) = widths {
            for (i, width) in widths.iter().enumerate() {
                let Some(code) = u32::try_from(i).ok().and_then(|i| first_char.checked_add(i))
                else {
                    break;
                };
                let width = xref.fetch_if_ref(width).ok().and_then(|w| w.as_number());
                if let Some(width) = width {
                    self.widths.insert(code, width);
                }
            }
        }
    }

    /// `/DW` and `/W` from the first descendant CIDFont.
    ///
    /// `/W` mixes two forms: `c [w1 w2 ...]` and `c_first c_last w`.
    fn load_cid_metrics(&mut self, dict: &PDFDict, xref: &mut XRef) {
        self.default_width = 1000.0;

        let descendants = dict
            .get("DescendantFonts")
            .map(|d| xref.fetch_if_ref(d).unwrap_or(PDFObject::Null));
        let Some(first) = descendants
            .as_ref()
            .and_then(PDFObject::as_array)
            .and_then(|arr| arr.first())
        else {
            return;
        };
        let cid_font = xref.fetch_if_ref(first).unwrap_or(PDFObject::Null);

        if let Some(dw) = cid_font.dict_get("DW").and_then(PDFObject::as_number) {
            self.default_width = dw;
        }

        let w = cid_font
            .dict_get("W")
            .map(|w| xref.fetch_if_ref(w).unwrap_or(PDFObject::Null));
        let Some(PDFObject::Array(items)) = w else {
            return;
        };

        let mut i = 0;
        while i < items.len() {
            let Some(start) = items[i].as_int().and_then(|n| u32::try_from(n).ok()) else {
                break;
            };
            match items.get(i + 1) {
                Some(PDFObject::Array(list)) => {
                    for (offset, width) in list.iter().enumerate() {
                        let Some(code) =
                            u32::try_from(offset).ok().and_then(|o| start.checked_add(o))
                        else {
                            break;
                        };
                        if let Some(width) = width.as_number() {
                            self.widths.insert(code, width);
                        }
                    }
                    i += 2;
                }
                Some(end) => {
                    let end = end.as_int().and_then(|n| u32::try_from(n).ok());
                    let width = items.get(i + 2).and_then(PDFObject::as_number);
                    if let (Some(end), Some(width)) = (end, width) {
                        for code in start..=end.min(start.saturating_add(0xFFFF)) {
                            self.widths.insert(code, width);
                        }
                    }
                    i += 3;
                }
                None => break,
            }
        }
    }

    /// Splits a string operand into character codes and decodes each one.
    ///
    /// ```
    /// use pdfx_reader::core::font::Font;
    ///
    /// let glyphs = Font::fallback(500.0).decode(b"Hi");
    /// assert_eq!(glyphs.len(), 2);
    /// assert_eq!(glyphs[0].text, "H");
    /// ```
    pub fn decode(&self, bytes: &[u8]) -> Vec<Glyph> {
        if self.font_type.is_composite() {
            bytes
                .chunks(2)
                .map(|pair| {
                    let code = pair.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
                    self.glyph(code)
                })
                .collect()
        } else {
            bytes.iter().map(|b| self.glyph(*b as u32)).collect()
        }
    }

    fn glyph(&self, code: u32) -> Glyph {
        Glyph {
            code,
            text: self.text_for(code),
            width: self.width(code),
        }
    }

    /// Unicode text for a code: /ToUnicode first, then `/Differences`, then
    /// the base encoding.
    pub fn text_for(&self, code: u32) -> String {
        if let Some(text) = self.to_unicode.as_ref().and_then(|cmap| cmap.lookup(code)) {
            return text.to_string();
        }
        if let Some(text) = self.differences.get(&code) {
            return text.clone();
        }

        // CIDs are glyph indices, not Unicode; without /ToUnicode they map to U+FFFD
        if self.font_type.is_composite() {
            return char::REPLACEMENT_CHARACTER.to_string();
        }
        u8::try_from(code)
            .ok()
            .and_then(|b| self.encoding.decode(b))
            .map(String::from)
            .unwrap_or_default()
    }

    /// Advance of a code in glyph space units.
    pub fn width(&self, code: u32) -> f64 {
        self.widths.get(&code).copied().unwrap_or(self.default_width)
    }

    /// Returns true if strings in this font use 2-byte codes.
    pub fn is_two_byte(&self) -> bool {
        self.font_type.is_composite()
    }

    /// Returns the font type.
    pub fn font_type(&self) -> &FontType {
        &self.font_type
    }

    /// Returns the base font name.
    pub fn base_font(&self) -> &str {
        &self.base_font
    }

    /// Returns true if this font has a ToUnicode CMap.
    pub fn has_to_unicode(&self) -> bool {
        self.to_unicode.is_some()
    }
}

fn dict_name<'a>(dict: &'a PDFDict, key: &str) -> Option<&'a str> {
    dict.get(key).and_then(PDFObject::as_name)
}
