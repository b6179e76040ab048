//! CMap (Character Map) parsing for font encoding support.
//!
//! CMaps map character codes to Unicode values. The /ToUnicode entry in a
//! font dictionary points to a CMap stream that defines these mappings; it
//! is the most reliable source of text for a glyph code.

use super::error::PDFResult;
use super::lexer::{Lexer, Token};
use super::stream::Stream;
use log::warn;
use rustc_hash::FxHashMap;

/// CMap (Character Map) for mapping character codes to Unicode.
///
/// CMaps support two types of mappings:
/// - **bfchar**: Single character mappings (code -> Unicode string)
/// - **bfrange**: Range mappings (code range -> consecutive Unicode values,
///   or one string per code when the destination is an array)
///
/// Example CMap stream:
/// ```text
/// /CIDInit /ProcSet findresource begin
/// 12 dict begin
/// begincmap
/// 1 begincodespacerange
/// <0000> <FFFF>
/// endcodespacerange
/// 2 beginbfchar
/// <0003> <0020>
/// <0005> <0041>
/// endbfchar
/// 1 beginbfrange
/// <0010> <0020> <0030>
/// endbfrange
/// endcmap
/// ```
#[derive(Debug, Clone, Default)]
pub struct CMap {
    /// code → Unicode mappings. Destinations may hold several characters
    /// (ligatures decompose to their letters).
    mappings: FxHashMap<u32, String>,
}

impl CMap {
    /// Creates an empty CMap.
    pub fn new() -> Self {
        CMap {
            mappings: FxHashMap::default(),
        }
    }

    /// Parses a decoded /ToUnicode CMap stream.
    ///
    /// Parsing is best-effort: a malformed section ends the parse and the
    /// mappings read so far are kept.
    ///
    /// ```
    /// use pdfx_reader::CMap;
    ///
    /// let cmap = CMap::parse(b"1 beginbfchar\n<03> <0020>\nendbfchar\n").unwrap();
    /// assert_eq!(cmap.lookup(3), Some(" "));
    /// ```
    pub fn parse(stream_data: &[u8]) -> PDFResult<Self> {
        let mut cmap = CMap::new();
        let mut lexer = Lexer::new(Box::new(Stream::from_bytes(stream_data.to_vec())))?;

        loop {
            let token = match lexer.get_object() {
                Ok(Token::EOF) => break,
                Ok(token) => token,
                Err(e) => {
                    warn!("Stopping CMap parse early: {}", e);
                    break;
                }
            };

            let result = if token.is_command("beginbfchar") {
                cmap.parse_bfchar(&mut lexer)
            } else if token.is_command("beginbfrange") {
                cmap.parse_bfrange(&mut lexer)
            } else {
                Ok(())
            };

            if let Err(e) = result {
                warn!("Stopping CMap parse early: {}", e);
                break;
            }
        }

        Ok(cmap)
    }

    /// Parses bfchar entries up to `endbfchar`.
    ///
    /// Format: `<srcCode> <dstUnicode>`
    /// Example: `<0003> <0020>` maps code 3 to U+0020 (space)
    fn parse_bfchar(&mut self, lexer: &mut Lexer) -> PDFResult<()> {
        loop {
            let src = match lexer.get_object()? {
                Token::HexString(bytes) | Token::String(bytes) => bytes,
                _ => return Ok(()),
            };
            let dst = match lexer.get_object()? {
                Token::HexString(bytes) | Token::String(bytes) => decode_utf16be(&bytes),
                Token::Name(name) => name,
                _ => return Ok(()),
            };
            self.mappings.insert(code_from_bytes(&src), dst);
        }
    }

    /// Parses bfrange entries up to `endbfrange`.
    ///
    /// Format: `<srcCodeLo> <srcCodeHi> <dstUnicode>` or
    /// `<srcCodeLo> <srcCodeHi> [<dst1> <dst2> ...]`
    fn parse_bfrange(&mut self, lexer: &mut Lexer) -> PDFResult<()> {
        loop {
            let lo = match lexer.get_object()? {
                Token::HexString(bytes) | Token::String(bytes) => code_from_bytes(&bytes),
                _ => return Ok(()),
            };
            let hi = match lexer.get_object()? {
                Token::HexString(bytes) | Token::String(bytes) => code_from_bytes(&bytes),
                _ => return Ok(()),
            };

            match lexer.get_object()? {
                Token::HexString(dst) | Token::String(dst) => self.map_range(lo, hi, &dst),
                Token::ArrayStart => {
                    let mut code = lo;
                    loop {
                        match lexer.get_object()? {
                            Token::HexString(dst) | Token::String(dst) => {
                                if code <= hi {
                                    self.mappings.insert(code, decode_utf16be(&dst));
                                }
                                code = code.saturating_add(1);
                            }
                            Token::ArrayEnd | Token::EOF => break,
                            _ => {}
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Maps `lo..=hi` onto consecutive values, incrementing the last
    /// UTF-16 unit of `dst`.
    fn map_range(&mut self, lo: u32, hi: u32, dst: &[u8]) {
        if hi < lo || hi - lo > 0xFFFF {
            warn!("Ignoring bfrange <{:X}> <{:X}>", lo, hi);
            return;
        }

        let mut units: Vec<u16> = dst
            .chunks(2)
            .map(|pair| match pair {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                [single] => *single as u16,
                _ => 0,
            })
            .collect();
        if units.is_empty() {
            return;
        }

        for code in lo..=hi {
            self.mappings
                .insert(code, String::from_utf16_lossy(&units));
            if let Some(last) = units.last_mut() {
                *last = last.wrapping_add(1);
            }
        }
    }

    /// Maps a character code to its Unicode text.
    #[inline]
    pub fn lookup(&self, code: u32) -> Option<&str> {
        self.mappings.get(&code).map(String::as_str)
    }

    /// Returns the number of mappings in this CMap.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns true if this CMap has no mappings.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Big-endian code from 1-4 source bytes.
fn code_from_bytes(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

/// Decodes a UTF-16BE destination. A lone byte is taken as a code point.
fn decode_utf16be(bytes: &[u8]) -> String {
    if bytes.len() == 1 {
        return char::from(bytes[0]).to_string();
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
