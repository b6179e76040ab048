use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};
use super::lexer::{Lexer, Token};
use super::stream::Stream;
use log::warn;
use rustc_hash::FxHashMap;

/// An indirect object identifier: object number plus generation number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ref {
    pub num: u32,
    pub generation: u32,
}

impl Ref {
    pub fn new(num: u32, generation: u32) -> Self {
        Ref { num, generation }
    }
}

impl std::fmt::Display for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.num, self.generation)
    }
}

/// Dictionary payload shared by dictionaries and stream objects.
pub type PDFDict = FxHashMap<String, PDFObject>;

/// PDF object types as defined in the PDF specification.
///
/// References are kept as unresolved leaves; nothing in this type points
/// at another object, so cyclic documents (`/Parent` and `/Kids`) are
/// represented without cycles in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFObject {
    /// Null value
    Null,

    /// Boolean value
    Boolean(bool),

    /// Integer value
    Integer(i64),

    /// Real value
    Real(f64),

    /// String value, from either a literal or a hex string
    String(Vec<u8>),

    /// Name value (from /Name)
    Name(String),

    /// Array of objects
    Array(Vec<PDFObject>),

    /// Dictionary (key-value pairs)
    Dictionary(PDFDict),

    /// Stream object (dictionary + raw, still-encoded payload)
    Stream { dict: PDFDict, data: Vec<u8> },

    /// Indirect object reference (like "5 0 R")
    Ref(Ref),

    /// End of file marker
    EOF,

    /// Command/operator (like 'q', 'Q', 'cm', 'Tj')
    /// Only used in content streams to distinguish operators from operands
    Command(String),
}

impl PDFObject {
    /// Returns true if this object is the EOF marker.
    pub fn is_eof(&self) -> bool {
        matches!(self, PDFObject::EOF)
    }

    /// Returns true if this object is null.
    pub fn is_null(&self) -> bool {
        matches!(self, PDFObject::Null)
    }

    /// Returns true if this object is the given command/operator.
    pub fn is_command(&self, cmd: &str) -> bool {
        matches!(self, PDFObject::Command(command) if command == cmd)
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            PDFObject::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Returns the value as an integer. Reals are truncated, which is how
    /// readers treat producers that write `612.0` for integral fields.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PDFObject::Integer(n) => Some(*n),
            PDFObject::Real(r) if r.is_finite() => Some(*r as i64),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PDFObject::Integer(n) => Some(*n as f64),
            PDFObject::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PDFObject::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PDFObject::String(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the dictionary of a dictionary or stream object.
    pub fn as_dict(&self) -> Option<&PDFDict> {
        match self {
            PDFObject::Dictionary(dict) => Some(dict),
            PDFObject::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PDFObject]> {
        match self {
            PDFObject::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<Ref> {
        match self {
            PDFObject::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Looks up a key in a dictionary or stream dictionary.
    pub fn dict_get(&self, key: &str) -> Option<&PDFObject> {
        self.as_dict().and_then(|dict| dict.get(key))
    }

    /// Returns true if this dictionary (or stream dictionary) has the given
    /// `/Type` name.
    pub fn has_type(&self, type_name: &str) -> bool {
        self.dict_get("Type").and_then(PDFObject::as_name) == Some(type_name)
    }
}

/// PDF Parser for building PDF objects from tokens.
///
/// The parser maintains a 2-token lookahead buffer to enable detecting patterns
/// like indirect references (N1 N2 R) and stream objects (dictionary followed by "stream").
pub struct Parser {
    /// The lexer that provides tokens
    lexer: Lexer,

    /// First lookahead token
    buf1: Option<Token>,

    /// Second lookahead token
    buf2: Option<Token>,

    /// Report indirect stream lengths instead of scanning for `endstream`
    defer_ref_lengths: bool,

    /// Indirect stream lengths already resolved by the caller
    known_lengths: FxHashMap<Ref, usize>,

    /// Lexer error hit while filling the lookahead; reported once the
    /// tokens before it have been consumed
    lookahead_error: Option<PDFError>,
}

impl Parser {
    /// Creates a new Parser from a Lexer.
    pub fn new(lexer: Lexer) -> PDFResult<Self> {
        let mut parser = Parser {
            lexer,
            buf1: None,
            buf2: None,
            defer_ref_lengths: false,
            known_lengths: FxHashMap::default(),
            lookahead_error: None,
        };

        // Fill the lookahead buffer
        parser.buf1 = parser.next_token();
        parser.buf2 = parser.next_token();
        Ok(parser)
    }

    /// Creates a parser reading `stream` from its current position.
    pub fn from_stream(stream: Box<dyn BaseStream>) -> PDFResult<Self> {
        Self::new(Lexer::new(stream)?)
    }

    /// Creates a parser over an owned buffer, starting at `offset`.
    pub fn from_bytes(bytes: Vec<u8>, offset: usize) -> PDFResult<Self> {
        Self::from_stream(Box::new(Stream::new(bytes, offset, 0)))
    }

    /// When enabled, a stream whose `/Length` is an unknown reference makes
    /// the parser fail with `StreamLengthDeferred` instead of scanning.
    pub fn set_defer_ref_lengths(&mut self, defer: bool) {
        self.defer_ref_lengths = defer;
    }

    /// Supplies the resolved value of an indirect `/Length`.
    pub fn set_stream_length(&mut self, length_ref: Ref, length: usize) {
        self.known_lengths.insert(length_ref, length);
    }

    /// Shifts the token buffer, advancing to the next token.
    ///
    /// This moves buf2 -> buf1 and reads a new token into buf2.
    fn shift(&mut self) -> PDFResult<()> {
        self.buf1 = self.buf2.take();
        if matches!(&self.buf1, Some(token) if token.is_command("ID")) {
            // The lexer sits right after the ID keyword of an inline image
            self.skip_inline_image_data()?;
        }
        self.buf2 = self.next_token();
        Ok(())
    }

    /// Lexes one token, parking a lexer error until the parser reaches it.
    fn next_token(&mut self) -> Option<Token> {
        if self.lookahead_error.is_some() {
            return None;
        }
        match self.lexer.get_object() {
            Ok(token) => Some(token),
            Err(e) => {
                self.lookahead_error = Some(e);
                None
            }
        }
    }

    /// The error standing in for a missing lookahead token.
    fn lookahead_failure(&mut self) -> PDFError {
        self.lookahead_error.take().unwrap_or_else(|| {
            PDFError::syntax(self.lexer.position(), "No tokens left after an earlier error")
        })
    }

    /// Moves the lexer past binary inline-image data, up to its `EI`.
    fn skip_inline_image_data(&mut self) -> PDFResult<()> {
        let data_start = self.lexer.position() + 1;
        let mut search = data_start;
        while let Some(idx) = self.lexer.find_from(search, b"EI") {
            let around = self.lexer.peek_range(idx.saturating_sub(1), idx + 3)?;
            let before_ok = idx <= data_start || Lexer::is_whitespace(around[0] as i32);
            let after_ok = around.len() < 4 || Lexer::is_whitespace(around[3] as i32);
            if before_ok && after_ok {
                return self.lexer.seek(idx);
            }
            search = idx + 2;
        }
        warn!("Inline image without EI; skipping to end of content");
        let end = self.lexer.end();
        self.lexer.seek(end)
    }

    /// Gets the next PDF object from the stream.
    ///
    /// This is the main parsing method that handles:
    /// - Arrays: [ obj1 obj2 ... ]
    /// - Dictionaries: << /Key1 value1 /Key2 value2 ... >>
    /// - Indirect references: N1 N2 R
    /// - Simple objects: numbers, strings, names, booleans, null
    pub fn get_object(&mut self) -> PDFResult<PDFObject> {
        let Some(token) = self.buf1.take() else {
            return Err(self.lookahead_failure());
        };

        self.shift()?;

        match token {
            Token::ArrayStart => self.parse_array(),
            Token::DictStart => self.parse_dictionary(),

            // Array/dict end tokens are errors here (should be consumed by parse_array/parse_dictionary)
            Token::ArrayEnd => Err(PDFError::syntax(
                self.lexer.position(),
                "Unexpected array end token",
            )),
            Token::DictEnd => Err(PDFError::syntax(
                self.lexer.position(),
                "Unexpected dictionary end token",
            )),

            // Integer: could be the start of an indirect reference (N1 N2 R)
            Token::Integer(n) => {
                if let (Some(Token::Integer(generation)), Some(Token::Command(cmd))) =
                    (&self.buf1, &self.buf2)
                {
                    if cmd == "R" {
                        if let (Ok(num), Ok(generation)) =
                            (u32::try_from(n), u32::try_from(*generation))
                        {
                            self.shift()?; // Consume generation number
                            self.shift()?; // Consume 'R'
                            return Ok(PDFObject::Ref(Ref::new(num, generation)));
                        }
                    }
                }

                Ok(PDFObject::Integer(n))
            }

            Token::Real(r) => Ok(PDFObject::Real(r)),
            Token::EOF => Ok(PDFObject::EOF),
            Token::Boolean(b) => Ok(PDFObject::Boolean(b)),
            Token::Null => Ok(PDFObject::Null),
            Token::String(s) | Token::HexString(s) => Ok(PDFObject::String(s)),
            Token::Name(n) => Ok(PDFObject::Name(n)),
            Token::Command(c) => Ok(PDFObject::Command(c)), // Keep as Command for content streams
        }
    }

    /// Parses one `n g obj ... endobj` record at the current position.
    pub fn parse_indirect_object(&mut self) -> PDFResult<(Ref, PDFObject)> {
        let offset = self.lexer.position();
        let num = match self.get_object()? {
            PDFObject::Integer(n) => u32::try_from(n)
                .map_err(|_| PDFError::syntax(offset, "Negative object number"))?,
            other => {
                return Err(PDFError::syntax(
                    offset,
                    format!("Expected object number, found {:?}", other),
                ));
            }
        };
        let generation = match self.get_object()? {
            PDFObject::Integer(g) => u32::try_from(g)
                .map_err(|_| PDFError::syntax(offset, "Negative generation number"))?,
            other => {
                return Err(PDFError::syntax(
                    offset,
                    format!("Expected generation number, found {:?}", other),
                ));
            }
        };
        if !self.get_object()?.is_command("obj") {
            return Err(PDFError::syntax(offset, "Expected 'obj' keyword"));
        }

        let object = self.get_object()?;
        if matches!(&self.buf1, Some(token) if token.is_command("endobj")) {
            self.shift()?;
        }

        Ok((Ref::new(num, generation), object))
    }

    /// Parses an array: [ obj1 obj2 ... ]
    fn parse_array(&mut self) -> PDFResult<PDFObject> {
        let mut array = Vec::new();

        loop {
            match &self.buf1 {
                Some(Token::ArrayEnd) => {
                    self.shift()?; // Consume the ']'
                    break;
                }
                Some(Token::EOF) => {
                    return Err(PDFError::syntax(
                        self.lexer.position(),
                        "Unterminated array (missing ']')",
                    ));
                }
                // A dictionary end inside an array: the array is missing its ']'
                Some(Token::DictEnd) => {
                    warn!("Array closed by '>>'; treating it as terminated");
                    break;
                }
                None => return Err(self.lookahead_failure()),
                _ => {}
            }

            match self.get_object() {
                Ok(obj) => array.push(obj),
                Err(e) => {
                    warn!("Error parsing array element: {}, using null", e);
                    array.push(PDFObject::Null);
                }
            }
        }

        Ok(PDFObject::Array(array))
    }

    /// Parses a dictionary: << /Key1 value1 /Key2 value2 ... >>
    fn parse_dictionary(&mut self) -> PDFResult<PDFObject> {
        let mut dict = PDFDict::default();

        loop {
            // Stop at '>>' without consuming it: buf2 tells us whether a
            // stream body follows.
            let key = match &self.buf1 {
                Some(Token::DictEnd) => break,
                Some(Token::EOF) => {
                    return Err(PDFError::syntax(
                        self.lexer.position(),
                        "Unterminated dictionary (missing '>>')",
                    ));
                }
                None => return Err(self.lookahead_failure()),
                Some(Token::Name(name)) => name.clone(),
                Some(Token::Command(cmd)) => {
                    warn!("Dictionary key '{}' is not a name", cmd);
                    cmd.clone()
                }
                _ => {
                    warn!("Skipping non-name token in dictionary key position");
                    self.shift()?;
                    continue;
                }
            };

            self.shift()?; // Consume the key

            match &self.buf1 {
                Some(Token::EOF) => {
                    return Err(PDFError::syntax(
                        self.lexer.position(),
                        "Unterminated dictionary (EOF after key)",
                    ));
                }
                Some(Token::DictEnd) => {
                    dict.insert(key, PDFObject::Null);
                    break;
                }
                None => return Err(self.lookahead_failure()),
                _ => {}
            }

            let value = match self.get_object() {
                Ok(val) => val,
                Err(e) => {
                    warn!("Error parsing dictionary value for key '{}': {}, using null", key, e);
                    PDFObject::Null
                }
            };
            dict.insert(key, value);
        }

        // buf1 = '>>', buf2 = next token; the lexer sits right after buf2.
        if matches!(&self.buf2, Some(token) if token.is_command("stream")) {
            // Refilling the buffer here would tokenize payload bytes
            self.buf1 = None;
            self.buf2 = None;
            return self.parse_stream(dict);
        }

        self.shift()?; // Consume '>>'
        Ok(PDFObject::Dictionary(dict))
    }

    /// Parses a stream body following its dictionary.
    ///
    /// Format:
    /// ```text
    /// << /Length 100 >> stream
    /// ...binary data...
    /// endstream
    /// ```
    fn parse_stream(&mut self, dict: PDFDict) -> PDFResult<PDFObject> {
        self.lexer.skip_to_next_line()?;
        let start = self.lexer.position();

        let declared = match dict.get("Length") {
            Some(PDFObject::Ref(length_ref)) => match self.known_lengths.get(length_ref) {
                Some(len) => Some(*len),
                None if self.defer_ref_lengths => {
                    return Err(PDFError::StreamLengthDeferred(*length_ref));
                }
                None => None,
            },
            Some(other) => other
                .as_int()
                .and_then(|len| usize::try_from(len).ok()),
            None => None,
        };

        let data = match declared {
            Some(len) if self.endstream_follows(start, len) => self.lexer.read_raw(len)?,
            Some(len) => {
                warn!(
                    "Stream at offset {} has wrong /Length {}; scanning for endstream",
                    start, len
                );
                self.scan_stream_data(start)?
            }
            None => self.scan_stream_data(start)?,
        };

        self.buf1 = self.next_token();
        self.buf2 = self.next_token();
        if matches!(&self.buf1, Some(token) if token.is_command("endstream")) {
            self.shift()?;
        }

        Ok(PDFObject::Stream { dict, data })
    }

    /// Checks that `endstream` (after optional whitespace) sits right after
    /// `len` payload bytes.
    fn endstream_follows(&self, start: usize, len: usize) -> bool {
        let Some(end) = start.checked_add(len) else {
            return false;
        };
        if end > self.lexer.end() {
            return false;
        }
        let Ok(tail) = self.lexer.peek_range(end, end + 64) else {
            return false;
        };
        let skip = tail
            .iter()
            .take_while(|b| Lexer::is_whitespace(**b as i32))
            .count();
        tail[skip..].starts_with(b"endstream")
    }

    /// Reads payload bytes up to the next `endstream` keyword, dropping the
    /// EOL marker that precedes it.
    fn scan_stream_data(&mut self, start: usize) -> PDFResult<Vec<u8>> {
        let end = match self.lexer.find_from(start, b"endstream") {
            Some(idx) => idx,
            None => {
                warn!("Stream at offset {} has no endstream", start);
                self.lexer.end()
            }
        };

        let mut data = self.lexer.read_raw(end - start)?;
        if data.ends_with(b"\r\n") {
            data.truncate(data.len() - 2);
        } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
            data.truncate(data.len() - 1);
        }
        Ok(data)
    }

    /// Checks if there are more objects to parse.
    pub fn has_more(&self) -> bool {
        !matches!(&self.buf1, Some(Token::EOF) | None)
    }
}
