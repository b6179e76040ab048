use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};

/// PDF token types returned by the Lexer.
///
/// Keywords (`obj`, `endobj`, `stream`, `R`, `xref`, `trailer`,
/// `startxref`) and content-stream operators all arrive as `Command`.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// End of file marker
    EOF,

    /// Boolean value
    Boolean(bool),

    /// Null value
    Null,

    /// Integer value (no decimal point, no exponent)
    Integer(i64),

    /// Real value
    Real(f64),

    /// String value (from literal strings like (hello))
    String(Vec<u8>),

    /// Hex string value (from hex strings like <48656c6c6f>)
    HexString(Vec<u8>),

    /// Name value (from /Name)
    Name(String),

    /// Command/operator (like 'q', 'Q', 'BT', 'ET', 'obj', 'R', etc.)
    Command(String),

    /// Array start '['
    ArrayStart,

    /// Array end ']'
    ArrayEnd,

    /// Dictionary start '<<'
    DictStart,

    /// Dictionary end '>>'
    DictEnd,
}

impl Token {
    /// Returns true if this token is the given keyword or operator.
    pub fn is_command(&self, cmd: &str) -> bool {
        matches!(self, Token::Command(c) if c == cmd)
    }
}

/// PDF Lexer for tokenizing PDF syntax.
///
/// The lexer handles:
/// - Whitespace and comment skipping
/// - Number parsing (integers, reals, scientific notation)
/// - String parsing (literal and hexadecimal)
/// - Name parsing
/// - Command/operator parsing
/// - Special characters ([, ], <<, >>, etc.)
///
/// Malformed input never panics: unterminated strings and comments end at
/// EOF with whatever was read so far, so callers can keep recovering.
pub struct Lexer {
    /// The input stream
    stream: Box<dyn BaseStream>,

    /// Current character being examined, -1 at EOF
    current_char: i32,

    /// Absolute offset of `current_char`
    char_pos: usize,

    /// Buffer for building strings
    str_buf: Vec<u8>,
}

impl Lexer {
    /// Creates a new Lexer from a stream.
    pub fn new(stream: Box<dyn BaseStream>) -> PDFResult<Self> {
        let char_pos = stream.pos();
        let mut lexer = Lexer {
            stream,
            current_char: -1,
            char_pos,
            str_buf: Vec::new(),
        };
        lexer.next_char()?;
        Ok(lexer)
    }

    /// Advances to the next character.
    ///
    /// Returns -1 on EOF.
    fn next_char(&mut self) -> PDFResult<i32> {
        self.char_pos = self.stream.pos();
        self.current_char = match self.stream.get_byte() {
            Ok(byte) => byte as i32,
            Err(PDFError::UnexpectedEndOfStream) => -1,
            Err(e) => return Err(e),
        };
        Ok(self.current_char)
    }

    /// Peeks at the next character without consuming it.
    fn peek_char(&mut self) -> PDFResult<i32> {
        match self.stream.peek_byte() {
            Ok(byte) => Ok(byte as i32),
            Err(PDFError::UnexpectedEndOfStream) => Ok(-1),
            Err(e) => Err(e),
        }
    }

    /// Checks if a character is whitespace per ISO 32000 7.2.2.
    ///
    /// PDF whitespace: NUL, TAB, LF, FF, CR, SPACE
    pub fn is_whitespace(ch: i32) -> bool {
        matches!(ch, 0x00 | 0x09 | 0x0A | 0x0C | 0x0D | 0x20)
    }

    /// Checks if a character is a delimiter per ISO 32000 7.2.2.
    ///
    /// PDF delimiters: ( ) < > [ ] { } / %
    pub fn is_delimiter(ch: i32) -> bool {
        matches!(
            ch,
            0x28 | 0x29 | 0x3C | 0x3E | 0x5B | 0x5D | 0x7B | 0x7D | 0x2F | 0x25
        )
    }

    /// Checks if a character is special (whitespace or delimiter).
    fn is_special(ch: i32) -> bool {
        Self::is_whitespace(ch) || Self::is_delimiter(ch)
    }

    // ============================================================================
    // Raw access (used for stream payloads and recovery)
    // ============================================================================

    /// Returns the absolute offset of the next unread character.
    pub fn position(&self) -> usize {
        self.char_pos
    }

    /// Returns the absolute offset one past the last readable byte.
    pub fn end(&self) -> usize {
        self.stream.end()
    }

    /// Moves the lexer to an absolute offset.
    pub fn seek(&mut self, pos: usize) -> PDFResult<()> {
        self.stream.set_pos(pos)?;
        self.next_char()?;
        Ok(())
    }

    /// Consumes one raw byte, bypassing tokenization.
    pub fn get_stream_byte(&mut self) -> PDFResult<u8> {
        if self.current_char < 0 {
            return Err(PDFError::UnexpectedEndOfStream);
        }
        let byte = self.current_char as u8;
        self.next_char()?;
        Ok(byte)
    }

    /// Consumes up to `length` raw bytes starting at the current position.
    ///
    /// Stops early at the end of the stream.
    pub fn read_raw(&mut self, length: usize) -> PDFResult<Vec<u8>> {
        let begin = self.char_pos.min(self.end());
        let end = begin.saturating_add(length).min(self.end());
        let bytes = self.stream.get_byte_range(begin, end)?;
        self.seek(end)?;
        Ok(bytes)
    }

    /// Returns the absolute offset of the next occurrence of `marker`
    /// at or after the current position, without consuming anything.
    pub fn find_forward(&self, marker: &[u8]) -> Option<usize> {
        self.find_from(self.char_pos, marker)
    }

    /// Returns the absolute offset of the next occurrence of `marker`
    /// at or after `begin`.
    pub fn find_from(&self, begin: usize, marker: &[u8]) -> Option<usize> {
        if marker.is_empty() || begin < self.stream.start() || begin >= self.end() {
            return None;
        }
        let haystack = self.stream.get_byte_range(begin, self.end()).ok()?;
        haystack
            .windows(marker.len())
            .position(|window| window == marker)
            .map(|idx| begin + idx)
    }

    /// Returns the bytes in `begin..end` (clamped to the stream) without
    /// moving the lexer.
    pub fn peek_range(&self, begin: usize, end: usize) -> PDFResult<Vec<u8>> {
        let end = end.min(self.end());
        let begin = begin.clamp(self.stream.start(), end);
        self.stream.get_byte_range(begin, end)
    }

    /// Skips the remainder of the current line, including its EOL marker.
    pub fn skip_to_next_line(&mut self) -> PDFResult<()> {
        loop {
            match self.current_char {
                -1 => break,
                0x0D => {
                    // CR, optionally followed by LF
                    if self.next_char()? == 0x0A {
                        self.next_char()?;
                    }
                    break;
                }
                0x0A => {
                    self.next_char()?;
                    break;
                }
                _ => {
                    self.next_char()?;
                }
            }
        }
        Ok(())
    }

    /// Skips whitespace and comments.
    fn skip_whitespace_and_comments(&mut self) -> PDFResult<()> {
        let mut comment = false;

        loop {
            let ch = self.current_char;

            if ch < 0 {
                break;
            }

            if comment {
                if ch == 0x0A || ch == 0x0D {
                    comment = false;
                }
            } else if ch == 0x25 {
                // '%' starts a comment
                comment = true;
            } else if !Self::is_whitespace(ch) {
                break;
            }

            self.next_char()?;
        }

        Ok(())
    }

    /// Gets the next token from the stream.
    pub fn get_object(&mut self) -> PDFResult<Token> {
        self.skip_whitespace_and_comments()?;

        let ch = self.current_char;

        if ch < 0 {
            return Ok(Token::EOF);
        }

        match ch {
            // Numbers: 0-9, +, -, .
            0x30..=0x39 | 0x2B | 0x2D | 0x2E => self.get_number(),

            // Literal string: (
            0x28 => self.get_string(),

            // Name: /
            0x2F => self.get_name(),

            0x5B => {
                self.next_char()?;
                Ok(Token::ArrayStart)
            }

            0x5D => {
                self.next_char()?;
                Ok(Token::ArrayEnd)
            }

            // Hex string or dict start: <
            0x3C => {
                let next_ch = self.next_char()?;
                if next_ch == 0x3C {
                    self.next_char()?;
                    Ok(Token::DictStart)
                } else {
                    self.get_hex_string()
                }
            }

            // Dict end: >
            0x3E => {
                let offset = self.char_pos;
                let next_ch = self.next_char()?;
                if next_ch == 0x3E {
                    self.next_char()?;
                    Ok(Token::DictEnd)
                } else {
                    Err(PDFError::syntax(offset, "Unexpected single '>'"))
                }
            }

            // Closing paren is an error if encountered here
            0x29 => {
                let offset = self.char_pos;
                self.next_char()?;
                Err(PDFError::syntax(offset, "Unbalanced ')'"))
            }

            // Braces only appear in PostScript calculator functions
            0x7B | 0x7D => {
                self.next_char()?;
                Ok(Token::Command(char::from(ch as u8).to_string()))
            }

            _ => self.get_command(),
        }
    }

    /// Parses a number token.
    ///
    /// Handles integers, reals, and scientific notation.
    fn get_number(&mut self) -> PDFResult<Token> {
        let start = self.char_pos;
        let mut ch = self.current_char;
        let mut e_notation = false;
        let mut divide_by = 0.0; // Non-zero if it's a floating point value
        let mut sign = 1i64;

        if ch == 0x2D {
            sign = -1;
            ch = self.next_char()?;

            // Ignore double negative (consistent with Adobe Reader)
            if ch == 0x2D {
                ch = self.next_char()?;
            }
        } else if ch == 0x2B {
            ch = self.next_char()?;
        }

        // Ignore line-breaks after sign (consistent with Adobe Reader)
        while ch == 0x0A || ch == 0x0D {
            ch = self.next_char()?;
        }

        if ch == 0x2E {
            divide_by = 10.0;
            ch = self.next_char()?;
        }

        if !(0x30..=0x39).contains(&ch) {
            // A lone sign or dot followed by a separator reads as zero
            if Self::is_whitespace(ch) || Self::is_delimiter(ch) || ch == -1 {
                return Ok(Token::Integer(0));
            }
            return Err(PDFError::syntax(
                start,
                format!("Invalid number (charCode {})", ch),
            ));
        }

        let mut int_value: i64 = (ch - 0x30) as i64;
        let mut base_value = (ch - 0x30) as f64;
        let mut overflowed = false;
        let mut power_value = 0i32;
        let mut power_value_sign = 1i32;

        loop {
            ch = self.next_char()?;
            if ch < 0 {
                break;
            }

            if (0x30..=0x39).contains(&ch) {
                let digit = ch - 0x30;
                if e_notation {
                    power_value = power_value.saturating_mul(10).saturating_add(digit);
                } else {
                    if divide_by != 0.0 {
                        divide_by *= 10.0;
                    }
                    base_value = base_value * 10.0 + digit as f64;
                    match int_value.checked_mul(10).and_then(|v| v.checked_add(digit as i64)) {
                        Some(v) => int_value = v,
                        None => overflowed = true,
                    }
                }
            } else if ch == 0x2E {
                if divide_by == 0.0 {
                    divide_by = 1.0;
                } else {
                    // A number can have only one dot
                    break;
                }
            } else if ch == 0x2D {
                // Ignore minus signs in the middle to match Adobe's behavior
            } else if ch == 0x45 || ch == 0x65 {
                // 'E' or 'e': exponent, or the start of the next operator
                let peek_ch = self.peek_char()?;
                if peek_ch == 0x2B || peek_ch == 0x2D {
                    power_value_sign = if peek_ch == 0x2D { -1 } else { 1 };
                    self.next_char()?;
                } else if !(0x30..=0x39).contains(&peek_ch) {
                    break;
                }
                e_notation = true;
            } else {
                break;
            }
        }

        if divide_by == 0.0 && !e_notation && !overflowed {
            return Ok(Token::Integer(sign * int_value));
        }

        let mut result = base_value;
        if divide_by != 0.0 {
            result /= divide_by;
        }
        if e_notation {
            result *= 10_f64.powi(power_value_sign * power_value);
        }

        Ok(Token::Real(sign as f64 * result))
    }

    /// Parses a literal string token.
    ///
    /// Handles nested parentheses and escape sequences.
    fn get_string(&mut self) -> PDFResult<Token> {
        let mut num_paren = 1;
        self.str_buf.clear();

        let mut ch = self.next_char()?; // Consume opening '('

        loop {
            let mut char_buffered = false;

            match ch {
                -1 => {
                    // Unterminated string: keep what we have
                    break;
                }

                0x28 => {
                    num_paren += 1;
                    self.str_buf.push(b'(');
                }

                0x29 => {
                    num_paren -= 1;
                    if num_paren == 0 {
                        self.next_char()?; // Consume closing ')'
                        break;
                    }
                    self.str_buf.push(b')');
                }

                0x5C => {
                    ch = self.next_char()?;
                    match ch {
                        -1 => break,
                        0x6E => self.str_buf.push(b'\n'),
                        0x72 => self.str_buf.push(b'\r'),
                        0x74 => self.str_buf.push(b'\t'),
                        0x62 => self.str_buf.push(0x08),
                        0x66 => self.str_buf.push(0x0C),
                        0x5C | 0x28 | 0x29 => self.str_buf.push(ch as u8),
                        0x30..=0x37 => {
                            // Octal escape \ddd (1-3 digits)
                            let mut x = (ch & 0x0F) as u32;
                            ch = self.next_char()?;
                            char_buffered = true;

                            if (0x30..=0x37).contains(&ch) {
                                x = (x << 3) + (ch & 0x0F) as u32;
                                ch = self.next_char()?;

                                if (0x30..=0x37).contains(&ch) {
                                    char_buffered = false;
                                    x = (x << 3) + (ch & 0x0F) as u32;
                                }
                            }
                            self.str_buf.push((x & 0xFF) as u8);
                        }
                        0x0D => {
                            // Line continuation: CR or CRLF
                            if self.peek_char()? == 0x0A {
                                self.next_char()?;
                            }
                        }
                        0x0A => {}
                        _ => self.str_buf.push(ch as u8),
                    }
                }

                _ => self.str_buf.push(ch as u8),
            }

            if !char_buffered {
                ch = self.next_char()?;
            }
        }

        Ok(Token::String(std::mem::take(&mut self.str_buf)))
    }

    /// Converts a hex character to its numeric value.
    ///
    /// Returns -1 if not a valid hex digit.
    fn to_hex_digit(ch: i32) -> i32 {
        match ch {
            0x30..=0x39 => ch & 0x0F,
            0x41..=0x46 | 0x61..=0x66 => (ch & 0x0F) + 9,
            _ => -1,
        }
    }

    /// Parses a hex string token: <48656c6c6f>
    fn get_hex_string(&mut self) -> PDFResult<Token> {
        self.str_buf.clear();
        let mut ch = self.current_char;
        let mut first_digit = -1;

        loop {
            if ch < 0 {
                break;
            } else if ch == 0x3E {
                self.next_char()?;
                break;
            } else if Self::is_whitespace(ch) {
                ch = self.next_char()?;
                continue;
            } else {
                let digit = Self::to_hex_digit(ch);
                if digit == -1 {
                    // Invalid hex digit - skip it
                } else if first_digit == -1 {
                    first_digit = digit;
                } else {
                    self.str_buf.push(((first_digit << 4) | digit) as u8);
                    first_digit = -1;
                }
                ch = self.next_char()?;
            }
        }

        // Odd number of digits: the final digit is followed by an implicit 0
        if first_digit != -1 {
            self.str_buf.push((first_digit << 4) as u8);
        }

        Ok(Token::HexString(std::mem::take(&mut self.str_buf)))
    }

    /// Parses a name token, decoding '#xx' escapes.
    fn get_name(&mut self) -> PDFResult<Token> {
        self.str_buf.clear();

        // Skip the initial '/'
        let mut ch = self.next_char()?;

        while ch >= 0 && !Self::is_special(ch) {
            if ch == 0x23 {
                ch = self.next_char()?;

                if ch < 0 || Self::is_special(ch) {
                    self.str_buf.push(b'#');
                    break;
                }

                let x = Self::to_hex_digit(ch);
                if x != -1 {
                    let previous_ch = ch;
                    ch = self.next_char()?;
                    let x2 = Self::to_hex_digit(ch);

                    if x2 == -1 {
                        self.str_buf.push(b'#');
                        self.str_buf.push(previous_ch as u8);

                        if ch < 0 || Self::is_special(ch) {
                            break;
                        }
                        self.str_buf.push(ch as u8);
                        ch = self.next_char()?;
                        continue;
                    }

                    self.str_buf.push(((x << 4) | x2) as u8);
                } else {
                    self.str_buf.push(b'#');
                    self.str_buf.push(ch as u8);
                }
            } else {
                self.str_buf.push(ch as u8);
            }

            ch = self.next_char()?;
        }

        Ok(Token::Name(String::from_utf8_lossy(&self.str_buf).into_owned()))
    }

    /// Parses a command/keyword token.
    ///
    /// Handles special keywords: true, false, null
    fn get_command(&mut self) -> PDFResult<Token> {
        let start = self.char_pos;
        let mut str_buf = String::new();
        let mut ch = self.current_char;

        while ch >= 0 && !Self::is_special(ch) {
            if str_buf.len() >= 128 {
                return Err(PDFError::syntax(start, "Command token too long"));
            }

            str_buf.push(ch as u8 as char);
            ch = self.next_char()?;
        }

        match str_buf.as_str() {
            "true" => Ok(Token::Boolean(true)),
            "false" => Ok(Token::Boolean(false)),
            "null" => Ok(Token::Null),
            _ => Ok(Token::Command(str_buf)),
        }
    }
}
