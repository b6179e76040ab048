use super::parser::Ref;

/// Universal error type for PDF reading operations.
///
/// Covers stream access, tokenizing, object parsing, cross-reference
/// resolution and filter decoding. Faults that the reader recovers from
/// (dangling references, malformed content operators) never surface as
/// this type; they are logged and replaced by the best available value.
#[derive(Debug, thiserror::Error)]
pub enum PDFError {
    /// End of stream reached unexpectedly
    #[error("Unexpected end of stream")]
    UnexpectedEndOfStream,

    /// Invalid byte range requested
    #[error("Invalid byte range: {begin}..{end}")]
    InvalidByteRange { begin: usize, end: usize },

    /// Invalid stream position
    #[error("Invalid position {pos} for stream of length {length}")]
    InvalidPosition { pos: usize, length: usize },

    /// Malformed PDF syntax at a known byte offset
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// The cross-reference chain could not be read
    #[error("Invalid xref: {0}")]
    XRef(String),

    /// No catalog could be established, even after recovery
    #[error("No document catalog could be resolved")]
    MissingCatalog,

    /// A stream declares a filter this reader does not implement
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// A supported filter failed on the stream payload
    #[error("Filter {filter} failed: {message}")]
    Decode { filter: String, message: String },

    /// A stream's /Length is an indirect reference the parser was asked
    /// not to guess; the caller resolves it and parses again.
    #[error("Stream length {} {} R must be resolved first", .0.num, .0.generation)]
    StreamLengthDeferred(Ref),

    /// Reading the source failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

impl PDFError {
    /// Builds a syntax error for the given byte offset.
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        PDFError::Syntax {
            offset,
            message: message.into(),
        }
    }

    /// Builds a decode error for the named filter.
    pub fn decode(filter: &str, message: impl Into<String>) -> Self {
        PDFError::Decode {
            filter: filter.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for PDF operations
pub type PDFResult<T> = Result<T, PDFError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = PDFError::syntax(42, "Expected 'obj' keyword");
        assert_eq!(err.to_string(), "Syntax error at offset 42: Expected 'obj' keyword");

        let err = PDFError::decode("FlateDecode", "corrupt deflate stream");
        assert_eq!(err.to_string(), "Filter FlateDecode failed: corrupt deflate stream");

        let err = PDFError::StreamLengthDeferred(Ref::new(7, 0));
        assert_eq!(err.to_string(), "Stream length 7 0 R must be resolved first");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.pdf");
        let err: PDFError = io.into();
        assert!(matches!(err, PDFError::Io(_)));
    }
}
