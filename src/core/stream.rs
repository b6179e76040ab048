use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};
use std::sync::Arc;

/// An in-memory byte stream over a shared, immutable buffer.
///
/// The whole PDF file is loaded once; every lexer, sub-stream and document
/// that reads it holds an `Arc` to the same bytes, so independent
/// documents can be created over one buffer without copying it.
pub struct Stream {
    /// The underlying byte buffer (shared via Arc)
    bytes: Arc<Vec<u8>>,
    /// Current read position (absolute)
    pos: usize,
    /// Starting offset in the buffer
    start: usize,
    /// Length of accessible data from start
    length: usize,
}

impl Stream {
    /// Creates a new Stream from a byte vector.
    ///
    /// # Arguments
    /// * `bytes` - The byte data for this stream
    /// * `start` - Starting offset in the byte array
    /// * `length` - Length of accessible data (0 means "to the end")
    pub fn new(bytes: Vec<u8>, start: usize, length: usize) -> Self {
        let available = bytes.len().saturating_sub(start);
        let actual_length = if length == 0 {
            available
        } else {
            length.min(available)
        };

        Stream {
            bytes: Arc::new(bytes),
            pos: start,
            start,
            length: actual_length,
        }
    }

    /// Creates a Stream viewing a whole shared buffer.
    pub fn from_shared(bytes: Arc<Vec<u8>>) -> Self {
        let length = bytes.len();
        Self::from_arc(bytes, 0, length)
    }

    /// Creates a new Stream from an Arc-wrapped byte vector.
    ///
    /// This is used internally for creating sub-streams that share data.
    fn from_arc(bytes: Arc<Vec<u8>>, start: usize, length: usize) -> Self {
        Stream {
            bytes,
            pos: start,
            start,
            length,
        }
    }

    /// Creates a new Stream from a byte vector with default parameters.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let length = bytes.len();
        Self::new(bytes, 0, length)
    }

    /// Returns the visible bytes of this stream.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.start..self.start + self.length]
    }

    /// Returns the shared buffer backing this stream.
    pub fn shared_bytes(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.bytes)
    }
}

impl BaseStream for Stream {
    fn length(&self) -> usize {
        self.length
    }

    fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn start(&self) -> usize {
        self.start
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn set_pos(&mut self, pos: usize) -> PDFResult<()> {
        if pos < self.start || pos > self.start + self.length {
            return Err(PDFError::InvalidPosition {
                pos,
                length: self.length,
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn get_byte(&mut self) -> PDFResult<u8> {
        if self.pos >= self.start + self.length {
            return Err(PDFError::UnexpectedEndOfStream);
        }
        let byte = self.bytes[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn get_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>> {
        let end_pos = self.pos + length;
        let max_pos = self.start + self.length;

        if end_pos > max_pos {
            return Err(PDFError::UnexpectedEndOfStream);
        }

        let bytes = self.bytes[self.pos..end_pos].to_vec();
        self.pos = end_pos;
        Ok(bytes)
    }

    fn get_byte_range(&self, begin: usize, end: usize) -> PDFResult<Vec<u8>> {
        let max_pos = self.start + self.length;
        if begin > end || begin < self.start || end > max_pos {
            return Err(PDFError::InvalidByteRange { begin, end });
        }

        Ok(self.bytes[begin..end].to_vec())
    }

    fn reset(&mut self) -> PDFResult<()> {
        self.pos = self.start;
        Ok(())
    }

    fn make_sub_stream(&self, start: usize, length: usize) -> PDFResult<Box<dyn BaseStream>> {
        if start < self.start || start + length > self.start + self.length {
            return Err(PDFError::InvalidByteRange {
                begin: start,
                end: start + length,
            });
        }

        // Share the Arc instead of cloning the data
        Ok(Box::new(Stream::from_arc(
            Arc::clone(&self.bytes),
            start,
            length,
        )))
    }
}
