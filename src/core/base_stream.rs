use super::error::PDFResult;

/// Base trait for byte sources the lexer reads from.
///
/// Positions are absolute offsets into the underlying buffer, so a
/// sub-stream created at file offset N reports `pos() == N` before its
/// first read. This keeps xref offsets valid no matter which view the
/// lexer was handed. Streams are `Send` so a document can move to a
/// worker thread.
pub trait BaseStream: Send {
    // ============================================================================
    // Required methods (must be implemented by all stream types)
    // ============================================================================

    /// Returns the number of bytes visible through this stream.
    fn length(&self) -> usize;

    /// Returns true if the stream contains no data.
    fn is_empty(&self) -> bool;

    /// Returns the absolute offset of the first visible byte.
    fn start(&self) -> usize;

    /// Returns the current position in the stream.
    fn pos(&self) -> usize;

    /// Sets the current position in the stream.
    fn set_pos(&mut self, pos: usize) -> PDFResult<()>;

    /// Reads and returns a single byte from the stream, advancing the position.
    ///
    /// Returns an error if the end of the stream is reached.
    fn get_byte(&mut self) -> PDFResult<u8>;

    /// Reads the specified number of bytes from the stream, advancing the position.
    fn get_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>>;

    /// Returns a range of bytes from the stream without changing the current position.
    ///
    /// # Arguments
    /// * `begin` - Starting byte offset (inclusive)
    /// * `end` - Ending byte offset (exclusive)
    fn get_byte_range(&self, begin: usize, end: usize) -> PDFResult<Vec<u8>>;

    /// Resets the stream to its initial state.
    fn reset(&mut self) -> PDFResult<()>;

    /// Creates a sub-stream from this stream.
    ///
    /// # Arguments
    /// * `start` - Absolute starting offset for the sub-stream
    /// * `length` - Length of the sub-stream
    fn make_sub_stream(&self, start: usize, length: usize) -> PDFResult<Box<dyn BaseStream>>;

    // ============================================================================
    // Provided methods with default implementations
    // ============================================================================

    /// Returns the absolute offset one past the last visible byte.
    fn end(&self) -> usize {
        self.start() + self.length()
    }

    /// Reads a single byte without advancing the position.
    fn peek_byte(&mut self) -> PDFResult<u8> {
        let current_pos = self.pos();
        let byte = self.get_byte()?;
        self.set_pos(current_pos)?;
        Ok(byte)
    }

    /// Reads the specified number of bytes without advancing the position.
    fn peek_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>> {
        let current_pos = self.pos();
        let bytes = self.get_bytes(length)?;
        self.set_pos(current_pos)?;
        Ok(bytes)
    }

    /// Creates a sub-stream running from `start` to the end of this stream.
    fn make_tail_stream(&self, start: usize) -> PDFResult<Box<dyn BaseStream>> {
        let length = self.end().saturating_sub(start);
        self.make_sub_stream(start, length)
    }
}
