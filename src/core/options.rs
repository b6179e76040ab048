/// Tuning knobs for opening and reading a document.
///
/// ```
/// use pdfx_reader::ReaderOptions;
///
/// let options = ReaderOptions::default()
///     .with_max_revisions(32)
///     .with_recover_xref(false);
/// assert_eq!(options.max_revisions, 32);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderOptions {
    /// Upper bound on the number of xref sections followed through `/Prev`.
    pub max_revisions: usize,

    /// Rebuild the xref by scanning the file when the declared chain is
    /// unusable. When false, a broken chain fails `open`.
    pub recover_xref: bool,

    /// Optional cap on operators executed per content stream.
    pub max_content_ops: Option<usize>,

    /// Advance (in glyph-space units) for codes the font gives no width for.
    pub default_glyph_width: f64,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            max_revisions: 256,
            recover_xref: true,
            max_content_ops: None,
            default_glyph_width: 500.0,
        }
    }
}

impl ReaderOptions {
    pub fn with_max_revisions(mut self, max_revisions: usize) -> Self {
        self.max_revisions = max_revisions;
        self
    }

    pub fn with_recover_xref(mut self, recover_xref: bool) -> Self {
        self.recover_xref = recover_xref;
        self
    }

    pub fn with_max_content_ops(mut self, max_content_ops: usize) -> Self {
        self.max_content_ops = Some(max_content_ops);
        self
    }

    pub fn with_default_glyph_width(mut self, width: f64) -> Self {
        self.default_glyph_width = width;
        self
    }
}
