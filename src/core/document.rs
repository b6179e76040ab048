use super::error::{PDFError, PDFResult};
use super::font::Font;
use super::options::ReaderOptions;
use super::page::{InheritedAttributes, Page};
use super::parser::{PDFDict, PDFObject, Ref};
use super::stream::Stream;
use super::xref::{LinearizedInfo, XRef};
use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use std::sync::Arc;

/// PDF Document reader.
///
/// This is the main entry point for reading PDF documents. It owns the
/// cross-reference table (and with it the cache of parsed objects), the
/// flattened page list and the fonts loaded so far. All of it lives exactly
/// as long as the document.
///
/// A document is meant for one thread at a time. To extract in parallel,
/// open one document per worker over the same bytes with
/// [`PDFDocument::open_shared`].
pub struct PDFDocument {
    /// The cross-reference table
    xref: XRef,

    options: ReaderOptions,

    /// Leaf pages in document order, built on first use
    pages: Option<Vec<Page>>,

    /// Fonts by font dictionary reference
    fonts: FxHashMap<Ref, Arc<Font>>,
}

impl PDFDocument {
    /// Opens a PDF document from a byte array.
    ///
    /// This parses the PDF structure including the xref table and trailer,
    /// and checks that the document catalog can be loaded.
    ///
    /// # Example
    /// ```no_run
    /// use pdfx_reader::PDFDocument;
    ///
    /// let pdf_data = std::fs::read("document.pdf").unwrap();
    /// let mut doc = PDFDocument::open(pdf_data).unwrap();
    /// println!("{} pages", doc.num_pages());
    /// ```
    pub fn open(data: Vec<u8>) -> PDFResult<Self> {
        Self::open_with_options(data, ReaderOptions::default())
    }

    /// Opens a PDF document from a file path.
    pub fn open_file<P: AsRef<Path>>(path: P) -> PDFResult<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::open(data)
    }

    /// Opens a PDF document from a byte array with explicit options.
    pub fn open_with_options(data: Vec<u8>, options: ReaderOptions) -> PDFResult<Self> {
        Self::open_shared(Arc::new(data), options)
    }

    /// Opens a PDF document over a shared, immutable buffer.
    ///
    /// Every document opened this way keeps its own xref and cache.
    pub fn open_shared(data: Arc<Vec<u8>>, options: ReaderOptions) -> PDFResult<Self> {
        let startxref = Self::find_startxref(&data);
        if startxref.is_none() {
            warn!("startxref not found");
        }

        let stream = Stream::from_shared(data);
        let mut xref = XRef::new(Box::new(stream), &options);
        xref.parse(startxref)?;

        // Make sure the catalog loads before handing out the document
        let catalog = xref.catalog()?;
        if !matches!(catalog.as_ref(), PDFObject::Dictionary(_)) {
            return Err(PDFError::MissingCatalog);
        }

        debug!(
            "Opened document: {} objects, {} revisions{}",
            xref.len(),
            xref.revision_count(),
            if xref.is_recovered() { " (recovered)" } else { "" }
        );

        Ok(PDFDocument {
            xref,
            options,
            pages: None,
            fonts: FxHashMap::default(),
        })
    }

    /// Finds the byte offset of the cross-reference section.
    ///
    /// This searches for the last "startxref" in the final 1024 bytes of the
    /// file and reads the offset that follows it.
    ///
    /// Format:
    /// ```text
    /// ...
    /// startxref
    /// 12345
    /// %%EOF
    /// ```
    pub fn find_startxref(data: &[u8]) -> Option<usize> {
        let search_start = data.len().saturating_sub(1024);
        let search_data = &data[search_start..];

        let keyword = b"startxref";
        let pos = search_data
            .windows(keyword.len())
            .rposition(|window| window == keyword)?;

        // Skip past "startxref" and any whitespace
        let mut offset_start = search_start + pos + keyword.len();
        while offset_start < data.len() && data[offset_start].is_ascii_whitespace() {
            offset_start += 1;
        }

        let mut offset_end = offset_start;
        while offset_end < data.len() && data[offset_end].is_ascii_digit() {
            offset_end += 1;
        }

        std::str::from_utf8(&data[offset_start..offset_end])
            .ok()?
            .parse()
            .ok()
    }

    /// Resolves an object by reference.
    ///
    /// Each object is parsed at most once; later calls return the cached
    /// value. Missing, free or unparsable objects resolve to Null.
    pub fn resolve(&mut self, r: Ref) -> Arc<PDFObject> {
        match self.xref.fetch(r) {
            Ok(obj) => obj,
            Err(e) => {
                warn!("Resolving {} to null: {}", r, e);
                Arc::new(PDFObject::Null)
            }
        }
    }

    /// Resolves `obj` if it is a reference, otherwise returns a copy.
    pub fn resolve_ref(&mut self, obj: &PDFObject) -> PDFObject {
        match obj {
            PDFObject::Ref(r) => (*self.resolve(*r)).clone(),
            other => other.clone(),
        }
    }

    /// Decodes a stream object through its filter chain.
    pub fn decode_stream(&mut self, obj: &PDFObject) -> PDFResult<Vec<u8>> {
        self.xref.decode_stream(obj)
    }

    /// Returns the document catalog (root dictionary).
    pub fn catalog(&mut self) -> PDFResult<Arc<PDFObject>> {
        self.xref.catalog()
    }

    /// Returns the trailer of the newest revision.
    pub fn trailer(&self) -> &PDFDict {
        self.xref.trailer()
    }

    /// Returns the resolved `/Info` dictionary, if any.
    pub fn info(&mut self) -> Option<PDFDict> {
        let info = self.xref.trailer().get("Info")?.clone();
        match self.resolve_ref(&info) {
            PDFObject::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    /// Returns the cross-reference table.
    pub fn xref(&self) -> &XRef {
        &self.xref
    }

    /// Returns a mutable reference to the cross-reference table.
    pub fn xref_mut(&mut self) -> &mut XRef {
        &mut self.xref
    }

    /// Returns the options the document was opened with.
    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Number of revisions merged into the xref.
    pub fn revision_count(&self) -> usize {
        self.xref.revision_count()
    }

    /// Linearization parameters, if the file is linearized.
    pub fn linearized(&self) -> Option<&LinearizedInfo> {
        self.xref.linearized()
    }

    /// Returns the number of pages in the document.
    pub fn num_pages(&mut self) -> usize {
        self.pages().len()
    }

    /// Gets a page by its 1-based number.
    ///
    /// Page 0 and numbers past the last page give the null page.
    pub fn page(&mut self, number: usize) -> Page {
        match number.checked_sub(1) {
            Some(index) => self.pages().get(index).cloned().unwrap_or_else(Page::null),
            None => Page::null(),
        }
    }

    fn pages(&mut self) -> &[Page] {
        if self.pages.is_none() {
            let pages = self.load_pages();
            debug!("Page tree has {} leaves", pages.len());
            self.pages = Some(pages);
        }
        self.pages.as_deref().unwrap_or_default()
    }

    /// Flattens the page tree into its leaves, in document order.
    ///
    /// Walks with an explicit stack; a node reached twice (a cyclic or
    /// shared subtree) is skipped.
    fn load_pages(&mut self) -> Vec<Page> {
        let root = match self.catalog() {
            Ok(catalog) => catalog.dict_get("Pages").cloned(),
            Err(e) => {
                warn!("No catalog: {}", e);
                None
            }
        };
        let Some(root) = root else {
            warn!("Catalog has no /Pages");
            return Vec::new();
        };

        let mut pages = Vec::new();
        let mut visited = FxHashSet::default();
        let mut stack = vec![(root, InheritedAttributes::default())];

        while let Some((node, inherited)) = stack.pop() {
            let reference = node.as_ref();
            if let Some(r) = reference {
                if !visited.insert(r) {
                    warn!("Page tree reaches {} twice; skipping", r);
                    continue;
                }
            }

            let PDFObject::Dictionary(dict) = self.resolve_ref(&node) else {
                warn!("Page tree node {:?} is not a dictionary", reference);
                continue;
            };
            let attributes = inherited.inherit(&dict);

            let is_leaf = match dict.get("Type").and_then(PDFObject::as_name) {
                Some("Page") => true,
                Some("Pages") => false,
                _ => !dict.contains_key("Kids"),
            };

            if is_leaf {
                pages.push(Page::new(pages.len() + 1, dict, reference, attributes));
                continue;
            }

            let kids = match dict.get("Kids") {
                Some(kids) => self.resolve_ref(kids),
                None => PDFObject::Null,
            };
            if let PDFObject::Array(kids) = kids {
                for kid in kids.into_iter().rev() {
                    stack.push((kid, attributes.clone()));
                }
            }
        }

        pages
    }

    /// Loads a font (usually a reference into `/Resources /Font`), reusing
    /// fonts already loaded by other pages.
    pub fn load_font(&mut self, font_obj: &PDFObject) -> Option<Arc<Font>> {
        let reference = font_obj.as_ref();
        if let Some(font) = reference.and_then(|r| self.fonts.get(&r)) {
            return Some(Arc::clone(font));
        }

        let resolved = self.resolve_ref(font_obj);
        match Font::load(&resolved, &mut self.xref, self.options.default_glyph_width) {
            Ok(font) => {
                let font = Arc::new(font);
                if let Some(r) = reference {
                    self.fonts.insert(r, Arc::clone(&font));
                }
                Some(font)
            }
            Err(e) => {
                warn!("Skipping font {:?}: {}", reference, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Creates a minimal valid PDF for testing.
    fn create_minimal_pdf() -> Vec<u8> {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for body in [
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 612 792] >>",
            "<< /Type /Page /Parent 2 0 R /Contents 4 0 R /Resources << >> >>",
            "<< /Length 36 >>\nstream\nBT /F1 12 Tf 72 712 Td (Hello) Tj ET\nendstream",
        ] {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", offsets.len(), body).as_bytes());
        }

        let xref_offset = pdf.len();
        pdf.extend_from_slice(b"xref\n0 5\n0000000000 65535 f \n");
        for offset in &offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size 5 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                xref_offset
            )
            .as_bytes(),
        );
        pdf
    }

    #[test]
    fn test_find_startxref() {
        let pdf_data = create_minimal_pdf();
        let offset = PDFDocument::find_startxref(&pdf_data).unwrap();
        assert_eq!(&pdf_data[offset..offset + 4], b"xref");
        assert_eq!(PDFDocument::find_startxref(b"%PDF-1.4 no trailer"), None);
    }

    #[test]
    fn test_open_minimal_pdf() {
        let mut doc = PDFDocument::open(create_minimal_pdf()).unwrap();
        assert!(doc.catalog().unwrap().has_type("Catalog"));
        assert_eq!(doc.revision_count(), 1);
        assert!(doc.linearized().is_none());
        assert!(doc.info().is_none());
    }

    #[test]
    fn test_page_count_and_inheritance() {
        let mut doc = PDFDocument::open(create_minimal_pdf()).unwrap();
        assert_eq!(doc.num_pages(), 1);

        let page = doc.page(1);
        assert!(!page.is_null());
        assert_eq!(page.index(), 1);
        assert_eq!(page.reference(), Some(Ref::new(3, 0)));
        assert_eq!(page.media_box(), Some([0.0, 0.0, 612.0, 792.0]));
    }

    #[test]
    fn test_out_of_range_pages_are_null() {
        let mut doc = PDFDocument::open(create_minimal_pdf()).unwrap();
        assert!(doc.page(0).is_null());
        assert!(doc.page(2).is_null());
    }

    #[test]
    fn test_resolve_missing_is_null() {
        let mut doc = PDFDocument::open(create_minimal_pdf()).unwrap();
        assert!(doc.resolve(Ref::new(42, 0)).is_null());
        assert!(doc.resolve(Ref::new(1, 3)).is_null());
        assert!(doc.resolve(Ref::new(1, 0)).has_type("Catalog"));
    }

    #[test]
    fn test_page_text() {
        let mut doc = PDFDocument::open(create_minimal_pdf()).unwrap();
        let page = doc.page(1);
        let content = page.content(&mut doc);
        assert_eq!(content.text.len(), 1);
        assert_eq!(content.text[0].s, "Hello");
        assert_eq!((content.text[0].x, content.text[0].y), (72.0, 712.0));
    }

    #[test]
    fn test_open_garbage_fails() {
        assert!(PDFDocument::open(b"not a pdf at all".to_vec()).is_err());
    }
}
