use super::content_stream::{Content, TextRun, TextRuns};
use super::document::PDFDocument;
use super::font::Font;
use super::parser::{PDFDict, PDFObject, Ref};
use log::warn;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Attributes a page inherits from its ancestors in the page tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct InheritedAttributes {
    pub resources: Option<PDFObject>,
    pub media_box: Option<PDFObject>,
    pub crop_box: Option<PDFObject>,
    pub rotate: Option<PDFObject>,
}

impl InheritedAttributes {
    /// Returns the attributes seen below `node`: its own entries override
    /// the inherited ones.
    pub fn inherit(&self, node: &PDFDict) -> Self {
        let pick = |key: &str, inherited: &Option<PDFObject>| {
            node.get(key).cloned().or_else(|| inherited.clone())
        };
        InheritedAttributes {
            resources: pick("Resources", &self.resources),
            media_box: pick("MediaBox", &self.media_box),
            crop_box: pick("CropBox", &self.crop_box),
            rotate: pick("Rotate", &self.rotate),
        }
    }
}

/// A single page in a PDF document.
///
/// A page is a leaf dictionary of the page tree plus the attributes it
/// inherits from its ancestors. Out-of-range lookups produce a null page,
/// which has no dictionary and no content.
///
/// A page dictionary contains properties like:
/// - MediaBox: The visible area of the page
/// - Resources: Fonts, images, and other resources used by the page
/// - Contents: The content stream(s) that draw the page
/// - Parent: Reference to the parent Pages node
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// The page number (1-based; 0 for the null page)
    index: usize,

    /// The page dictionary, `None` for the null page
    dict: Option<PDFDict>,

    /// The indirect object reference for this page (if it has one)
    reference: Option<Ref>,

    attributes: InheritedAttributes,
}

impl Page {
    pub(crate) fn new(
        index: usize,
        dict: PDFDict,
        reference: Option<Ref>,
        attributes: InheritedAttributes,
    ) -> Self {
        Page {
            index,
            dict: Some(dict),
            reference,
            attributes,
        }
    }

    /// The page returned for missing or out-of-range page numbers.
    pub fn null() -> Self {
        Page {
            index: 0,
            dict: None,
            reference: None,
            attributes: InheritedAttributes::default(),
        }
    }

    /// Returns true for the null page.
    pub fn is_null(&self) -> bool {
        self.dict.is_none()
    }

    /// Returns the page number (1-based; 0 for the null page).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the page dictionary.
    pub fn dict(&self) -> Option<&PDFDict> {
        self.dict.as_ref()
    }

    /// Returns the page's indirect object reference if it has one.
    pub fn reference(&self) -> Option<Ref> {
        self.reference
    }

    /// Gets a property from the page dictionary itself (not inherited).
    pub fn get(&self, key: &str) -> Option<&PDFObject> {
        self.dict.as_ref().and_then(|dict| dict.get(key))
    }

    /// Gets the Resources entry, own or inherited. May be a reference.
    pub fn resources(&self) -> Option<&PDFObject> {
        self.attributes.resources.as_ref()
    }

    /// Gets the MediaBox as `[llx, lly, urx, ury]`, own or inherited.
    pub fn media_box(&self) -> Option<[f64; 4]> {
        self.attributes.media_box.as_ref().and_then(rectangle)
    }

    /// Gets the CropBox, defaulting to the MediaBox.
    pub fn crop_box(&self) -> Option<[f64; 4]> {
        self.attributes
            .crop_box
            .as_ref()
            .and_then(rectangle)
            .or_else(|| self.media_box())
    }

    /// Gets the page rotation in degrees (0 when absent).
    pub fn rotate(&self) -> i64 {
        self.attributes
            .rotate
            .as_ref()
            .and_then(PDFObject::as_int)
            .unwrap_or(0)
    }

    /// Gets the Contents for this page.
    ///
    /// Contents can be either a single stream or an array of streams.
    pub fn contents(&self) -> Option<&PDFObject> {
        self.get("Contents")
    }

    /// Returns the decoded content stream bytes.
    ///
    /// Array pieces are decoded separately and joined with a newline so an
    /// operator split across pieces still tokenizes. A piece that cannot be
    /// resolved or decoded is skipped.
    pub fn content_data(&self, doc: &mut PDFDocument) -> Vec<u8> {
        let Some(contents) = self.contents() else {
            return Vec::new();
        };

        let pieces = match doc.resolve_ref(contents) {
            PDFObject::Array(items) => items,
            single => vec![single],
        };

        let mut data = Vec::new();
        for (i, piece) in pieces.iter().enumerate() {
            let piece = doc.resolve_ref(piece);
            if !matches!(piece, PDFObject::Stream { .. }) {
                warn!("Page {}: content piece {} is not a stream", self.index, i);
                continue;
            }
            match doc.decode_stream(&piece) {
                Ok(decoded) => {
                    if !data.is_empty() {
                        data.push(b'\n');
                    }
                    data.extend_from_slice(&decoded);
                }
                Err(e) => warn!("Page {}: skipping content piece {}: {}", self.index, i, e),
            }
        }
        data
    }

    /// Loads the fonts named in `/Resources /Font`, keyed by resource name.
    pub fn fonts(&self, doc: &mut PDFDocument) -> FxHashMap<String, Arc<Font>> {
        let mut fonts = FxHashMap::default();
        let Some(resources) = self.resources() else {
            return fonts;
        };
        let resources = doc.resolve_ref(resources);
        let Some(font_dict) = resources.dict_get("Font") else {
            return fonts;
        };

        if let PDFObject::Dictionary(entries) = doc.resolve_ref(font_dict) {
            for (name, font_obj) in &entries {
                if let Some(font) = doc.load_font(font_obj) {
                    fonts.insert(name.clone(), font);
                }
            }
        }
        fonts
    }

    /// Returns a lazy iterator over the page's text runs.
    ///
    /// Fonts and content are loaded up front; the operators are interpreted
    /// as the iterator is advanced. The null page yields nothing.
    pub fn text_runs(&self, doc: &mut PDFDocument) -> TextRuns {
        if self.is_null() {
            return TextRuns::new(Vec::new(), FxHashMap::default(), doc.options());
        }
        let fonts = self.fonts(doc);
        let data = self.content_data(doc);
        TextRuns::new(data, fonts, doc.options())
    }

    /// Collects every text run of the page, in content-stream order.
    pub fn content(&self, doc: &mut PDFDocument) -> Content {
        let text: Vec<TextRun> = self.text_runs(doc).collect();
        Content { text }
    }
}

/// Reads a 4-number rectangle array.
fn rectangle(obj: &PDFObject) -> Option<[f64; 4]> {
    match obj.as_array()? {
        [a, b, c, d] => Some([a.as_number()?, b.as_number()?, c.as_number()?, d.as_number()?]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::Parser;

    fn dict(source: &str) -> PDFDict {
        match Parser::from_bytes(source.as_bytes().to_vec(), 0)
            .unwrap()
            .get_object()
            .unwrap()
        {
            PDFObject::Dictionary(dict) => dict,
            other => panic!("Expected dictionary, got {:?}", other),
        }
    }

    #[test]
    fn test_null_page() {
        let page = Page::null();
        assert!(page.is_null());
        assert_eq!(page.index(), 0);
        assert!(page.contents().is_none());
        assert!(page.media_box().is_none());
    }

    #[test]
    fn test_inherited_attributes_are_overridden_by_own() {
        let root = dict("<< /MediaBox [0 0 612 792] /Rotate 90 /Resources << /Font << >> >> >>");
        let leaf = dict("<< /Type /Page /MediaBox [0 0 300 400] >>");

        let attributes = InheritedAttributes::default().inherit(&root).inherit(&leaf);
        let page = Page::new(1, leaf, Some(Ref::new(4, 0)), attributes);

        assert_eq!(page.media_box(), Some([0.0, 0.0, 300.0, 400.0]));
        assert_eq!(page.crop_box(), Some([0.0, 0.0, 300.0, 400.0]));
        assert_eq!(page.rotate(), 90);
        assert!(page.resources().is_some());
        assert_eq!(page.reference(), Some(Ref::new(4, 0)));
    }

    #[test]
    fn test_rectangle_accepts_reals() {
        let obj = Parser::from_bytes(b"[0 0 595.32001 841.92004]".to_vec(), 0)
            .unwrap()
            .get_object()
            .unwrap();
        assert_eq!(rectangle(&obj), Some([0.0, 0.0, 595.32001, 841.92004]));
        assert_eq!(rectangle(&PDFObject::Array(vec![PDFObject::Integer(1)])), None);
    }
}
