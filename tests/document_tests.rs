//! PDFDocument tests
//!
//! Opening, page tree flattening, inheritance and object resolution.


use pdfx_reader::core::*;
use std::io::Write;
use std::sync::Arc;
use test_utils::*;

// ============================================================================
// Opening
// ============================================================================

#[test]
fn test_open_from_bytes() {
    let mut doc = PDFDocument::open(two_page_document(XRefLayout::Classic)).unwrap();
    assert!(doc.catalog().unwrap().has_type("Catalog"));
    assert_eq!(doc.revision_count(), 1);
    assert!(doc.linearized().is_none());
}

#[test]
fn test_open_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&two_page_document(XRefLayout::Stream)).unwrap();
    file.flush().unwrap();

    let mut doc = PDFDocument::open_file(file.path()).unwrap();
    assert_eq!(doc.num_pages(), 2);
}

#[test]
fn test_open_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = PDFDocument::open_file(dir.path().join("missing.pdf"));
    assert!(matches!(result, Err(PDFError::Io(_))));
}

#[test]
fn test_open_without_catalog_fails() {
    let mut b = PdfBuilder::new();
    b.object(1, "<< /Type /Pages /Kids [] /Count 0 >>");
    let mut rows = vec![(0, Row::Free)];
    rows.extend(b.rows(&[1]));
    let xref = b.xref_table(&rows, "<< /Size 2 >>");
    let bytes = b.finish(xref);

    assert!(PDFDocument::open(bytes).is_err());
}

#[test]
fn test_open_empty_input_fails() {
    assert!(PDFDocument::open(Vec::new()).is_err());
}

#[test]
fn test_shared_buffer_independent_documents() {
    let data = Arc::new(two_page_document(XRefLayout::Classic));
    let mut first = PDFDocument::open_shared(Arc::clone(&data), ReaderOptions::default()).unwrap();
    let mut second = PDFDocument::open_shared(Arc::clone(&data), ReaderOptions::default()).unwrap();

    assert_eq!(page_text(&mut first, 1), "Hello");
    assert_eq!(page_text(&mut second, 2), "World\nagain");
}

#[test]
fn test_documents_are_send() {
    fn assert_send<T: Send>() {}
    assert_send::<PDFDocument>();
}

// ============================================================================
// Trailer, catalog and info
// ============================================================================

#[test]
fn test_info_dictionary() {
    let mut doc = PDFDocument::open(two_page_document(XRefLayout::Stream)).unwrap();
    let info = doc.info().unwrap();
    assert_eq!(
        info.get("Title").and_then(PDFObject::as_bytes),
        Some(&b"Two pages"[..])
    );
    assert_eq!(doc.trailer().get("Size").and_then(PDFObject::as_int), Some(11));
}

#[test]
fn test_resolve_is_idempotent() {
    let mut doc = PDFDocument::open(two_page_document(XRefLayout::Stream)).unwrap();
    for num in [1, 2, 3, 4, 7, 8, 42] {
        let first = doc.resolve(Ref::new(num, 0));
        let second = doc.resolve(Ref::new(num, 0));
        assert_eq!(first, second, "object {}", num);
    }
}

#[test]
fn test_resolve_faults_become_null() {
    let mut doc = PDFDocument::open(two_page_document(XRefLayout::Classic)).unwrap();
    assert!(doc.resolve(Ref::new(99, 0)).is_null());
    assert!(doc.resolve(Ref::new(0, 65535)).is_null());
    assert!(doc.resolve(Ref::new(3, 7)).is_null());
    assert_eq!(
        doc.resolve_ref(&PDFObject::Integer(5)),
        PDFObject::Integer(5)
    );
}

#[test]
fn test_decode_stream_through_document() {
    let mut doc = PDFDocument::open(two_page_document(XRefLayout::Classic)).unwrap();
    let content = doc.resolve(Ref::new(6, 0));
    assert_eq!(doc.decode_stream(&content).unwrap(), PAGE_TWO);
    assert!(doc.decode_stream(&PDFObject::Null).is_err());
}

// ============================================================================
// Pages
// ============================================================================

#[test]
fn test_page_count_and_order() {
    let mut doc = PDFDocument::open(two_page_document(XRefLayout::Classic)).unwrap();
    assert_eq!(doc.num_pages(), 2);
    assert_eq!(doc.page(1).reference(), Some(Ref::new(3, 0)));
    assert_eq!(doc.page(2).reference(), Some(Ref::new(5, 0)));
    assert_eq!(doc.page(2).index(), 2);
}

#[test]
fn test_out_of_range_pages_are_null() {
    let mut doc = PDFDocument::open(two_page_document(XRefLayout::Classic)).unwrap();
    let n = doc.num_pages();
    assert!(doc.page(0).is_null());
    assert!(doc.page(n + 1).is_null());

    let null = doc.page(n + 1);
    assert!(null.content(&mut doc).text.is_empty());
}

#[test]
fn test_inherited_page_attributes() {
    let mut doc = PDFDocument::open(two_page_document(XRefLayout::Classic)).unwrap();
    let first = doc.page(1);
    let second = doc.page(2);

    assert_eq!(first.media_box(), Some([0.0, 0.0, 612.0, 792.0]));
    assert_eq!(first.crop_box(), first.media_box());
    assert!(first.resources().is_some());
    assert_eq!(first.rotate(), 0);
    assert_eq!(second.rotate(), 90);
}

#[test]
fn test_nested_page_tree_in_document_order() {
    let mut b = PdfBuilder::new();
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.object(2, "<< /Type /Pages /Kids [3 0 R 6 0 R] /Count 3 >>");
    b.object(3, "<< /Type /Pages /Parent 2 0 R /Kids [4 0 R 5 0 R] /Count 2 >>");
    b.object(4, "<< /Type /Page /Parent 3 0 R >>");
    b.object(5, "<< /Type /Page /Parent 3 0 R >>");
    b.object(6, "<< /Type /Page /Parent 2 0 R >>");
    let mut rows = vec![(0, Row::Free)];
    rows.extend(b.rows(&[1, 2, 3, 4, 5, 6]));
    let xref = b.xref_table(&rows, "<< /Size 7 /Root 1 0 R >>");

    let mut doc = PDFDocument::open(b.finish(xref)).unwrap();
    let refs: Vec<_> = (1..=3).map(|i| doc.page(i).reference()).collect();
    assert_eq!(
        refs,
        vec![Some(Ref::new(4, 0)), Some(Ref::new(5, 0)), Some(Ref::new(6, 0))]
    );
}

#[test]
fn test_cyclic_page_tree_terminates() {
    let mut b = PdfBuilder::new();
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    // Node 3 lists its own ancestor as a kid
    b.object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    b.object(3, "<< /Type /Pages /Parent 2 0 R /Kids [4 0 R 2 0 R 3 0 R] /Count 1 >>");
    b.object(4, "<< /Type /Page /Parent 3 0 R >>");
    let mut rows = vec![(0, Row::Free)];
    rows.extend(b.rows(&[1, 2, 3, 4]));
    let xref = b.xref_table(&rows, "<< /Size 5 /Root 1 0 R >>");

    let mut doc = PDFDocument::open(b.finish(xref)).unwrap();
    assert_eq!(doc.num_pages(), 1);
}

#[test]
fn test_missing_kids_and_untyped_leaves() {
    let mut b = PdfBuilder::new();
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    // Kid 9 does not exist; kid 3 has no /Type but no /Kids either
    b.object(2, "<< /Type /Pages /Kids [9 0 R 3 0 R] /Count 2 >>");
    b.object(3, "<< /Parent 2 0 R /MediaBox [0 0 10 10] >>");
    let mut rows = vec![(0, Row::Free)];
    rows.extend(b.rows(&[1, 2, 3]));
    let xref = b.xref_table(&rows, "<< /Size 4 /Root 1 0 R >>");

    let mut doc = PDFDocument::open(b.finish(xref)).unwrap();
    assert_eq!(doc.num_pages(), 1);
    assert_eq!(doc.page(1).media_box(), Some([0.0, 0.0, 10.0, 10.0]));
}
