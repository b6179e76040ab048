//! Cross-reference (xref) tests
//!
//! Classic tables, xref streams, hybrid files, incremental updates,
//! linearized files and recovery of broken files.


use pdfx_reader::core::*;
use proptest::prelude::*;
use test_utils::*;

/// Resolves every object of the classic layout in `doc`.
fn resolved_objects(doc: &mut PDFDocument) -> Vec<(u32, PDFObject)> {
    (1..=8)
        .map(|num| (num, (*doc.resolve(Ref::new(num, 0))).clone()))
        .collect()
}

// ============================================================================
// Cross-representation equivalence
// ============================================================================

#[test]
fn test_xref_stream_matches_classic_table() {
    let mut classic = PDFDocument::open(two_page_document(XRefLayout::Classic)).unwrap();
    let mut stream = PDFDocument::open(two_page_document(XRefLayout::Stream)).unwrap();

    assert_eq!(resolved_objects(&mut classic), resolved_objects(&mut stream));
    assert!(matches!(
        stream.xref().get_entry(3),
        Some(XRefEntry::Compressed { obj_stream_num: 9, .. })
    ));
}

#[test]
fn test_hybrid_matches_classic_table() {
    let mut classic = PDFDocument::open(two_page_document(XRefLayout::Classic)).unwrap();
    let mut hybrid = PDFDocument::open(two_page_document(XRefLayout::Hybrid)).unwrap();

    assert_eq!(resolved_objects(&mut classic), resolved_objects(&mut hybrid));
    assert!(!hybrid.xref().is_recovered());
    assert!(hybrid.trailer().contains_key("XRefStm"));
}

#[test]
fn test_all_layouts_extract_the_same_text() {
    let mut texts = Vec::new();
    for layout in [XRefLayout::Classic, XRefLayout::Stream, XRefLayout::Hybrid] {
        let mut doc = PDFDocument::open(two_page_document(layout)).unwrap();
        assert_eq!(doc.num_pages(), 2, "{:?}", layout);
        texts.push((page_text(&mut doc, 1), page_text(&mut doc, 2)));
    }
    assert_eq!(texts[0], ("Hello".to_string(), "World\nagain".to_string()));
    assert!(texts.iter().all(|t| *t == texts[0]));
}

// ============================================================================
// Incremental updates
// ============================================================================

#[test]
fn test_incremental_update_newest_wins() {
    let mut doc = PDFDocument::open(incremental_document(3)).unwrap();
    assert_eq!(doc.revision_count(), 3);
    assert_eq!(
        *doc.resolve(Ref::new(3, 0)),
        PDFObject::String(b"revision 3".to_vec())
    );
    // Objects only present in the oldest revision are still reachable
    assert!(doc.resolve(Ref::new(2, 0)).has_type("Pages"));
}

#[test]
fn test_revision_limit_falls_back_to_scan() {
    let options = ReaderOptions::default().with_max_revisions(2);
    let mut doc = PDFDocument::open_with_options(incremental_document(4), options).unwrap();

    // The scan keeps the last body written for each object number
    assert!(doc.xref().is_recovered());
    assert_eq!(
        *doc.resolve(Ref::new(3, 0)),
        PDFObject::String(b"revision 4".to_vec())
    );
}

#[test]
fn test_revision_limit_without_recovery_fails() {
    let options = ReaderOptions::default()
        .with_max_revisions(2)
        .with_recover_xref(false);
    assert!(PDFDocument::open_with_options(incremental_document(4), options).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_newest_revision_wins(revisions in 1usize..40) {
        let mut doc = PDFDocument::open(incremental_document(revisions)).unwrap();
        prop_assert_eq!(doc.revision_count(), revisions);
        prop_assert!(!doc.xref().is_recovered());
        let expected = PDFObject::String(format!("revision {}", revisions).into_bytes());
        prop_assert_eq!((*doc.resolve(Ref::new(3, 0))).clone(), expected);
    }
}

// ============================================================================
// Linearized files
// ============================================================================

#[test]
fn test_linearized_parameters() {
    let bytes = linearized_document();
    let len = bytes.len() as u64;
    let doc = PDFDocument::open(bytes).unwrap();

    let info = doc.linearized().expect("linearization dictionary");
    assert_eq!(info.page_count, 5);
    assert_eq!(info.first_page_object, 12);
    assert_eq!(info.file_length, len);
    assert!(info.main_xref_offset > 0);
}

#[test]
fn test_linearized_walks_full_chain() {
    let mut doc = PDFDocument::open(linearized_document()).unwrap();
    assert_eq!(doc.revision_count(), 2);
    assert!(!doc.xref().is_recovered());

    // First-page section entries plus the main section behind /Prev
    assert!(matches!(doc.xref().get_entry(12), Some(XRefEntry::Uncompressed { .. })));
    assert!(matches!(
        doc.xref().get_entry(4),
        Some(XRefEntry::Compressed { obj_stream_num: 9, .. })
    ));
    assert_eq!(doc.num_pages(), 5);
}

// ============================================================================
// Recovery
// ============================================================================

#[test]
fn test_corrupted_startxref_recovers_same_document() {
    let good = two_page_document(XRefLayout::Classic);
    let mut expected = PDFDocument::open(good.clone()).unwrap();
    let mut recovered = PDFDocument::open(corrupt_startxref(good)).unwrap();

    assert!(recovered.xref().is_recovered());
    assert_eq!(recovered.num_pages(), expected.num_pages());
    for page in 1..=expected.num_pages() {
        assert_eq!(page_text(&mut recovered, page), page_text(&mut expected, page));
    }
}

#[test]
fn test_corrupted_startxref_in_object_stream_file() {
    let good = two_page_document(XRefLayout::Stream);
    let mut recovered = PDFDocument::open(corrupt_startxref(good)).unwrap();

    assert!(recovered.xref().is_recovered());
    assert_eq!(recovered.num_pages(), 2);
    assert_eq!(page_text(&mut recovered, 2), "World\nagain");
}

#[test]
fn test_corrupted_startxref_without_recovery_fails() {
    let bad = corrupt_startxref(two_page_document(XRefLayout::Classic));
    let options = ReaderOptions::default().with_recover_xref(false);
    assert!(PDFDocument::open_with_options(bad, options).is_err());
}

#[test]
fn test_missing_startxref_recovers() {
    let mut bytes = two_page_document(XRefLayout::Classic);
    let keyword = b"startxref";
    let at = bytes
        .windows(keyword.len())
        .rposition(|window| window == keyword)
        .unwrap();
    bytes.truncate(at);

    let mut doc = PDFDocument::open(bytes).unwrap();
    assert_eq!(doc.num_pages(), 2);
}
