//! Stream and filter tests
//!
//! Byte streams, sub-streams, and decode chains reached through documents
//! the way page content and xref streams use them.


use pdfx_reader::core::decode::{apply_filters, decode_stream_object};
use pdfx_reader::core::*;
use std::sync::Arc;
use test_utils::*;

/// One-page document whose content stream is written with `dict`/`data`.
fn content_document(dict: &str, data: &[u8]) -> Vec<u8> {
    let mut b = PdfBuilder::new();
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.object(
        2,
        "<< /Type /Pages /Kids [3 0 R] /Count 1 /Resources << /Font << /F1 5 0 R >> >> >>",
    );
    b.object(3, "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>");
    b.stream(4, dict, data);
    b.object(5, FONT);
    let mut rows = vec![(0, Row::Free)];
    rows.extend(b.rows(&[1, 2, 3, 4, 5]));
    let xref = b.xref_table(&rows, "<< /Size 6 /Root 1 0 R >>");
    b.finish(xref)
}

fn hex(data: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = data
        .iter()
        .flat_map(|b| format!("{:02X}", b).into_bytes())
        .collect();
    out.push(b'>');
    out
}

/// Run-length encodes as literal runs of up to 128 bytes.
fn run_length(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in data.chunks(128) {
        out.push((chunk.len() - 1) as u8);
        out.extend_from_slice(chunk);
    }
    out.push(128);
    out
}

/// Applies the PNG Up predictor to fixed-width rows.
fn png_up(data: &[u8], columns: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut previous = vec![0u8; columns];
    for row in data.chunks(columns) {
        out.push(2);
        for (i, byte) in row.iter().enumerate() {
            out.push(byte.wrapping_sub(previous[i]));
        }
        previous = row.to_vec();
    }
    out
}

// ============================================================================
// Byte streams
// ============================================================================

#[test]
fn test_stream_reads_and_positions() {
    let mut stream = Stream::from_bytes(b"Hello, PDF".to_vec());
    assert_eq!(stream.length(), 10);
    assert_eq!(stream.get_byte().unwrap(), b'H');
    assert_eq!(stream.get_bytes(4).unwrap(), b"ello");
    assert_eq!(stream.pos(), 5);
    stream.reset().unwrap();
    assert_eq!(stream.pos(), 0);
}

#[test]
fn test_sub_streams_share_the_buffer() {
    let data = Arc::new(b"0123456789".to_vec());
    let stream = Stream::from_shared(Arc::clone(&data));
    let mut sub = stream.make_sub_stream(3, 4).unwrap();

    assert_eq!(sub.pos(), 3);
    assert_eq!(sub.get_bytes(4).unwrap(), b"3456");
    assert!(sub.get_byte().is_err());
    assert!(stream.make_sub_stream(8, 5).is_err());
}

// ============================================================================
// Filters through documents
// ============================================================================

#[test]
fn test_filter_chain_in_declared_order() {
    // Hex outside, Flate inside: /Filter lists them in decode order
    let encoded = hex(&deflate(PAGE_ONE));
    let bytes = content_document("/Filter [/ASCIIHexDecode /FlateDecode]", &encoded);

    let mut doc = PDFDocument::open(bytes).unwrap();
    assert_eq!(page_text(&mut doc, 1), "Hello");
}

#[test]
fn test_abbreviated_filter_names() {
    let encoded = hex(&run_length(PAGE_ONE));
    let bytes = content_document("/Filter [/AHx /RL]", &encoded);

    let mut doc = PDFDocument::open(bytes).unwrap();
    assert_eq!(page_text(&mut doc, 1), "Hello");
}

#[test]
fn test_indirect_filter_and_parms() {
    let mut b = PdfBuilder::new();
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    b.object(3, "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>");
    // Six rows of six bytes
    let rows = b"BT /F1 12 Tf 10 10 Td (rows) Tj ET  ";
    b.stream(
        4,
        "/Filter 5 0 R /DecodeParms [6 0 R]",
        &deflate(&png_up(rows, 6)),
    );
    b.object(5, "[/FlateDecode]");
    b.object(6, "<< /Predictor 12 /Columns 6 >>");
    let mut table = vec![(0, Row::Free)];
    table.extend(b.rows(&[1, 2, 3, 4, 5, 6]));
    let xref = b.xref_table(&table, "<< /Size 7 /Root 1 0 R >>");

    let mut doc = PDFDocument::open(b.finish(xref)).unwrap();
    assert_eq!(page_text(&mut doc, 1), "rows");
}

#[test]
fn test_xref_stream_with_png_predictor() {
    let mut b = PdfBuilder::new();
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    b.object(3, "(predicted)");

    let xref_offset = b.offset();
    let mut rows = Vec::new();
    for offset in [0, b.offset_of(1), b.offset_of(2), b.offset_of(3), xref_offset] {
        let kind: u8 = if offset == 0 { 0 } else { 1 };
        rows.push(kind);
        rows.extend_from_slice(&(offset as u32).to_be_bytes());
        rows.extend_from_slice(&[0, 0]);
    }
    b.stream(
        4,
        "/Type /XRef /Size 5 /W [1 4 2] /Root 1 0 R /Filter /FlateDecode \
         /DecodeParms << /Predictor 12 /Columns 7 >>",
        &deflate(&png_up(&rows, 7)),
    );
    let bytes = b.finish(xref_offset);

    let mut doc = PDFDocument::open(bytes).unwrap();
    assert!(!doc.xref().is_recovered());
    assert_eq!(
        *doc.resolve(Ref::new(3, 0)),
        PDFObject::String(b"predicted".to_vec())
    );
}

#[test]
fn test_unsupported_filter_is_an_error_not_empty() {
    let bytes = content_document("/Filter /JBIG2Decode", b"\x00\x01\x02");
    let mut doc = PDFDocument::open(bytes).unwrap();

    let content = doc.resolve(Ref::new(4, 0));
    assert!(matches!(
        doc.decode_stream(&content),
        Err(PDFError::UnsupportedFilter(_))
    ));
    // The page itself degrades to no text
    assert_eq!(page_text(&mut doc, 1), "");
}

#[test]
fn test_oversized_predictor_row_is_a_decode_error() {
    let bytes = content_document(
        "/Filter /FlateDecode /DecodeParms << /Predictor 12 /Columns 4611686018427387904 /Colors 4 >>",
        &deflate(PAGE_ONE),
    );
    let mut doc = PDFDocument::open(bytes).unwrap();

    let content = doc.resolve(Ref::new(4, 0));
    assert!(matches!(
        doc.decode_stream(&content),
        Err(PDFError::Decode { .. })
    ));
    assert!(doc.page(1).content(&mut doc).text.is_empty());
}

#[test]
fn test_corrupt_flate_is_a_decode_error() {
    let bytes = content_document("/Filter /FlateDecode", b"\xff\xfe\xfd not deflate");
    let mut doc = PDFDocument::open(bytes).unwrap();

    let content = doc.resolve(Ref::new(4, 0));
    assert!(doc.decode_stream(&content).is_err());
}

#[test]
fn test_empty_stream_decodes_to_empty() {
    let bytes = content_document("", b"");
    let mut doc = PDFDocument::open(bytes).unwrap();
    let content = doc.resolve(Ref::new(4, 0));
    assert_eq!(doc.decode_stream(&content).unwrap(), Vec::<u8>::new());
}

#[test]
fn test_decode_helpers_on_direct_objects() {
    let filters = PDFObject::Array(vec![
        PDFObject::Name("ASCIIHexDecode".to_string()),
        PDFObject::Name("FlateDecode".to_string()),
    ]);
    let encoded = hex(&deflate(b"direct"));
    assert_eq!(apply_filters(&encoded, &filters, None).unwrap(), b"direct");

    let stream = Parser::from_bytes(
        b"<< /Length 6 /Filter /AHx >>\nstream\n414243\nendstream".to_vec(),
        0,
    )
    .unwrap()
    .get_object()
    .unwrap();
    assert_eq!(decode_stream_object(&stream).unwrap(), b"ABC");
}
