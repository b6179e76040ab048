pub mod core;

// Re-export main types for convenience
pub use core::{
    BaseStream, CMap, Content, Font, Lexer, LinearizedInfo, PDFDict, PDFDocument, PDFError,
    PDFObject, PDFResult, Page, Parser, ReaderOptions, Ref, Stream, TextRun, TextRuns, Token,
    XRef, XRefEntry,
};
