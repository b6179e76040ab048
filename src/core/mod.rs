pub mod base_stream;
pub mod cmap;
pub mod content_stream;
pub mod decode;
pub mod document;
pub mod encoding;
pub mod error;
pub mod font;
pub mod lexer;
pub mod options;
pub mod page;
pub mod parser;
pub mod stream;
pub mod xref;

pub use base_stream::BaseStream;
pub use cmap::CMap;
pub use content_stream::{Content, TextRun, TextRuns};
pub use document::PDFDocument;
pub use error::{PDFError, PDFResult};
pub use font::Font;
pub use lexer::{Lexer, Token};
pub use options::ReaderOptions;
pub use page::Page;
pub use parser::{PDFDict, PDFObject, Parser, Ref};
pub use stream::Stream;
pub use xref::{LinearizedInfo, XRef, XRefEntry};
