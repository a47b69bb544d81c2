//! Source discovery and parsing.

mod file;
mod index;
pub mod python;

pub use file::SourceFile;
pub use index::{InputError, SourceIndex};
pub use python::ParseFailure;
