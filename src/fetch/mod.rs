// src/fetch/mod.rs
//
// Detail pipeline inputs: certificate downloads and table extraction.

pub mod document;
pub mod tabula;

pub use document::{cleanup_partial_downloads, discard, DetailDocumentRetriever};
pub use tabula::{parse_tabula_json, TableExtractor, TabulaCli};
