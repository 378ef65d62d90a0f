// src/process/mod.rs
//
// Turns the tables extracted from one licence certificate into detail rows.

pub mod clean;
pub mod normalize;
pub mod select;

pub use normalize::{normalize_document, DetailAccumulator, NormalizedDocument};
pub use select::select_frequency_table;

/// One table as the extractor saw it: rows of trimmed cell text, header rows
/// included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    pub fn row(&self, index: usize) -> Option<&[String]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Cell text, with missing cells reading as empty.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Rows after the first `header_rows` that carry any text.
    pub fn content_rows(&self, header_rows: usize) -> impl Iterator<Item = &[String]> + '_ {
        self.rows
            .iter()
            .skip(header_rows)
            .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
            .map(Vec::as_slice)
    }
}

/// All tables extracted from one document, in page order.
pub type RawTableSet = Vec<RawTable>;
