// src/model.rs

use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};

/// Column names of the licence list dataset, in output order.
pub const LIST_COLUMNS: [&str; 9] = [
    "Authorization Number",
    "Former Authorization Number",
    "Company Name",
    "Account Number",
    "Licence Category",
    "Area Code",
    "Area Name",
    "Subservice",
    "Population",
];

pub const AUTHORIZATION_COLUMN: &str = LIST_COLUMNS[0];

/// One row of the registry's licence listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRecord {
    pub authorization_number: String,
    pub former_authorization_number: String,
    pub company_name: String,
    pub account_number: String,
    pub licence_category: String,
    pub area_code: String,
    pub area_name: String,
    pub subservice: String,
    /// Read from the detail view; `None` when it could not be recovered.
    pub population: Option<u64>,
}

impl LicenseRecord {
    /// Text columns in [`LIST_COLUMNS`] order (population excluded).
    pub fn text_columns(&self) -> [&str; 8] {
        [
            &self.authorization_number,
            &self.former_authorization_number,
            &self.company_name,
            &self.account_number,
            &self.licence_category,
            &self.area_code,
            &self.area_name,
            &self.subservice,
        ]
    }
}

/// Keep the first record seen for each authorization number.
pub fn dedup_records(records: Vec<LicenseRecord>) -> Vec<LicenseRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.authorization_number.clone()))
        .collect()
}

/// Headers shared by every document in a detail dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailSchema {
    /// Header cells of the metadata tables, concatenated.
    pub metadata: Vec<String>,
    /// One header per frequency column.
    pub frequency: Vec<String>,
    /// How many leading frequency columns are numeric.
    pub numeric_columns: usize,
}

impl DetailSchema {
    /// Output column names: the join key, metadata, then frequency columns.
    /// Repeated names get a ` (2)`, ` (3)`, ... suffix.
    pub fn column_names(&self) -> Vec<String> {
        let raw = std::iter::once(AUTHORIZATION_COLUMN.to_string())
            .chain(self.metadata.iter().cloned())
            .chain(self.frequency.iter().cloned());
        dedup_names(raw)
    }
}

pub fn dedup_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut used = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let mut candidate = name.clone();
        let mut n = 2;
        while !used.insert(candidate.clone()) {
            candidate = format!("{name} ({n})");
            n += 1;
        }
        out.push(candidate);
    }
    out
}

/// The single data row of a certificate's metadata tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyEntry {
    pub lower: f64,
    pub upper: f64,
    pub bandwidth: f64,
    /// Numeric columns after the first three.
    pub other_numeric: Vec<f64>,
    pub descriptive: Vec<String>,
}

impl FrequencyEntry {
    pub fn numeric(&self) -> impl Iterator<Item = f64> + '_ {
        [self.lower, self.upper, self.bandwidth]
            .into_iter()
            .chain(self.other_numeric.iter().copied())
    }
}

/// One frequency entry joined with its document's metadata. All rows of a
/// document point at the same metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct LicenseDetail {
    pub authorization_number: String,
    pub metadata: Arc<DocumentMetadata>,
    pub entry: FrequencyEntry,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailDataset {
    /// Fixed by the first document accepted into the dataset.
    pub schema: Option<DetailSchema>,
    pub rows: Vec<LicenseDetail>,
}

impl DetailDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows_for<'a>(&'a self, auth: &'a str) -> impl Iterator<Item = &'a LicenseDetail> + 'a {
        self.rows.iter().filter(move |r| r.authorization_number == auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(auth: &str, company: &str) -> LicenseRecord {
        LicenseRecord {
            authorization_number: auth.into(),
            former_authorization_number: String::new(),
            company_name: company.into(),
            account_number: "1".into(),
            licence_category: "X".into(),
            area_code: "A".into(),
            area_name: "Area".into(),
            subservice: "S".into(),
            population: None,
        }
    }

    #[test]
    fn first_occurrence_wins_on_dedup() {
        let out = dedup_records(vec![
            record("1", "A"),
            record("2", "A"),
            record("1", "B"),
        ]);
        let companies: Vec<_> = out.iter().map(|r| r.company_name.as_str()).collect();
        assert_eq!(companies, ["A", "A"]);
        assert_eq!(out[1].authorization_number, "2");
    }

    #[test]
    fn repeated_headers_are_suffixed() {
        let schema = DetailSchema {
            metadata: vec!["Account Number".into(), "Date".into(), "Date".into()],
            frequency: vec!["Lower".into(), "Date".into()],
            numeric_columns: 1,
        };
        assert_eq!(
            schema.column_names(),
            [
                "Authorization Number",
                "Account Number",
                "Date",
                "Date (2)",
                "Lower",
                "Date (3)"
            ]
        );
    }
}
