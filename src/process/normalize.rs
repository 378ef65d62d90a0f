// src/process/normalize.rs

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{
    clean::{flatten_header, parse_quantity},
    select::select_frequency_table,
    RawTable,
};
use crate::config::{TableLayout, UnitMode};
use crate::error::{RecordError, RecordFailure, Stage};
use crate::model::{DetailDataset, DetailSchema, DocumentMetadata, FrequencyEntry, LicenseDetail};

/// One certificate reduced to its headers, its metadata row and its
/// frequency entries.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDocument {
    pub authorization_number: String,
    pub schema: DetailSchema,
    pub metadata: Arc<DocumentMetadata>,
    pub entries: Vec<FrequencyEntry>,
}

impl NormalizedDocument {
    /// Broadcast the metadata row over every frequency entry.
    pub fn into_rows(self) -> Vec<LicenseDetail> {
        let NormalizedDocument {
            authorization_number,
            metadata,
            entries,
            ..
        } = self;
        entries
            .into_iter()
            .map(|entry| LicenseDetail {
                authorization_number: authorization_number.clone(),
                metadata: Arc::clone(&metadata),
                entry,
            })
            .collect()
    }
}

/// Normalize the tables extracted from the certificate of `authorization_number`.
#[instrument(level = "debug", skip(tables, layout), fields(tables = tables.len()))]
pub fn normalize_document(
    authorization_number: &str,
    tables: &[RawTable],
    layout: &TableLayout,
    unit_mode: UnitMode,
) -> Result<NormalizedDocument, RecordFailure> {
    // ─── metadata: one header row and one data row per table ───
    let mut metadata_headers = Vec::new();
    let mut metadata_values = Vec::new();
    for &idx in &layout.metadata_tables {
        let table = tables.get(idx).ok_or_else(|| {
            RecordFailure::layout(format!(
                "metadata table {idx} missing ({} tables extracted)",
                tables.len()
            ))
        })?;
        let header = table.row(layout.metadata_header_row).ok_or_else(|| {
            RecordFailure::layout(format!(
                "metadata table {idx} has no header row {}",
                layout.metadata_header_row
            ))
        })?;
        if table.row(layout.metadata_data_row).is_none() {
            return Err(RecordFailure::layout(format!(
                "metadata table {idx} has no data row {}",
                layout.metadata_data_row
            )));
        }
        metadata_headers.extend(header.iter().map(|h| flatten_header(h)));
        metadata_values.extend(
            (0..header.len()).map(|c| table.cell(layout.metadata_data_row, c).to_string()),
        );
    }

    // ─── frequency table ───
    let freq_idx = select_frequency_table(tables, layout.frequency_table, layout.frequency_header_rows)
        .ok_or_else(|| {
            RecordFailure::layout(format!(
                "no table at or after index {} has frequency rows",
                layout.frequency_table
            ))
        })?;
    if freq_idx != layout.frequency_table {
        debug!(nominal = layout.frequency_table, chosen = freq_idx, "frequency table shifted");
    }
    let freq = &tables[freq_idx];
    let width = freq.rows.iter().map(Vec::len).max().unwrap_or(0);
    if width < layout.frequency_columns {
        return Err(RecordFailure::layout(format!(
            "frequency table {freq_idx} has {width} columns, expected {}",
            layout.frequency_columns
        )));
    }

    let frequency_headers = (0..layout.frequency_columns)
        .map(|c| frequency_header(freq, layout, c))
        .collect();

    let mut entries = Vec::new();
    for row in freq.content_rows(layout.frequency_header_rows) {
        let cell = |c: usize| row.get(c).map(String::as_str).unwrap_or("");
        let numeric = (0..layout.numeric_columns)
            .map(|c| parse_quantity(cell(c), unit_mode))
            .collect::<Result<Vec<f64>, _>>()?;
        entries.push(FrequencyEntry {
            lower: numeric[0],
            upper: numeric[1],
            bandwidth: numeric[2],
            other_numeric: numeric[3..].to_vec(),
            descriptive: (layout.numeric_columns..layout.frequency_columns)
                .map(|c| cell(c).to_string())
                .collect(),
        });
    }

    Ok(NormalizedDocument {
        authorization_number: authorization_number.to_string(),
        schema: DetailSchema {
            metadata: metadata_headers,
            frequency: frequency_headers,
            numeric_columns: layout.numeric_columns,
        },
        metadata: Arc::new(DocumentMetadata {
            values: metadata_values,
        }),
        entries,
    })
}

/// Name of frequency column `col`: the configured header cell when it has
/// text, else the bottom-most non-empty header cell of the column.
fn frequency_header(table: &RawTable, layout: &TableLayout, col: usize) -> String {
    let configured = layout
        .frequency_headers
        .get(col)
        .map(|h| table.cell(h.row, h.col).trim())
        .filter(|h| !h.is_empty());
    configured
        .or_else(|| {
            (0..layout.frequency_header_rows)
                .rev()
                .map(|r| table.cell(r, col).trim())
                .find(|h| !h.is_empty())
        })
        .map(flatten_header)
        .unwrap_or_else(|| format!("Column {}", col + 1))
}

/// Collects normalized documents into one dataset. The first document
/// accepted fixes the schema; later documents must match it.
#[derive(Debug, Default)]
pub struct DetailAccumulator {
    dataset: DetailDataset,
    documents: usize,
}

impl DetailAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `doc`'s rows and return how many were added.
    pub fn push(&mut self, doc: NormalizedDocument) -> Result<usize, RecordError> {
        match &self.dataset.schema {
            None => self.dataset.schema = Some(doc.schema.clone()),
            Some(schema) if *schema != doc.schema => {
                warn!(auth = %doc.authorization_number, "document headers differ from the established schema");
                return Err(RecordError::new(
                    doc.authorization_number,
                    Stage::Normalize,
                    RecordFailure::SchemaMismatch {
                        expected: schema.column_names(),
                        found: doc.schema.column_names(),
                    },
                ));
            }
            Some(_) => {}
        }
        let rows = doc.into_rows();
        let added = rows.len();
        self.dataset.rows.extend(rows);
        self.documents += 1;
        Ok(added)
    }

    pub fn documents(&self) -> usize {
        self.documents
    }

    pub fn finish(self) -> DetailDataset {
        self.dataset
    }
}
