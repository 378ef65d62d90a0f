// src/output/mod.rs

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, StringArray, UInt64Array};
use arrow::csv::WriterBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, instrument};

use crate::config::OutputFormat;
use crate::model::{DetailDataset, LicenseRecord, LIST_COLUMNS};
use crate::pipeline::{RunReport, RunSummary};

/// Licence list as an Arrow batch: eight text columns and a nullable
/// `UInt64` population.
pub fn list_batch(records: &[LicenseRecord]) -> Result<RecordBatch> {
    let mut fields: Vec<Field> = LIST_COLUMNS[..8]
        .iter()
        .map(|name| Field::new(*name, DataType::Utf8, false))
        .collect();
    fields.push(Field::new(LIST_COLUMNS[8], DataType::UInt64, true));

    let mut columns: Vec<ArrayRef> = (0..8)
        .map(|i| {
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.text_columns()[i]),
            )) as ArrayRef
        })
        .collect();
    columns.push(Arc::new(UInt64Array::from(
        records.iter().map(|r| r.population).collect::<Vec<_>>(),
    )));

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("building licence list batch")
}

/// Detail dataset as an Arrow batch, `None` when no document was accepted.
pub fn details_batch(data: &DetailDataset) -> Result<Option<RecordBatch>> {
    let Some(schema) = &data.schema else {
        return Ok(None);
    };
    let names = schema.column_names();
    let n_meta = schema.metadata.len();
    let n_numeric = schema.numeric_columns;

    let mut fields = Vec::with_capacity(names.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(names.len());

    fields.push(Field::new(&names[0], DataType::Utf8, false));
    columns.push(Arc::new(StringArray::from_iter_values(
        data.rows.iter().map(|r| r.authorization_number.as_str()),
    )));

    for (i, name) in names[1..=n_meta].iter().enumerate() {
        fields.push(Field::new(name, DataType::Utf8, true));
        columns.push(Arc::new(StringArray::from_iter(
            data.rows.iter().map(|r| r.metadata.values.get(i).map(String::as_str)),
        )));
    }

    for (i, name) in names[n_meta + 1..].iter().enumerate() {
        if i < n_numeric {
            fields.push(Field::new(name, DataType::Float64, false));
            columns.push(Arc::new(Float64Array::from_iter_values(
                data.rows.iter().map(|r| r.entry.numeric().nth(i).unwrap_or(f64::NAN)),
            )));
        } else {
            fields.push(Field::new(name, DataType::Utf8, true));
            columns.push(Arc::new(StringArray::from_iter(
                data.rows
                    .iter()
                    .map(|r| r.entry.descriptive.get(i - n_numeric).map(String::as_str)),
            )));
        }
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("building licence details batch")?;
    Ok(Some(batch))
}

/// File-name-safe form of a category.
pub fn file_stem(category: &str) -> String {
    category
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Write both datasets and the run summary into `dir`.
#[instrument(level = "info", skip(report), fields(category = %report.summary.category))]
pub fn write_report(report: &RunReport, dir: &Path, format: OutputFormat) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory {}", dir.display()))?;
    let stem = file_stem(&report.summary.category);

    let list = list_batch(&report.list)?;
    let mut written = write_batch(&list, dir, &format!("{stem}_licenses"), format)?;
    written.extend(write_details(&report.details, dir, &stem, format)?);
    written.push(write_summary(&report.summary, dir, &stem)?);
    Ok(written)
}

/// Write the detail dataset as `<stem>_licenceDetails.*`.
pub fn write_details(
    data: &DetailDataset,
    dir: &Path,
    stem: &str,
    format: OutputFormat,
) -> Result<Vec<PathBuf>> {
    match details_batch(data)? {
        Some(batch) => write_batch(&batch, dir, &format!("{stem}_licenceDetails"), format),
        None => {
            info!("no document was normalized; licence details not written");
            Ok(Vec::new())
        }
    }
}

pub fn write_summary(summary: &RunSummary, dir: &Path, stem: &str) -> Result<PathBuf> {
    let path = dir.join(format!("{stem}_summary.json"));
    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    write_atomically(&path, |file| {
        use std::io::Write;
        file.write_all(&json)?;
        Ok(())
    })?;
    Ok(path)
}

fn write_batch(
    batch: &RecordBatch,
    dir: &Path,
    name: &str,
    format: OutputFormat,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    if format.csv() {
        let path = dir.join(format!("{name}.csv"));
        write_atomically(&path, |file| {
            let mut writer = WriterBuilder::new().with_header(true).build(file);
            writer.write(batch).context("writing CSV batch")?;
            Ok(())
        })?;
        written.push(path);
    }
    if format.parquet() {
        let path = dir.join(format!("{name}.parquet"));
        write_atomically(&path, |file| {
            let props = WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build();
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
                .context("creating ArrowWriter")?;
            writer.write(batch).context("writing Parquet batch")?;
            writer.close().context("closing ArrowWriter")?;
            Ok(())
        })?;
        written.push(path);
    }
    for path in &written {
        info!(path = %path.display(), rows = batch.num_rows(), "wrote dataset");
    }
    Ok(written)
}

/// Write through a `.tmp` sibling and rename, so readers never see a
/// half-written file.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let tmp = path.with_extension("tmp");
    let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let mut buf = BufWriter::new(file);
    write(&mut buf)?;
    buf.into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("flushing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TableLayout, UnitMode};
    use crate::process::{fixtures::certificate, normalize_document, DetailAccumulator};
    use chrono::Utc;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn record(auth: &str, population: Option<u64>) -> LicenseRecord {
        LicenseRecord {
            authorization_number: auth.into(),
            former_authorization_number: String::new(),
            company_name: "Acme, Inc".into(),
            account_number: "4006000".into(),
            licence_category: "X".into(),
            area_code: "T4".into(),
            area_name: "Area".into(),
            subservice: "Fixed".into(),
            population,
        }
    }

    fn details() -> Result<DetailDataset> {
        let mut acc = DetailAccumulator::new();
        for (auth, n) in [("A", 2), ("B", 1)] {
            let ranges = vec![("12.5 MHz", "15 MHz", "2.5 MHz"); n];
            let tables = certificate(auth, &ranges, false);
            let doc = normalize_document(auth, &tables, &TableLayout::default(), UnitMode::Strip)?;
            acc.push(doc)?;
        }
        Ok(acc.finish())
    }

    fn report(category: &str) -> Result<RunReport> {
        let details = details()?;
        let now = Utc::now();
        Ok(RunReport {
            list: vec![record("A", Some(1200)), record("B", None)],
            summary: RunSummary {
                category: category.into(),
                strategy: None,
                started_at: now,
                finished_at: now,
                pages: 1,
                records: 2,
                records_with_population: 1,
                documents_requested: 2,
                documents_processed: 2,
                detail_rows: details.len(),
                cancelled: false,
                errors: Vec::new(),
            },
            details,
        })
    }

    #[test]
    fn details_batch_types_numeric_columns() -> Result<()> {
        let batch = details_batch(&details()?)?.context("schema expected")?;
        assert_eq!(batch.num_rows(), 3);
        let schema = batch.schema();
        assert_eq!(schema.field(0).name(), "Authorization Number");
        // 7 metadata columns, then 5 numeric and 1 text frequency column
        assert_eq!(schema.fields().len(), 1 + 7 + 6);
        assert_eq!(schema.field(8).name(), "Lower Frequency");
        assert_eq!(schema.field(8).data_type(), &DataType::Float64);
        assert_eq!(schema.field(13).data_type(), &DataType::Utf8);
        let lower = batch
            .column(8)
            .as_any()
            .downcast_ref::<Float64Array>()
            .context("Float64 column")?;
        assert_eq!(lower.value(0), 12.5);
        Ok(())
    }

    #[test]
    fn empty_details_have_no_batch() -> Result<()> {
        assert!(details_batch(&DetailDataset::default())?.is_none());
        Ok(())
    }

    #[test]
    fn writes_csv_parquet_and_summary() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let written = write_report(&report("Cellular/PCS")?, dir.path(), OutputFormat::Both)?;
        let names: Vec<String> = written
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(String::from))
            .collect();
        assert_eq!(
            names,
            [
                "Cellular_PCS_licenses.csv",
                "Cellular_PCS_licenses.parquet",
                "Cellular_PCS_licenceDetails.csv",
                "Cellular_PCS_licenceDetails.parquet",
                "Cellular_PCS_summary.json"
            ]
        );

        let csv = fs::read_to_string(dir.path().join("Cellular_PCS_licenses.csv"))?;
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(LIST_COLUMNS.join(",").as_str()));
        assert_eq!(lines.next(), Some("A,,\"Acme, Inc\",4006000,X,T4,Area,Fixed,1200"));
        assert_eq!(lines.next(), Some("B,,\"Acme, Inc\",4006000,X,T4,Area,Fixed,"));

        let file = File::open(dir.path().join("Cellular_PCS_licenceDetails.parquet"))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        let rows: usize = reader.map(|b| b.map(|b| b.num_rows())).sum::<Result<usize, _>>()?;
        assert_eq!(rows, 3);

        let summary: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("Cellular_PCS_summary.json"))?)?;
        assert_eq!(summary["detail_rows"], 3);
        assert_eq!(summary["category"], "Cellular/PCS");
        let leftovers = fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }
}
