use anyhow::{bail, Context, Result};
use spectrumscraper::{
    config::{Config, MismatchPolicy},
    error::{RecordError, RecordFailure, Stage},
    fetch::{TableExtractor, TabulaCli},
    init_logging, output,
    process::{normalize_document, DetailAccumulator},
    site::authorization_from_document,
};
use std::{env, path::PathBuf};
use tracing::{info, warn};

/// Normalize already-downloaded `ISED-*.pdf` certificates into a licence
/// details dataset.
///
/// Usage: `normalize [DIR] [NAME]`. DIR defaults to the configured download
/// directory; the dataset is written as `<NAME>_licenceDetails.*`.
#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cfg = Config::load(None)?;
    let mut args = env::args().skip(1);
    let dir = args.next().map(PathBuf::from).unwrap_or_else(|| cfg.download_dir.clone());
    let name = args.next().unwrap_or_else(|| "local".to_string());

    let pattern = dir.join("ISED-*.pdf");
    let pattern = pattern.to_str().context("directory is not valid UTF-8")?;
    let mut documents: Vec<PathBuf> = glob::glob(pattern)
        .context("bad document pattern")?
        .filter_map(|e| e.ok())
        .collect();
    documents.sort();
    if documents.is_empty() {
        bail!("no ISED-*.pdf documents in {}", dir.display());
    }
    info!(count = documents.len(), dir = %dir.display(), "normalizing documents");

    let tabula = TabulaCli::new(&cfg.tabula);
    let mut acc = DetailAccumulator::new();
    let mut errors = Vec::new();
    for path in &documents {
        let Some(auth) = authorization_from_document(path) else {
            continue;
        };
        let doc = match tabula.extract(path).await {
            Ok(tables) => normalize_document(&auth, &tables, &cfg.layout, cfg.unit_mode),
            Err(e) => Err(RecordFailure::Extraction {
                detail: format!("{e:#}"),
            }),
        };
        match doc.map_err(|f| RecordError::new(&auth, Stage::Normalize, f)) {
            Ok(doc) => {
                if let Err(e) = acc.push(doc) {
                    if cfg.on_schema_mismatch == MismatchPolicy::Fail {
                        bail!(e);
                    }
                    errors.push(e);
                }
            }
            Err(e) => errors.push(e),
        }
    }

    for e in &errors {
        warn!(error = %e, "document skipped");
    }
    let documents_ok = acc.documents();
    let dataset = acc.finish();
    let written = output::write_details(&dataset, &cfg.output_dir, &output::file_stem(&name), cfg.output_format)?;
    for path in &written {
        println!("{}", path.display());
    }
    info!(documents = documents_ok, rows = dataset.len(), skipped = errors.len(), "done");
    Ok(())
}
