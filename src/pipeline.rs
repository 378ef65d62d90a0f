// src/pipeline.rs

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, info, instrument, warn};

use crate::browser::Session;
use crate::config::{Config, MismatchPolicy};
use crate::error::{PipelineError, RecordError, RecordFailure, Stage};
use crate::fetch::{cleanup_partial_downloads, discard, DetailDocumentRetriever, TableExtractor};
use crate::model::{DetailDataset, LicenseRecord};
use crate::process::{normalize_document, DetailAccumulator};
use crate::search::{validate_category, CategorySearchStrategy, Harvest, SearchStrategy};

/// Cooperative cancellation flag, checked between rows, pages and documents.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened during a run, written next to the datasets.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub category: String,
    pub strategy: Option<SearchStrategy>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages: usize,
    pub records: usize,
    pub records_with_population: usize,
    pub documents_requested: usize,
    pub documents_processed: usize,
    pub detail_rows: usize,
    pub cancelled: bool,
    pub errors: Vec<RecordError>,
}

#[derive(Debug)]
pub struct RunReport {
    pub list: Vec<LicenseRecord>,
    pub details: DetailDataset,
    pub summary: RunSummary,
}

#[derive(Debug, Default)]
struct DetailHarvest {
    dataset: DetailDataset,
    errors: Vec<RecordError>,
    requested: usize,
    processed: usize,
    cancelled: bool,
}

/// Everything a run needs: the browser session, the table extractor, the
/// configuration and the cancellation flag.
pub struct RunContext<S, E> {
    pub session: S,
    pub extractor: E,
    pub config: Config,
    cancel: CancelToken,
}

impl<S: Session, E: TableExtractor> RunContext<S, E> {
    pub fn new(session: S, extractor: E, config: Config) -> Self {
        Self {
            session,
            extractor,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Licence categories offered by the registry.
    pub async fn categories(&mut self) -> Result<Vec<String>> {
        let search = CategorySearchStrategy::new(&self.config, self.cancel.clone());
        search.open(&mut self.session).await?;
        search.list_categories(&self.session).await
    }

    /// List pipeline, then detail pipeline, for one category.
    #[instrument(level = "info", skip(self))]
    pub async fn run(&mut self, category: &str) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();

        // ─── 1) validate the category against the live selector ───
        let search = CategorySearchStrategy::new(&self.config, self.cancel.clone());
        search.open(&mut self.session).await?;
        let available = search.list_categories(&self.session).await?;
        validate_category(category, &available)?;

        // ─── 2) licence list ───
        let (strategy, harvest) = search.run(&mut self.session, category).await?;
        let Harvest {
            records,
            mut errors,
            pages,
            cancelled,
        } = harvest;

        // ─── 3) certificates ───
        let details = if cancelled {
            DetailHarvest {
                cancelled: true,
                ..Default::default()
            }
        } else {
            self.details(&records).await?
        };
        errors.extend(details.errors);

        if let Err(e) = cleanup_partial_downloads(&self.config.download_dir) {
            warn!(error = %e, "could not clean up partial downloads");
        }

        for e in &errors {
            warn!(error = %e, "record error");
        }
        let summary = RunSummary {
            category: category.to_string(),
            strategy: Some(strategy),
            started_at,
            finished_at: Utc::now(),
            pages,
            records: records.len(),
            records_with_population: records.iter().filter(|r| r.population.is_some()).count(),
            documents_requested: details.requested,
            documents_processed: details.processed,
            detail_rows: details.dataset.len(),
            cancelled: details.cancelled,
            errors,
        };
        info!(
            records = summary.records,
            detail_rows = summary.detail_rows,
            errors = summary.errors.len(),
            cancelled = summary.cancelled,
            "run finished"
        );
        Ok(RunReport {
            list: records,
            details: details.dataset,
            summary,
        })
    }

    async fn details(&mut self, records: &[LicenseRecord]) -> Result<DetailHarvest, PipelineError> {
        let mut out = DetailHarvest::default();
        if records.is_empty() {
            return Ok(out);
        }
        let retriever = DetailDocumentRetriever::new(&self.config);
        retriever.open(&mut self.session).await?;

        let mut acc = DetailAccumulator::new();
        for record in records {
            if self.cancel.is_cancelled() {
                info!(done = out.requested, total = records.len(), "cancelled before next document");
                out.cancelled = true;
                break;
            }
            let auth = record.authorization_number.as_str();
            out.requested += 1;

            let path = match retriever.retrieve(&mut self.session, auth).await {
                Ok(path) => path,
                Err(failure) => {
                    out.errors.push(RecordError::new(auth, Stage::Document, failure));
                    continue;
                }
            };

            let extracted = self.extractor.extract(&path).await;
            if !self.config.keep_documents {
                if let Err(e) = discard(&path) {
                    warn!(auth, error = %e, "could not delete document");
                }
            }
            let doc = extracted
                .map_err(|e| RecordFailure::Extraction {
                    detail: format!("{e:#}"),
                })
                .and_then(|tables| {
                    normalize_document(auth, &tables, &self.config.layout, self.config.unit_mode)
                });
            let doc = match doc {
                Ok(doc) => doc,
                Err(failure) => {
                    out.errors.push(RecordError::new(auth, Stage::Normalize, failure));
                    continue;
                }
            };

            match acc.push(doc) {
                Ok(rows) => debug!(auth, rows, "document normalized"),
                Err(e) if self.config.on_schema_mismatch == MismatchPolicy::Fail => {
                    return Err(PipelineError::SchemaMismatch(Box::new(e)));
                }
                Err(e) => out.errors.push(e),
            }
        }

        out.processed = acc.documents();
        out.dataset = acc.finish();
        Ok(out)
    }
}
