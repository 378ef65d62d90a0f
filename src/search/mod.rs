// src/search/mod.rs
//
// List pipeline: category search, company fallback and result traversal.

pub mod paginate;

pub use paginate::{page_count, parse_population, ResultSetPaginator};

use anyhow::{anyhow, Context, Result};
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::browser::Session;
use crate::config::Config;
use crate::error::{PipelineError, RecordError};
use crate::model::{dedup_records, LicenseRecord};
use crate::pipeline::CancelToken;
use crate::site::{
    CATEGORY_OPTIONS_SELECTOR, CATEGORY_SELECT, COMPANY_FIELD, NO_RESULTS, RESULTS_TABLE,
    SEARCH_BUTTON, SEARCH_ERROR,
};
use crate::wait::{ElementWaiter, WaitOutcome};

/// Records and per-row failures gathered from one or more listings.
#[derive(Debug, Default)]
pub struct Harvest {
    pub records: Vec<LicenseRecord>,
    pub errors: Vec<RecordError>,
    pub pages: usize,
    pub cancelled: bool,
}

impl Harvest {
    pub fn merge(&mut self, other: Harvest) {
        self.records.extend(other.records);
        self.errors.extend(other.errors);
        self.pages += other.pages;
        self.cancelled |= other.cancelled;
    }
}

/// How the licence list was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Bulk,
    CompanyFallback,
}

/// What the registry showed after a search was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Rejected,
    Results,
    NoResults,
}

pub struct CategorySearchStrategy {
    list_url: String,
    fallback_companies: Vec<String>,
    elements: ElementWaiter,
    outcome: ElementWaiter,
    paginator: ResultSetPaginator,
    cancel: CancelToken,
}

impl CategorySearchStrategy {
    pub fn new(cfg: &Config, cancel: CancelToken) -> Self {
        Self {
            list_url: cfg.list_url.to_string(),
            fallback_companies: cfg.fallback_companies.clone(),
            elements: ElementWaiter::new(cfg.waits.element()),
            outcome: ElementWaiter::new(cfg.waits.search_outcome()),
            paginator: ResultSetPaginator::new(cfg, cancel.clone()),
            cancel,
        }
    }

    /// Load the licence browser and wait for its category selector.
    pub async fn open<S: Session + ?Sized>(&self, session: &mut S) -> Result<()> {
        session.goto(&self.list_url).await?;
        match self.elements.element(&*session, &CATEGORY_SELECT).await? {
            WaitOutcome::Found(()) => Ok(()),
            WaitOutcome::TimedOut { waited, .. } => Err(anyhow!(
                "licence browser showed no category selector after {waited:?}"
            )),
        }
    }

    /// Categories offered by the open licence browser.
    pub async fn list_categories<S: Session + ?Sized>(&self, session: &S) -> Result<Vec<String>> {
        let categories = parse_categories(&session.html().await?)?;
        info!(count = categories.len(), "licence categories");
        Ok(categories)
    }

    /// Search `category` and collect its licences, falling back to
    /// per-company searches when the registry rejects the bulk query.
    #[instrument(level = "info", skip(self, session))]
    pub async fn run<S: Session + ?Sized>(
        &self,
        session: &mut S,
        category: &str,
    ) -> Result<(SearchStrategy, Harvest), PipelineError> {
        session
            .set_value(&CATEGORY_SELECT, category)
            .await
            .context("selecting licence category")?;
        session
            .click_and_wait(&SEARCH_BUTTON)
            .await
            .context("submitting category search")?;

        let (strategy, mut harvest) = match self.classify(&*session).await? {
            SearchOutcome::Results => (SearchStrategy::Bulk, self.paginator.collect(session).await?),
            SearchOutcome::NoResults => return Err(PipelineError::NoRecords(category.to_string())),
            SearchOutcome::Rejected => {
                warn!(category, companies = ?self.fallback_companies, "category search rejected; searching by company");
                (SearchStrategy::CompanyFallback, self.by_company(session, category).await?)
            }
        };

        harvest.records = dedup_records(harvest.records);
        if harvest.records.is_empty() && !harvest.cancelled {
            return Err(PipelineError::NoRecords(category.to_string()));
        }
        info!(records = harvest.records.len(), pages = harvest.pages, ?strategy, "licence list collected");
        Ok((strategy, harvest))
    }

    async fn by_company<S: Session + ?Sized>(
        &self,
        session: &mut S,
        category: &str,
    ) -> Result<Harvest, PipelineError> {
        let mut harvest = Harvest::default();
        for company in &self.fallback_companies {
            if self.cancel.is_cancelled() {
                harvest.cancelled = true;
                break;
            }
            session.set_value(&CATEGORY_SELECT, category).await?;
            session
                .set_value(&COMPANY_FIELD, company)
                .await
                .with_context(|| format!("entering company {company}"))?;
            session
                .click_and_wait(&SEARCH_BUTTON)
                .await
                .with_context(|| format!("submitting search for {company}"))?;

            match self.classify(&*session).await {
                Ok(SearchOutcome::Results) => {
                    let found = self.paginator.collect(session).await?;
                    info!(company, records = found.records.len(), "company search");
                    harvest.merge(found);
                }
                Ok(SearchOutcome::NoResults) => info!(company, "no licences for company"),
                Ok(SearchOutcome::Rejected) => warn!(company, "company search rejected; skipping"),
                Err(PipelineError::AmbiguousSearch { waited }) => {
                    warn!(company, ?waited, "company search showed no outcome; skipping")
                }
                Err(e) => return Err(e),
            }

            if !self.elements.element(&*session, &COMPANY_FIELD).await?.is_found() {
                return Err(anyhow!("company field missing after searching {company}").into());
            }
            session
                .set_value(&COMPANY_FIELD, "")
                .await
                .context("clearing company field")?;
        }
        Ok(harvest)
    }

    /// Probe the error banner, result table and no-results notice on every
    /// poll. The banner wins over the table, the table over the notice.
    pub async fn classify<S: Session + ?Sized>(&self, session: &S) -> Result<SearchOutcome, PipelineError> {
        let outcome = self
            .outcome
            .until("search outcome", move || async move {
                if session.count(&SEARCH_ERROR).await? > 0 {
                    return Ok(Some(SearchOutcome::Rejected));
                }
                if session.count(&RESULTS_TABLE).await? > 0 {
                    return Ok(Some(SearchOutcome::Results));
                }
                if session.count(&NO_RESULTS).await? > 0 {
                    return Ok(Some(SearchOutcome::NoResults));
                }
                Ok(None)
            })
            .await?;
        match outcome {
            WaitOutcome::Found(o) => Ok(o),
            WaitOutcome::TimedOut { waited, .. } => Err(PipelineError::AmbiguousSearch { waited }),
        }
    }
}

/// Reject a category the registry does not offer.
pub fn validate_category(choice: &str, available: &[String]) -> Result<(), PipelineError> {
    if available.iter().any(|c| c == choice) {
        Ok(())
    } else {
        Err(PipelineError::InvalidCategory {
            choice: choice.to_string(),
            available: available.to_vec(),
        })
    }
}

/// Option values of the category selector.
pub fn parse_categories(html: &str) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(CATEGORY_OPTIONS_SELECTOR)
        .map_err(|e| anyhow!("bad category selector: {e:?}"))?;
    Ok(doc
        .select(&sel)
        .filter_map(|opt| {
            let value = opt
                .value()
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| opt.text().collect::<String>());
            let value = value.trim().to_string();
            (!value.is_empty()).then_some(value)
        })
        .collect())
}
