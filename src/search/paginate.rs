// src/search/paginate.rs

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};

use super::Harvest;
use crate::browser::Session;
use crate::config::Config;
use crate::error::{RecordError, RecordFailure, Stage};
use crate::model::{LicenseRecord, LIST_COLUMNS};
use crate::pipeline::CancelToken;
use crate::site::{
    licence_link, NEXT_PAGE, POPULATION_CELL, RESULTS_SUMMARY_SELECTOR, RESULTS_TABLE,
    RESULTS_TABLE_ID,
};
use crate::wait::{ElementWaiter, WaitOutcome};

static POPULATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d[\d,]*)").expect("population regex compiles"));

/// Pages needed to show `total` rows, `page_size` at a time.
pub fn page_count(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1))
}

/// Leading integer of a population cell, e.g. `"12,345 (2016 census)"`.
pub fn parse_population(text: &str) -> Result<u64, RecordFailure> {
    POPULATION
        .captures(text)
        .and_then(|c| c[1].replace(',', "").parse().ok())
        .ok_or_else(|| RecordFailure::parse(text, "a population count"))
}

/// Total match count from the last token of the last summary element.
pub fn parse_total(html: &str) -> Result<usize> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(RESULTS_SUMMARY_SELECTOR)
        .map_err(|e| anyhow::anyhow!("bad summary selector: {e:?}"))?;
    let summary = doc
        .select(&sel)
        .last()
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .context("result page has no summary")?;
    let token = summary
        .split_whitespace()
        .last()
        .with_context(|| format!("empty result summary {summary:?}"))?;
    token
        .replace(',', "")
        .parse()
        .with_context(|| format!("result summary {summary:?} does not end in a count"))
}

/// Header and body cells of the result table on one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn parse_listing(html: &str) -> Result<Listing> {
    let doc = Html::parse_document(html);
    let table_sel = Selector::parse(&format!("table#{RESULTS_TABLE_ID}"))
        .map_err(|e| anyhow::anyhow!("bad table selector: {e:?}"))?;
    let th = Selector::parse("th").map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let tr = Selector::parse("tbody tr").map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let td = Selector::parse("td").map_err(|e| anyhow::anyhow!("{e:?}"))?;

    let table = doc
        .select(&table_sel)
        .next()
        .with_context(|| format!("no #{RESULTS_TABLE_ID} on the page"))?;
    let headers = table.select(&th).map(cell_text).collect();
    let rows = table
        .select(&tr)
        .map(|row| row.select(&td).map(cell_text).collect::<Vec<_>>())
        .filter(|cells| !cells.is_empty())
        .collect();
    Ok(Listing { headers, rows })
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_header(h: &str) -> String {
    h.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Where each [`LicenseRecord`] text field sits in a listing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    positions: [usize; 8],
}

impl ColumnMap {
    /// Match headers by name (`"Area Code (Tier)"` matches `Area Code`),
    /// falling back to the documented position.
    pub fn from_headers(headers: &[String]) -> Self {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut positions = [0usize; 8];
        for (field, slot) in positions.iter_mut().enumerate() {
            let want = normalize_header(LIST_COLUMNS[field]);
            *slot = normalized
                .iter()
                .position(|h| *h == want)
                .or_else(|| normalized.iter().position(|h| h.starts_with(&want)))
                .unwrap_or_else(|| {
                    warn!(column = LIST_COLUMNS[field], position = field, "header not found; using position");
                    field
                });
        }
        Self { positions }
    }

    pub fn record(&self, cells: &[String]) -> LicenseRecord {
        let get = |field: usize| cells.get(self.positions[field]).cloned().unwrap_or_default();
        LicenseRecord {
            authorization_number: get(0),
            former_authorization_number: get(1),
            company_name: get(2),
            account_number: get(3),
            licence_category: get(4),
            area_code: get(5),
            area_name: get(6),
            subservice: get(7),
            population: None,
        }
    }
}

/// Walks every page of a rendered result listing, visiting each row's
/// detail view for its population.
#[derive(Debug, Clone)]
pub struct ResultSetPaginator {
    page_size: usize,
    elements: ElementWaiter,
    detail: ElementWaiter,
    max_attempts: u32,
    cancel: CancelToken,
}

impl ResultSetPaginator {
    pub fn new(cfg: &Config, cancel: CancelToken) -> Self {
        Self {
            page_size: cfg.page_size,
            elements: ElementWaiter::new(cfg.waits.element()),
            detail: ElementWaiter::new(cfg.waits.detail()),
            max_attempts: cfg.waits.max_attempts.max(1),
            cancel,
        }
    }

    /// Collect every row of the listing currently shown. Rows come back in
    /// page order, then rendered order within a page.
    #[instrument(level = "info", skip_all)]
    pub async fn collect<S: Session + ?Sized>(&self, session: &mut S) -> Result<Harvest> {
        let total = parse_total(&session.html().await?)?;
        let pages = page_count(total, self.page_size);
        info!(total, pages, "walking result listing");

        let mut harvest = Harvest::default();
        for page in 0..pages {
            if self.cancel.is_cancelled() {
                harvest.cancelled = true;
                break;
            }
            let listing = parse_listing(&session.html().await?)?;
            let columns = ColumnMap::from_headers(&listing.headers);
            let anchor = listing
                .rows
                .first()
                .map(|r| columns.record(r).authorization_number)
                .with_context(|| format!("page {} of {pages} has no rows", page + 1))?;
            debug!(page = page + 1, rows = listing.rows.len(), "page");

            for row in &listing.rows {
                if self.cancel.is_cancelled() {
                    harvest.cancelled = true;
                    return Ok(harvest);
                }
                let mut record = columns.record(row);
                if record.authorization_number.is_empty() {
                    warn!(?row, "row without authorization number skipped");
                    continue;
                }
                match self
                    .fetch_population(session, &record.authorization_number, &anchor)
                    .await?
                {
                    Ok(population) => record.population = Some(population),
                    Err(failure) => {
                        warn!(auth = %record.authorization_number, %failure, "population unavailable");
                        harvest.errors.push(RecordError::new(
                            record.authorization_number.clone(),
                            Stage::Population,
                            failure,
                        ));
                    }
                }
                harvest.records.push(record);
            }
            harvest.pages += 1;

            if page + 1 < pages {
                self.next_page(session, page + 2).await?;
            }
        }
        Ok(harvest)
    }

    async fn next_page<S: Session + ?Sized>(&self, session: &mut S, number: usize) -> Result<()> {
        session
            .click_and_wait(&NEXT_PAGE)
            .await
            .with_context(|| format!("opening result page {number}"))?;
        if !self.elements.element(&*session, &RESULTS_TABLE).await?.is_found() {
            bail!("result page {number} did not render its table");
        }
        Ok(())
    }

    /// Visit `auth`'s detail view and read its population, retrying while
    /// the cell fails to appear. The outer error means the listing could
    /// not be restored and the traversal cannot continue.
    async fn fetch_population<S: Session + ?Sized>(
        &self,
        session: &mut S,
        auth: &str,
        anchor: &str,
    ) -> Result<Result<u64, RecordFailure>> {
        let mut attempt = 1;
        loop {
            let outcome = self.population_round_trip(session, auth, anchor).await?;
            match outcome {
                Err(failure) if failure.is_transient() && attempt < self.max_attempts => {
                    debug!(auth, attempt, %failure, "retrying detail view");
                    attempt += 1;
                }
                other => return Ok(other),
            }
        }
    }

    async fn population_round_trip<S: Session + ?Sized>(
        &self,
        session: &mut S,
        auth: &str,
        anchor: &str,
    ) -> Result<Result<u64, RecordFailure>> {
        if let Err(e) = session.click_and_wait(&licence_link(auth)).await {
            // Still on the listing unless the page half-changed.
            if self.elements.element(&*session, &licence_link(anchor)).await?.is_found() {
                return Ok(Err(RecordFailure::session(&e)));
            }
            self.return_to_listing(session, auth, anchor).await?;
            return Ok(Err(RecordFailure::session(&e)));
        }

        let read = self.detail.text(&*session, &POPULATION_CELL).await;
        self.return_to_listing(session, auth, anchor).await?;

        Ok(match read {
            Ok(WaitOutcome::Found(text)) => parse_population(&text),
            Ok(WaitOutcome::TimedOut { waited, polls }) => Err(RecordFailure::unavailable(
                format!("population for {auth}"),
                waited,
                polls,
            )),
            Err(e) => Err(RecordFailure::session(&e)),
        })
    }

    /// Go back and wait until the listing shows the page's first licence.
    async fn return_to_listing<S: Session + ?Sized>(
        &self,
        session: &mut S,
        auth: &str,
        anchor: &str,
    ) -> Result<()> {
        session
            .back()
            .await
            .with_context(|| format!("returning to the listing from {auth}"))?;
        match self.elements.element(&*session, &licence_link(anchor)).await? {
            WaitOutcome::Found(()) => Ok(()),
            WaitOutcome::TimedOut { waited, .. } => bail!(
                "listing did not come back after viewing {auth} ({anchor} missing after {waited:?})"
            ),
        }
    }
}
