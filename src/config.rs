// src/config.rs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};
use url::Url;

use crate::wait::Backoff;

pub const DEFAULT_CONFIG_PATH: &str = "spectrumscraper.yaml";

/// Full run configuration. Every field has a default, so an empty YAML
/// document (or no file at all) yields a usable config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Spectrum licence browser (list pipeline entry page).
    pub list_url: Url,
    /// Virtual licence / certificate search (detail pipeline entry page).
    pub document_url: Url,
    pub download_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_format: OutputFormat,
    /// Keep `ISED-*.pdf` files after they have been parsed.
    pub keep_documents: bool,
    pub page_size: usize,
    /// Companies searched one by one when the category search is rejected.
    pub fallback_companies: Vec<String>,
    pub browser: BrowserConfig,
    pub tabula: TabulaConfig,
    pub waits: WaitConfig,
    pub layout: TableLayout,
    pub unit_mode: UnitMode,
    pub on_schema_mismatch: MismatchPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            list_url: Url::parse(
                "https://sms-sgs.ic.gc.ca/licenseSearch/searchSpectrumLicense?execution=e1s14",
            )
            .expect("static list URL parses"),
            document_url: Url::parse(
                "https://sms-sgs.ic.gc.ca/licenseSearch/searchVirtualLicense?execution=e3s1",
            )
            .expect("static document URL parses"),
            download_dir: PathBuf::from("downloads"),
            output_dir: PathBuf::from("exports"),
            output_format: OutputFormat::Csv,
            keep_documents: false,
            page_size: 20,
            fallback_companies: vec!["SSI Micro".into(), "Tbaytel".into()],
            browser: BrowserConfig::default(),
            tabula: TabulaConfig::default(),
            waits: WaitConfig::default(),
            layout: TableLayout::default(),
            unit_mode: UnitMode::Strip,
            on_schema_mismatch: MismatchPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Parquet,
    Both,
}

impl OutputFormat {
    pub fn csv(self) -> bool {
        matches!(self, OutputFormat::Csv | OutputFormat::Both)
    }

    pub fn parquet(self) -> bool {
        matches!(self, OutputFormat::Parquet | OutputFormat::Both)
    }
}

/// What to do with kHz / MHz suffixed frequency cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitMode {
    /// Remove the unit token and keep the magnitude as written.
    Strip,
    /// Rescale kHz values so every numeric cell is in MHz.
    Megahertz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Report the document and leave its rows out.
    Skip,
    /// Abort the run.
    Fail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Chrome / Chromium binary. Auto-detected when unset.
    pub executable: Option<PathBuf>,
    pub headful: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TabulaConfig {
    pub java: String,
    pub jar: PathBuf,
}

impl Default for TabulaConfig {
    fn default() -> Self {
        Self {
            java: "java".into(),
            jar: PathBuf::from("tabula.jar"),
        }
    }
}

/// Backoff settings, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Ceiling for ordinary page elements.
    pub element_timeout_ms: u64,
    /// Ceiling for deciding whether a search was accepted or rejected.
    pub search_outcome_timeout_ms: u64,
    /// Ceiling for the population cell of a detail view.
    pub detail_timeout_ms: u64,
    /// Ceiling for a document to land in the download directory.
    pub document_timeout_ms: u64,
    /// Attempts per detail-view round trip.
    pub max_attempts: u32,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 2_000,
            element_timeout_ms: 10_000,
            search_outcome_timeout_ms: 15_000,
            detail_timeout_ms: 30_000,
            document_timeout_ms: 100_000,
            max_attempts: 3,
        }
    }
}

impl WaitConfig {
    fn backoff(&self, timeout_ms: u64) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn element(&self) -> Backoff {
        self.backoff(self.element_timeout_ms)
    }

    pub fn search_outcome(&self) -> Backoff {
        self.backoff(self.search_outcome_timeout_ms)
    }

    pub fn detail(&self) -> Backoff {
        self.backoff(self.detail_timeout_ms)
    }

    pub fn document(&self) -> Backoff {
        self.backoff(self.document_timeout_ms)
    }
}

/// Where things live in the table set extracted from one certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableLayout {
    /// The two single-row metadata tables, in output order.
    pub metadata_tables: [usize; 2],
    pub metadata_header_row: usize,
    pub metadata_data_row: usize,
    /// Nominal position of the frequency table; later tables are tried
    /// when this one has no content rows.
    pub frequency_table: usize,
    pub frequency_header_rows: usize,
    /// Header cell naming each frequency column, in output order. Columns
    /// without an entry, or whose cell is blank, take the bottom-most
    /// non-empty header cell above them.
    pub frequency_headers: Vec<HeaderCell>,
    pub frequency_columns: usize,
    /// Leading frequency columns holding unit-suffixed numbers.
    pub numeric_columns: usize,
}

/// A cell in the frequency table's header rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderCell {
    pub row: usize,
    pub col: usize,
}

impl HeaderCell {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            metadata_tables: [0, 1],
            metadata_header_row: 1,
            metadata_data_row: 2,
            frequency_table: 2,
            frequency_header_rows: 3,
            // The certificate names its last two columns one row up and
            // one column left of their data.
            frequency_headers: vec![
                HeaderCell::new(2, 0),
                HeaderCell::new(2, 1),
                HeaderCell::new(2, 2),
                HeaderCell::new(2, 3),
                HeaderCell::new(1, 1),
                HeaderCell::new(1, 2),
            ],
            frequency_columns: 6,
            numeric_columns: 5,
        }
    }
}

impl Config {
    /// Load from `path`, or from `SPECTRUM_CONFIG` / the default path.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => env::var("SPECTRUM_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };

        let mut cfg = if path.is_file() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            info!(path = %path.display(), "loaded config");
            Self::from_yaml(&raw).with_context(|| format!("parsing config {}", path.display()))?
        } else {
            debug!(path = %path.display(), "no config file; using defaults");
            Self::default()
        };

        cfg.apply_env(|key| env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply `SPECTRUM_*` overrides; `lookup` is `env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("SPECTRUM_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SPECTRUM_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(keep) = lookup("SPECTRUM_KEEP_DOCUMENTS") {
            self.keep_documents = is_yes(&keep);
        }
        if let Some(headless) = lookup("SPECTRUM_HEADLESS") {
            self.browser.headful = !is_yes(&headless);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            bail!("page_size must be at least 1");
        }
        let layout = &self.layout;
        if layout.numeric_columns < 3 {
            bail!(
                "layout.numeric_columns is {}; lower, upper and bandwidth need at least 3",
                layout.numeric_columns
            );
        }
        if layout.numeric_columns > layout.frequency_columns {
            bail!(
                "layout.numeric_columns ({}) exceeds layout.frequency_columns ({})",
                layout.numeric_columns,
                layout.frequency_columns
            );
        }
        if layout.metadata_header_row == layout.metadata_data_row {
            bail!("layout.metadata_header_row and metadata_data_row must differ");
        }
        if layout.frequency_headers.len() > layout.frequency_columns {
            bail!(
                "layout.frequency_headers names {} columns but there are {}",
                layout.frequency_headers.len(),
                layout.frequency_columns
            );
        }
        if let Some(cell) = layout
            .frequency_headers
            .iter()
            .find(|h| h.row >= layout.frequency_header_rows)
        {
            bail!(
                "layout.frequency_headers row {} is not one of the {} header rows",
                cell.row,
                layout.frequency_header_rows
            );
        }
        Ok(())
    }
}

fn is_yes(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "yes" | "y" | "true" | "1")
}
