// src/fetch/tabula.rs

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::TabulaConfig;
use crate::process::{RawTable, RawTableSet};

/// Turns a retrieved document into its ordered table set.
#[async_trait]
pub trait TableExtractor: Send + Sync {
    async fn extract(&self, document: &Path) -> Result<RawTableSet>;
}

/// Runs tabula-java and reads its JSON output.
#[derive(Debug, Clone)]
pub struct TabulaCli {
    java: String,
    jar: PathBuf,
}

impl TabulaCli {
    pub fn new(cfg: &TabulaConfig) -> Self {
        Self {
            java: cfg.java.clone(),
            jar: cfg.jar.clone(),
        }
    }

    fn command(&self, document: &Path) -> Command {
        let mut cmd = Command::new(&self.java);
        cmd.arg("-jar")
            .arg(&self.jar)
            .args(["--guess", "--pages", "all", "--format", "JSON"])
            .arg(document)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TableExtractor for TabulaCli {
    #[instrument(level = "debug", skip(self), fields(document = %document.display()))]
    async fn extract(&self, document: &Path) -> Result<RawTableSet> {
        let output = self
            .command(document)
            .output()
            .await
            .with_context(|| format!("running {} -jar {}", self.java, self.jar.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "tabula exited with {} on {}: {}",
                output.status,
                document.display(),
                stderr.trim()
            );
        }
        let tables = parse_tabula_json(&output.stdout)
            .with_context(|| format!("reading tabula output for {}", document.display()))?;
        debug!(tables = tables.len(), "extracted tables");
        Ok(tables)
    }
}

#[derive(Deserialize)]
struct TabulaTable {
    #[serde(default)]
    data: Vec<Vec<TabulaCell>>,
}

#[derive(Deserialize)]
struct TabulaCell {
    #[serde(default)]
    text: String,
}

/// Parse tabula's `--format JSON` output: an array of tables, each with a
/// `data` array of rows of `{ "text": ... }` cells.
pub fn parse_tabula_json(raw: &[u8]) -> Result<RawTableSet> {
    let tables: Vec<TabulaTable> = serde_json::from_slice(raw)?;
    Ok(tables
        .into_iter()
        .map(|t| {
            RawTable::new(
                t.data
                    .into_iter()
                    .map(|row| row.into_iter().map(|c| c.text.trim().to_string()).collect())
                    .collect(),
            )
        })
        .collect())
}
