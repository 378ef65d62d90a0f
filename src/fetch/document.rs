// src/fetch/document.rs

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::browser::Session;
use crate::config::Config;
use crate::error::RecordFailure;
use crate::site::{self, DOWNLOAD_PDF_BUTTON, LICENCE_NAME_FIELD, SEARCH_BUTTON};
use crate::wait::{ElementWaiter, WaitOutcome};

/// Downloads licence certificates through the virtual licence search page.
#[derive(Debug, Clone)]
pub struct DetailDocumentRetriever {
    search_url: String,
    download_dir: PathBuf,
    elements: ElementWaiter,
    button: ElementWaiter,
    file: ElementWaiter,
    max_attempts: u32,
}

impl DetailDocumentRetriever {
    pub fn new(cfg: &Config) -> Self {
        Self {
            search_url: cfg.document_url.to_string(),
            download_dir: cfg.download_dir.clone(),
            elements: ElementWaiter::new(cfg.waits.element()),
            button: ElementWaiter::new(cfg.waits.detail()),
            file: ElementWaiter::new(cfg.waits.document()),
            max_attempts: cfg.waits.max_attempts.max(1),
        }
    }

    pub fn document_path(&self, authorization_number: &str) -> PathBuf {
        site::document_path(&self.download_dir, authorization_number)
    }

    /// Load the search page and wait for its licence-name field.
    pub async fn open<S: Session + ?Sized>(&self, session: &mut S) -> Result<()> {
        session.goto(&self.search_url).await?;
        match self.elements.element(&*session, &LICENCE_NAME_FIELD).await? {
            WaitOutcome::Found(()) => Ok(()),
            WaitOutcome::TimedOut { waited, .. } => {
                anyhow::bail!("licence search page showed no {} after {waited:?}", *LICENCE_NAME_FIELD)
            }
        }
    }

    /// Fetch the certificate for `authorization_number`, retrying transient
    /// failures. Returns the path of the downloaded file.
    #[instrument(level = "info", skip(self, session))]
    pub async fn retrieve<S: Session + ?Sized>(
        &self,
        session: &mut S,
        authorization_number: &str,
    ) -> Result<PathBuf, RecordFailure> {
        let path = self.document_path(authorization_number);
        remove_stale(&path).map_err(|e| RecordFailure::session(&e))?;

        let mut attempt = 1;
        loop {
            match self.attempt(session, authorization_number, &path).await {
                Ok(size) => {
                    info!(auth = authorization_number, bytes = size, "document retrieved");
                    return Ok(path);
                }
                Err(failure) if failure.is_transient() && attempt < self.max_attempts => {
                    warn!(auth = authorization_number, attempt, %failure, "document not retrieved; retrying");
                    attempt += 1;
                    if let Err(e) = self.open(session).await {
                        return Err(RecordFailure::session(&e));
                    }
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    async fn attempt<S: Session + ?Sized>(
        &self,
        session: &mut S,
        authorization_number: &str,
        path: &Path,
    ) -> Result<u64, RecordFailure> {
        let fail = |e: anyhow::Error| RecordFailure::session(&e);

        session
            .set_value(&LICENCE_NAME_FIELD, authorization_number)
            .await
            .map_err(fail)?;
        session.click_and_wait(&SEARCH_BUTTON).await.map_err(fail)?;

        if let WaitOutcome::TimedOut { waited, polls } =
            self.button.element(&*session, &DOWNLOAD_PDF_BUTTON).await.map_err(fail)?
        {
            debug!(polls, "download button never appeared");
            // Leave the result view so the next attempt starts from the form.
            session.back().await.map_err(fail)?;
            return Err(RecordFailure::unavailable(
                format!("download button for {authorization_number}"),
                waited,
                polls,
            ));
        }
        session.click(&DOWNLOAD_PDF_BUTTON).await.map_err(fail)?;

        session.back().await.map_err(fail)?;
        match self
            .elements
            .element(&*session, &LICENCE_NAME_FIELD)
            .await
            .map_err(fail)?
        {
            WaitOutcome::Found(()) => {
                session.set_value(&LICENCE_NAME_FIELD, "").await.map_err(fail)?;
            }
            WaitOutcome::TimedOut { .. } => {
                warn!(auth = authorization_number, "search form did not return; reloading");
                self.open(session).await.map_err(fail)?;
            }
        }

        match self.file.file(path).await.map_err(fail)? {
            WaitOutcome::Found(size) => Ok(size),
            WaitOutcome::TimedOut { waited, polls } => Err(RecordFailure::unavailable(
                path.display(),
                waited,
                polls,
            )),
        }
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale document");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing stale {}", path.display())),
    }
}

/// Delete a parsed document.
pub fn discard(path: &Path) -> Result<()> {
    std::fs::remove_file(path).with_context(|| format!("deleting {}", path.display()))
}

/// Remove Chromium's partial downloads (`*.crdownload`) from `dir`.
pub fn cleanup_partial_downloads(dir: &Path) -> Result<usize> {
    let pattern = dir.join("*.crdownload");
    let pattern = pattern
        .to_str()
        .context("download directory is not valid UTF-8")?;
    let mut removed = 0;
    for entry in glob::glob(pattern).context("bad partial-download pattern")? {
        let path = entry?;
        std::fs::remove_file(&path)
            .with_context(|| format!("deleting partial download {}", path.display()))?;
        removed += 1;
    }
    if removed > 0 {
        info!(removed, dir = %dir.display(), "removed partial downloads");
    }
    Ok(removed)
}
