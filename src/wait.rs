// src/wait.rs

use anyhow::Result;
use std::{
    future::Future,
    path::Path,
    time::{Duration, Instant},
};
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::browser::{Locator, Session};

/// Exponential backoff with a hard ceiling on total time spent waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Backoff {
    /// Delay before poll number `poll + 1` (0-based), capped at `max_delay`.
    pub fn delay(&self, poll: u32) -> Duration {
        let factor = 2u32.saturating_pow(poll);
        self.initial.saturating_mul(factor).min(self.max_delay)
    }
}

/// Result of a bounded wait. Absence is a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    Found(T),
    TimedOut { waited: Duration, polls: u32 },
}

impl<T> WaitOutcome<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, WaitOutcome::Found(_))
    }
}

/// Polls a probe until it yields a value or the backoff ceiling is hit.
#[derive(Debug, Clone, Copy)]
pub struct ElementWaiter {
    backoff: Backoff,
}

impl ElementWaiter {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }

    pub fn with_backoff(self, backoff: Backoff) -> Self {
        Self { backoff }
    }

    /// Poll `probe` until it returns `Some`. Probe errors count as "not yet"
    /// until the deadline; if the last poll before the deadline errored, that
    /// error is returned instead of `TimedOut`.
    pub async fn until<T, F, Fut>(&self, what: &str, mut probe: F) -> Result<WaitOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let start = Instant::now();
        let mut polls = 0u32;
        loop {
            let last_err = match probe().await {
                Ok(Some(v)) => {
                    trace!(what, polls, elapsed = ?start.elapsed(), "condition met");
                    return Ok(WaitOutcome::Found(v));
                }
                Ok(None) => None,
                Err(e) => {
                    debug!(what, polls, error = %e, "probe failed; will retry");
                    Some(e)
                }
            };

            let elapsed = start.elapsed();
            if elapsed >= self.backoff.timeout {
                if let Some(e) = last_err {
                    return Err(e.context(format!("waiting for {what}")));
                }
                debug!(what, polls, waited = ?elapsed, "gave up waiting");
                return Ok(WaitOutcome::TimedOut {
                    waited: elapsed,
                    polls: polls + 1,
                });
            }

            let remaining = self.backoff.timeout - elapsed;
            sleep(self.backoff.delay(polls).min(remaining)).await;
            polls += 1;
        }
    }

    /// Wait until `locator` matches at least one element.
    pub async fn element<S: Session + ?Sized>(
        &self,
        session: &S,
        locator: &Locator,
    ) -> Result<WaitOutcome<()>> {
        let what = locator.to_string();
        self.until(&what, move || async move {
            Ok((session.count(locator).await? > 0).then_some(()))
        })
        .await
    }

    /// Wait until `locator` matches an element with non-blank text.
    pub async fn text<S: Session + ?Sized>(
        &self,
        session: &S,
        locator: &Locator,
    ) -> Result<WaitOutcome<String>> {
        let what = locator.to_string();
        self.until(&what, move || async move {
            Ok(session
                .text(locator)
                .await?
                .filter(|t| !t.trim().is_empty()))
        })
        .await
    }

    /// Wait until `path` exists and is non-empty. Browsers write to a
    /// temporary name and rename on completion, so a present file is whole.
    pub async fn file(&self, path: &Path) -> Result<WaitOutcome<u64>> {
        let what = path.display().to_string();
        self.until(&what, move || async move {
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(Some(meta.len())),
                Ok(_) => Ok(None),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}
