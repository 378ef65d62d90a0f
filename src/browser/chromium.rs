//! Chromium-backed [`Session`] using chromiumoxide.

use super::{Locator, Session};
use crate::config::BrowserConfig;
use crate::wait::{Backoff, ElementWaiter};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Stamped on the current document right before a navigating action. A
/// different (or missing) stamp means another document is showing, even when
/// the back/forward cache restores an earlier one.
const GENERATION_MARKER: &str = "window.__spectrumscraperGeneration";

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    navigation: ElementWaiter,
    generation: u64,
}

impl ChromiumSession {
    /// Launch Chromium with downloads (PDFs included) routed to `download_dir`.
    pub async fn launch(cfg: &BrowserConfig, download_dir: &Path, navigation: Backoff) -> Result<Self> {
        let download_dir = absolute_dir(download_dir)?;
        let profile_dir = download_dir.join(".chromium-profile");
        write_profile_prefs(&profile_dir, &download_dir)?;

        let mut builder = LaunchConfig::builder()
            .user_data_dir(&profile_dir)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if let Some(exe) = &cfg.executable {
            builder = builder.chrome_executable(exe);
        }
        if cfg.headful {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().into_owned())
            .build()
            .map_err(|e| anyhow!("building download behaviour: {e}"))?;
        browser
            .execute(params)
            .await
            .context("enabling downloads")?;

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        info!(download_dir = %download_dir.display(), "chromium session ready");
        Ok(Self {
            browser,
            page,
            handler,
            navigation: ElementWaiter::new(navigation),
            generation: 0,
        })
    }

    pub async fn close(mut self) -> Result<()> {
        if let Err(e) = self.page.clone().close().await {
            debug!(error = %e, "closing page");
        }
        self.browser.close().await.context("closing Chromium")?;
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "waiting for Chromium to exit");
        }
        self.handler.abort();
        Ok(())
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T> {
        self.page
            .evaluate(script)
            .await
            .context("JS execution failed")?
            .into_value()
            .map_err(|e| anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn find(&self, locator: &Locator) -> Result<Element> {
        let found = match locator {
            Locator::Css(sel) => self.page.find_element(sel.as_str()).await,
            Locator::LinkText(_) | Locator::PartialLinkText(_) => {
                self.page.find_xpath(link_xpath(locator)).await
            }
        };
        found.with_context(|| format!("no element matches {locator}"))
    }

    async fn mark_stale(&mut self) -> Result<u64> {
        self.generation += 1;
        self.page
            .evaluate(format!("{GENERATION_MARKER} = {}", self.generation))
            .await
            .context("marking current document")?;
        Ok(self.generation)
    }

    /// Wait until the document stamped with `generation` has been replaced
    /// and the new one has finished loading.
    async fn await_replacement(&self, what: &str, generation: u64) -> Result<()> {
        let replaced = self
            .navigation
            .until(what, move || async move {
                let stale: bool = self
                    .eval(format!("{GENERATION_MARKER} === {generation}"))
                    .await?;
                Ok((!stale).then_some(()))
            })
            .await?;
        if !replaced.is_found() {
            bail!("page did not change after {what}");
        }
        self.page
            .wait_for_navigation()
            .await
            .context("waiting for page load")?;
        Ok(())
    }
}

#[async_trait]
impl Session for ChromiumSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        debug!(url, "goto");
        self.page
            .goto(url)
            .await
            .with_context(|| format!("navigating to {url}"))?;
        self.page
            .wait_for_navigation()
            .await
            .context("waiting for page load")?;
        Ok(())
    }

    async fn back(&mut self) -> Result<()> {
        let generation = self.mark_stale().await?;
        self.page
            .evaluate("history.back()")
            .await
            .context("history.back()")?;
        self.await_replacement("history.back()", generation).await
    }

    async fn html(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        let script = match locator {
            Locator::Css(sel) => format!("document.querySelectorAll({}).length", js_str(sel)),
            _ => format!(
                "document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotLength",
                js_str(&link_xpath(locator))
            ),
        };
        self.eval(script).await
    }

    async fn text(&self, locator: &Locator) -> Result<Option<String>> {
        #[derive(Deserialize)]
        struct Probe {
            found: bool,
            text: String,
        }
        let script = format!(
            "(() => {{ const el = {}; return el ? {{ found: true, text: el.innerText || el.textContent || '' }} : {{ found: false, text: '' }}; }})()",
            resolve_js(locator)
        );
        let probe: Probe = self.eval(script).await?;
        Ok(probe.found.then_some(probe.text))
    }

    async fn click(&mut self, locator: &Locator) -> Result<()> {
        debug!(%locator, "click");
        self.find(locator)
            .await?
            .click()
            .await
            .with_context(|| format!("clicking {locator}"))?;
        Ok(())
    }

    async fn click_and_wait(&mut self, locator: &Locator) -> Result<()> {
        debug!(%locator, "click and wait");
        let element = self.find(locator).await?;
        let generation = self.mark_stale().await?;
        element
            .click()
            .await
            .with_context(|| format!("clicking {locator}"))?;
        self.await_replacement(&format!("clicking {locator}"), generation)
            .await
    }

    async fn set_value(&mut self, locator: &Locator, value: &str) -> Result<()> {
        let script = format!(
            "(() => {{ const el = {}; if (!el) return false; el.focus(); el.value = {}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
            resolve_js(locator),
            js_str(value)
        );
        let done: bool = self.eval(script).await?;
        if !done {
            bail!("no element matches {locator}");
        }
        Ok(())
    }
}

/// JS expression evaluating to the first element matching `locator`, or null.
fn resolve_js(locator: &Locator) -> String {
    match locator {
        Locator::Css(sel) => format!("document.querySelector({})", js_str(sel)),
        _ => format!(
            "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            js_str(&link_xpath(locator))
        ),
    }
}

fn link_xpath(locator: &Locator) -> String {
    match locator {
        Locator::LinkText(t) => format!("//a[normalize-space(.)={}]", xpath_literal(t)),
        Locator::PartialLinkText(t) => {
            format!("//a[contains(normalize-space(.), {})]", xpath_literal(t))
        }
        Locator::Css(sel) => sel.clone(),
    }
}

fn js_str(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

fn absolute_dir(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating download directory {}", dir.display()))?;
    dir.canonicalize()
        .with_context(|| format!("resolving download directory {}", dir.display()))
}

/// Profile preferences so PDFs are saved rather than opened in the viewer
/// when running with a visible window.
fn write_profile_prefs(profile_dir: &Path, download_dir: &Path) -> Result<()> {
    let default_dir = profile_dir.join("Default");
    std::fs::create_dir_all(&default_dir)
        .with_context(|| format!("creating profile {}", default_dir.display()))?;
    let prefs = serde_json::json!({
        "plugins": { "always_open_pdf_externally": true },
        "download": {
            "default_directory": download_dir,
            "prompt_for_download": false,
        },
    });
    std::fs::write(default_dir.join("Preferences"), prefs.to_string())
        .context("writing profile preferences")?;
    Ok(())
}
