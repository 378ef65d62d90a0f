//! Remote browser session abstraction.
//!
//! Every pipeline stage talks to the registry through [`Session`], so the
//! stages can be driven by Chromium in production and by an in-memory fake
//! registry in tests.

pub mod chromium;
#[cfg(test)]
pub(crate) mod fake;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// How an element is found on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    /// Anchor whose whitespace-normalized text equals the value.
    LinkText(String),
    /// Anchor whose whitespace-normalized text contains the value.
    PartialLinkText(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn link_text(text: impl Into<String>) -> Self {
        Locator::LinkText(text.into())
    }

    pub fn partial_link_text(text: impl Into<String>) -> Self {
        Locator::PartialLinkText(text.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css `{s}`"),
            Locator::LinkText(t) => write!(f, "link `{t}`"),
            Locator::PartialLinkText(t) => write!(f, "link containing `{t}`"),
        }
    }
}

/// One interactive page session. Implementations own the remote page; the
/// pipeline holds the only handle for the duration of a run.
#[async_trait]
pub trait Session: Send + Sync {
    /// Load `url` and wait for the load to finish.
    async fn goto(&mut self, url: &str) -> Result<()>;
    /// Go back one history entry and wait for the load to finish.
    async fn back(&mut self) -> Result<()>;
    /// Serialized DOM of the current page.
    async fn html(&self) -> Result<String>;
    /// Number of elements currently matching `locator`.
    async fn count(&self, locator: &Locator) -> Result<usize>;
    /// Rendered text of the first match, `None` when nothing matches.
    async fn text(&self, locator: &Locator) -> Result<Option<String>>;
    /// Click the first match without waiting for any navigation.
    async fn click(&mut self, locator: &Locator) -> Result<()>;
    /// Click the first match and wait for the page load it triggers.
    async fn click_and_wait(&mut self, locator: &Locator) -> Result<()>;
    /// Replace the value of an input or `<select>` and fire change events.
    async fn set_value(&mut self, locator: &Locator, value: &str) -> Result<()>;
}
