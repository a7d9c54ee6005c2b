//! Browser automation capability
//!
//! The executor only ever talks to a `Page` obtained from a `Browser`. Each
//! action attempt opens its own isolated session and closes it afterwards.
//! `webdriver` implements both traits against a W3C WebDriver endpoint.

#[cfg(test)]
pub mod fake;
pub mod webdriver;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use webdriver::WebDriverBrowser;

/// Poll period for `wait_for` / `wait_gone`
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors from browser sessions and element operations
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { timeout_ms: u64, what: String },
    #[error("stale element: {0}")]
    StaleElement(String),
    #[error("webdriver {error}: {message}")]
    Protocol { error: String, message: String },
    #[error("unexpected webdriver response: {0}")]
    InvalidResponse(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// How to locate elements on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementQuery {
    /// Plain CSS selector
    Css(String),
    /// Elements matching `scope` whose trimmed text contains `text`
    Text { scope: String, text: String, enabled_only: bool },
    /// The `index`-th element matching `scope`, if it exists
    Nth { scope: String, index: usize },
    /// Any clickable-looking element whose text contains `text`
    Clickable { text: String, enabled_only: bool },
    /// `target` elements inside the nearest `containers` ancestor of a leaf
    /// element whose text contains `anchor`
    Near { anchor: String, containers: Vec<String>, target: String },
}

impl std::fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementQuery::Css(selector) => write!(f, "css({selector})"),
            ElementQuery::Text { scope, text, .. } => write!(f, "text({scope} ~ {text})"),
            ElementQuery::Nth { scope, index } => write!(f, "nth({scope}[{index}])"),
            ElementQuery::Clickable { text, .. } => write!(f, "clickable(~ {text})"),
            ElementQuery::Near { anchor, target, .. } => write!(f, "near({anchor} -> {target})"),
        }
    }
}

/// Opaque handle to an element within one session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

/// Attributes read from an element just before acting on it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementState {
    pub text: String,
    /// `disabled` property set, or a `disabled` class present
    pub disabled: bool,
    /// Rendered with a non-zero box
    pub visible: bool,
}

/// One isolated browser session
#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), AutomationError>;

    async fn find_all(&self, query: &ElementQuery) -> Result<Vec<ElementRef>, AutomationError>;

    async fn inspect(&self, element: &ElementRef) -> Result<ElementState, AutomationError>;

    /// Native click through the driver
    async fn click(&self, element: &ElementRef) -> Result<(), AutomationError>;

    /// `element.click()` executed inside the page
    async fn script_click(&self, element: &ElementRef) -> Result<(), AutomationError>;

    async fn hover(&self, element: &ElementRef) -> Result<(), AutomationError>;

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), AutomationError>;

    async fn close(&self) -> Result<(), AutomationError>;

    /// Poll until `query` matches at least one element
    async fn wait_for(
        &self,
        query: &ElementQuery,
        timeout: Duration,
    ) -> Result<ElementRef, AutomationError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(element) = self.find_all(query).await?.into_iter().next() {
                return Ok(element);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AutomationError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                    what: query.to_string(),
                });
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Poll until `query` no longer matches anything
    async fn wait_gone(&self, query: &ElementQuery, timeout: Duration) -> Result<(), AutomationError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.find_all(query).await?.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AutomationError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                    what: format!("{query} to disappear"),
                });
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

/// Opens fresh, isolated sessions
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn Page>, AutomationError>;
}
