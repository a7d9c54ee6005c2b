//! Login capability for the attendance site
//!
//! `FormLogin` drives the site's id/password form. Failures are returned as
//! `LoginError` and never retried here; the caller decides whether the whole
//! action attempt is retried with a fresh session.

use crate::infra::config::{Config, FormLayout};
use crate::io::automation::{AutomationError, ElementQuery, Page};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("login form not found: {0}")]
    FormNotFound(AutomationError),
    #[error("login was not accepted: {0}")]
    Rejected(AutomationError),
    #[error("login page unreachable: {0}")]
    Navigation(AutomationError),
    #[error("credentials are not configured")]
    MissingCredentials,
}

/// Authenticates a freshly opened session and leaves it on the target page
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, page: &dyn Page) -> Result<(), LoginError>;
}

/// Credential form login
pub struct FormLogin {
    url: String,
    username: String,
    password: String,
    form: FormLayout,
    timeout: Duration,
}

impl FormLogin {
    pub fn new(config: &Config) -> Self {
        Self {
            url: config.site_url().to_string(),
            username: config.site_username().to_string(),
            password: config.site_password().to_string(),
            form: config.form().clone(),
            timeout: config.webdriver_timeout(),
        }
    }
}

#[async_trait]
impl Authenticator for FormLogin {
    async fn login(&self, page: &dyn Page) -> Result<(), LoginError> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(LoginError::MissingCredentials);
        }

        info!(url = %self.url, "login_navigate");
        page.goto(&self.url).await.map_err(LoginError::Navigation)?;

        let id_field = ElementQuery::Css(self.form.login_id_selector.clone());
        let password_field = ElementQuery::Css(self.form.login_password_selector.clone());
        page.wait_for(&id_field, self.timeout).await.map_err(LoginError::FormNotFound)?;
        page.wait_for(&password_field, self.timeout).await.map_err(LoginError::FormNotFound)?;

        let id_input = page
            .wait_for(&ElementQuery::Css(self.form.login_id_input.clone()), self.timeout)
            .await
            .map_err(LoginError::FormNotFound)?;
        let password_input = page
            .wait_for(&ElementQuery::Css(self.form.login_password_input.clone()), self.timeout)
            .await
            .map_err(LoginError::FormNotFound)?;
        page.type_text(&id_input, &self.username).await.map_err(LoginError::FormNotFound)?;
        page.type_text(&password_input, &self.password).await.map_err(LoginError::FormNotFound)?;

        let submit = page
            .wait_for(&ElementQuery::Css(self.form.login_submit.clone()), self.timeout)
            .await
            .map_err(LoginError::FormNotFound)?;
        page.click(&submit).await.map_err(LoginError::Rejected)?;

        // Accepted once the password field is gone
        page.wait_gone(&password_field, self.timeout).await.map_err(LoginError::Rejected)?;

        info!("login_succeeded");
        Ok(())
    }
}

/// Login that always succeeds or always fails, for tests
#[cfg(test)]
#[derive(Clone, Default)]
pub struct FakeAuthenticator {
    pub fail: bool,
    calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

#[cfg(test)]
impl FakeAuthenticator {
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn login(&self, _page: &dyn Page) -> Result<(), LoginError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail {
            Err(LoginError::Rejected(AutomationError::Timeout {
                timeout_ms: 8000,
                what: "navigation".to_string(),
            }))
        } else {
            Ok(())
        }
    }
}
