//! Action executor: drives the remote attendance form
//!
//! Every attempt opens a fresh browser session and logs in, then:
//! 1. locates the control through the locate chain, falling back to a
//!    disabled-control analysis when nothing is found
//! 2. re-reads the control state (disabled means already done)
//! 3. activates it through the activation chain
//! 4. waits, then reads the registered time through the extraction chain
//!
//! Steps 1-3 fail with `ActionError` and the whole attempt is retried by the
//! `RetryPolicy`. Step 4 never fails. The final error is turned into
//! `ActionOutcome::Failed` here and nowhere else.

pub mod strategies;


use crate::domain::types::{Action, ActionOutcome, AttendanceTimes, PageElement};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::automation::{AutomationError, Browser, ElementQuery, ElementRef, Page};
use crate::io::login::{Authenticator, LoginError};
use crate::services::retry::RetryPolicy;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use strategies::{ActivateStrategy, ExtractStrategy, LocateStrategy, BUTTON_LIKE};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Transient failures of a single attempt
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("control not found")]
    ControlNotFound,
    #[error("not interactable")]
    NotInteractable,
    #[error("all activation methods failed")]
    ActivationFailed,
    #[error("{0}")]
    Automation(#[from] AutomationError),
    #[error("{0}")]
    Login(#[from] LoginError),
}

/// What the state machine needs from the remote system
#[async_trait]
pub trait AttendanceActions: Send + Sync {
    /// Perform `action` with retries; never fails, the outcome says how it went
    async fn perform(&self, action: Action) -> ActionOutcome;

    /// Fresh read of the registered times
    async fn actual_times(&self) -> Result<AttendanceTimes, ActionError>;

    /// Attendance controls and time fields currently on the page
    async fn page_elements(&self) -> Result<Vec<PageElement>, ActionError>;
}

enum Located {
    Control(ElementRef),
    AlreadyDone,
}

pub struct ActionExecutor {
    browser: Arc<dyn Browser>,
    login: Arc<dyn Authenticator>,
    retry: RetryPolicy,
    labels: (String, String),
    time_class: String,
    page_settle: Duration,
    post_action_settle: Duration,
    locators: Vec<Box<dyn LocateStrategy>>,
    activators: Vec<Box<dyn ActivateStrategy>>,
    extractors: Vec<Box<dyn ExtractStrategy>>,
    metrics: Arc<Metrics>,
}

impl ActionExecutor {
    pub fn new(
        config: &Config,
        browser: Arc<dyn Browser>,
        login: Arc<dyn Authenticator>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let form = config.form();
        Self {
            browser,
            login,
            retry: RetryPolicy::new(config.retry_attempts(), config.retry_delay()),
            labels: (form.check_in_label.clone(), form.check_out_label.clone()),
            time_class: form.time_class.clone(),
            page_settle: Duration::from_millis(form.page_settle_ms),
            post_action_settle: Duration::from_millis(form.post_action_settle_ms),
            locators: strategies::locate_chain(form),
            activators: strategies::activate_chain(form),
            extractors: strategies::extract_chain(form),
            metrics,
        }
    }

    fn label(&self, action: Action) -> &str {
        match action {
            Action::CheckIn => &self.labels.0,
            Action::CheckOut => &self.labels.1,
        }
    }

    /// One attempt in its own session; the session is always closed
    async fn attempt(&self, action: Action, run_id: Uuid, attempt: u32) -> Result<ActionOutcome, ActionError> {
        self.metrics.record_action_attempt();
        debug!(action = %action, run_id = %run_id, attempt = %attempt, "action_attempt");

        let page = self.browser.open_session().await?;
        let result = self.drive(page.as_ref(), action, run_id).await;
        if let Err(e) = page.close().await {
            warn!(run_id = %run_id, error = %e, "session_close_failed");
        }
        result
    }

    async fn drive(&self, page: &dyn Page, action: Action, run_id: Uuid) -> Result<ActionOutcome, ActionError> {
        self.login.login(page).await?;
        tokio::time::sleep(self.page_settle).await;

        let control = match self.locate(page, action, run_id).await? {
            Located::Control(control) => control,
            Located::AlreadyDone => return Ok(ActionOutcome::AlreadyDone),
        };

        let state = page.inspect(&control).await?;
        if state.disabled {
            info!(action = %action, run_id = %run_id, text = %state.text, "control_disabled");
            return Ok(ActionOutcome::AlreadyDone);
        }
        if !state.visible {
            return Err(ActionError::NotInteractable);
        }

        self.activate(page, &control, run_id).await?;
        tokio::time::sleep(self.post_action_settle).await;

        let mut times = AttendanceTimes::default();
        match self.extract(page, action).await {
            Some(time) => {
                info!(action = %action, run_id = %run_id, time = %time, "action_time_registered");
                times.set(action, time);
            }
            None => warn!(action = %action, run_id = %run_id, "action_time_unavailable"),
        }
        Ok(ActionOutcome::Success(times))
    }

    async fn locate(&self, page: &dyn Page, action: Action, run_id: Uuid) -> Result<Located, ActionError> {
        for strategy in &self.locators {
            match strategy.try_locate(page, action).await {
                Ok(Some(control)) => {
                    debug!(action = %action, run_id = %run_id, strategy = strategy.name(), "control_located");
                    return Ok(Located::Control(control));
                }
                Ok(None) => {}
                Err(e) => debug!(strategy = strategy.name(), error = %e, "locate_strategy_failed"),
            }
        }

        // The site renders a completed action as a disabled control
        let query = ElementQuery::Text {
            scope: BUTTON_LIKE.to_string(),
            text: self.label(action).to_string(),
            enabled_only: false,
        };
        let candidates = page.find_all(&query).await?;
        for candidate in &candidates {
            let state = page.inspect(candidate).await?;
            if state.visible && state.disabled {
                info!(action = %action, run_id = %run_id, text = %state.text, "disabled_control_found");
                return Ok(Located::AlreadyDone);
            }
        }
        warn!(action = %action, run_id = %run_id, candidates = candidates.len(), "control_not_found");
        Err(ActionError::ControlNotFound)
    }

    async fn activate(&self, page: &dyn Page, control: &ElementRef, run_id: Uuid) -> Result<(), ActionError> {
        for strategy in &self.activators {
            match strategy.try_activate(page, control).await {
                Ok(()) => {
                    info!(run_id = %run_id, strategy = strategy.name(), "control_activated");
                    return Ok(());
                }
                Err(e) => warn!(run_id = %run_id, strategy = strategy.name(), error = %e, "activation_failed"),
            }
        }
        Err(ActionError::ActivationFailed)
    }

    async fn extract(&self, page: &dyn Page, action: Action) -> Option<String> {
        for strategy in &self.extractors {
            match strategy.try_extract(page, action).await {
                Ok(Some(time)) => return Some(time),
                Ok(None) => {}
                Err(e) => debug!(strategy = strategy.name(), error = %e, "extract_strategy_failed"),
            }
        }
        None
    }

    async fn read_times(&self) -> Result<AttendanceTimes, ActionError> {
        let page = self.browser.open_session().await?;
        let result: Result<AttendanceTimes, ActionError> = async {
            self.login.login(page.as_ref()).await?;
            tokio::time::sleep(self.page_settle).await;
            Ok(AttendanceTimes {
                check_in: self.extract(page.as_ref(), Action::CheckIn).await,
                check_out: self.extract(page.as_ref(), Action::CheckOut).await,
            })
        }
        .await;
        if let Err(e) = page.close().await {
            warn!(error = %e, "session_close_failed");
        }
        result
    }

    /// Button-like elements mentioning either label, then every time field
    async fn collect_elements(&self, page: &dyn Page) -> Result<Vec<PageElement>, ActionError> {
        let mut elements = Vec::new();
        for control in page.find_all(&ElementQuery::Css(BUTTON_LIKE.to_string())).await? {
            let state = page.inspect(&control).await?;
            if state.text.contains(self.labels.0.as_str()) || state.text.contains(self.labels.1.as_str()) {
                elements.push(PageElement {
                    kind: "control",
                    text: state.text,
                    disabled: state.disabled,
                    visible: state.visible,
                });
            }
        }
        for field in page.find_all(&ElementQuery::Css(format!(".{}", self.time_class))).await? {
            let state = page.inspect(&field).await?;
            elements.push(PageElement { kind: "time", text: state.text, disabled: state.disabled, visible: state.visible });
        }
        Ok(elements)
    }

    async fn read_elements(&self) -> Result<Vec<PageElement>, ActionError> {
        let page = self.browser.open_session().await?;
        let result: Result<Vec<PageElement>, ActionError> = async {
            self.login.login(page.as_ref()).await?;
            tokio::time::sleep(self.page_settle).await;
            self.collect_elements(page.as_ref()).await
        }
        .await;
        if let Err(e) = page.close().await {
            warn!(error = %e, "session_close_failed");
        }
        if let Ok(elements) = &result {
            info!(count = elements.len(), "page_elements_read");
        }
        result
    }
}

#[async_trait]
impl AttendanceActions for ActionExecutor {
    async fn perform(&self, action: Action) -> ActionOutcome {
        let run_id = Uuid::now_v7();
        info!(action = %action, run_id = %run_id, "action_started");

        let outcome = match self
            .retry
            .run(action.as_str(), move |attempt| self.attempt(action, run_id, attempt))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => ActionOutcome::Failed(e.to_string()),
        };

        self.metrics.record_outcome(action, &outcome);
        info!(action = %action, run_id = %run_id, outcome = outcome.as_str(), "action_finished");
        outcome
    }

    async fn actual_times(&self) -> Result<AttendanceTimes, ActionError> {
        self.retry.run("actual_times", move |_| self.read_times()).await
    }

    async fn page_elements(&self) -> Result<Vec<PageElement>, ActionError> {
        self.read_elements().await
    }
}
