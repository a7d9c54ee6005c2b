//! Ordered fallback chains used by the executor
//!
//! Each strategy is independent: it either produces a result or declines
//! (`Ok(None)` / an error), and the executor moves on to the next one.

use crate::domain::types::Action;
use crate::infra::config::FormLayout;
use crate::io::automation::{AutomationError, ElementQuery, ElementRef, Page};
use async_trait::async_trait;
use std::time::Duration;

/// Elements that look like buttons to a user
pub const BUTTON_LIKE: &str = r#"button, .btn, [role="button"]"#;

/// Short label shown on the action's control ("출근" / "퇴근")
pub fn label(form: &FormLayout, action: Action) -> &str {
    match action {
        Action::CheckIn => &form.check_in_label,
        Action::CheckOut => &form.check_out_label,
    }
}

fn exact_label(form: &FormLayout, action: Action) -> &str {
    match action {
        Action::CheckIn => &form.check_in_exact_label,
        Action::CheckOut => &form.check_out_exact_label,
    }
}

/// Index of the action among same-class controls and time fields
fn position(action: Action) -> usize {
    match action {
        Action::CheckIn => 0,
        Action::CheckOut => 1,
    }
}

#[async_trait]
pub trait LocateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn try_locate(&self, page: &dyn Page, action: Action) -> Result<Option<ElementRef>, AutomationError>;
}

#[async_trait]
pub trait ActivateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn try_activate(&self, page: &dyn Page, control: &ElementRef) -> Result<(), AutomationError>;
}

#[async_trait]
pub trait ExtractStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn try_extract(&self, page: &dyn Page, action: Action) -> Result<Option<String>, AutomationError>;
}

async fn first(page: &dyn Page, query: ElementQuery) -> Result<Option<ElementRef>, AutomationError> {
    Ok(page.find_all(&query).await?.into_iter().next())
}

/// Button with the action class whose text carries the label
pub struct ClassText {
    form: FormLayout,
}

#[async_trait]
impl LocateStrategy for ClassText {
    fn name(&self) -> &'static str {
        "class_text"
    }

    async fn try_locate(&self, page: &dyn Page, action: Action) -> Result<Option<ElementRef>, AutomationError> {
        let query = ElementQuery::Text {
            scope: format!("button.{}", self.form.button_class),
            text: label(&self.form, action).to_string(),
            enabled_only: false,
        };
        first(page, query).await
    }
}

/// Enabled button-like element with the full label
pub struct ExactLabel {
    form: FormLayout,
}

#[async_trait]
impl LocateStrategy for ExactLabel {
    fn name(&self) -> &'static str {
        "exact_label"
    }

    async fn try_locate(&self, page: &dyn Page, action: Action) -> Result<Option<ElementRef>, AutomationError> {
        let query = ElementQuery::Text {
            scope: BUTTON_LIKE.to_string(),
            text: exact_label(&self.form, action).to_string(),
            enabled_only: true,
        };
        first(page, query).await
    }
}

/// Check-in is the first action control, check-out the second
pub struct Positional {
    form: FormLayout,
}

#[async_trait]
impl LocateStrategy for Positional {
    fn name(&self) -> &'static str {
        "positional"
    }

    async fn try_locate(&self, page: &dyn Page, action: Action) -> Result<Option<ElementRef>, AutomationError> {
        let query = ElementQuery::Nth { scope: format!(".{}", self.form.button_class), index: position(action) };
        let Some(control) = first(page, query).await? else {
            return Ok(None);
        };
        // Only trust the position if the text agrees
        let state = page.inspect(&control).await?;
        Ok(state.text.contains(label(&self.form, action)).then_some(control))
    }
}

/// Per-action class used by older page renders
pub struct LegacyClass {
    form: FormLayout,
}

#[async_trait]
impl LocateStrategy for LegacyClass {
    fn name(&self) -> &'static str {
        "legacy_class"
    }

    async fn try_locate(&self, page: &dyn Page, action: Action) -> Result<Option<ElementRef>, AutomationError> {
        let class = match action {
            Action::CheckIn => &self.form.legacy_check_in_class,
            Action::CheckOut => &self.form.legacy_check_out_class,
        };
        first(page, ElementQuery::Css(format!(".{class}:not(.disabled)"))).await
    }
}

/// Any enabled clickable element mentioning the label
pub struct AnyClickable {
    form: FormLayout,
}

#[async_trait]
impl LocateStrategy for AnyClickable {
    fn name(&self) -> &'static str {
        "any_clickable"
    }

    async fn try_locate(&self, page: &dyn Page, action: Action) -> Result<Option<ElementRef>, AutomationError> {
        let query = ElementQuery::Clickable { text: label(&self.form, action).to_string(), enabled_only: true };
        first(page, query).await
    }
}

pub fn locate_chain(form: &FormLayout) -> Vec<Box<dyn LocateStrategy>> {
    vec![
        Box::new(ClassText { form: form.clone() }),
        Box::new(ExactLabel { form: form.clone() }),
        Box::new(Positional { form: form.clone() }),
        Box::new(LegacyClass { form: form.clone() }),
        Box::new(AnyClickable { form: form.clone() }),
    ]
}

pub struct DirectClick;

#[async_trait]
impl ActivateStrategy for DirectClick {
    fn name(&self) -> &'static str {
        "direct_click"
    }

    async fn try_activate(&self, page: &dyn Page, control: &ElementRef) -> Result<(), AutomationError> {
        page.click(control).await
    }
}

pub struct ScriptClick;

#[async_trait]
impl ActivateStrategy for ScriptClick {
    fn name(&self) -> &'static str {
        "script_click"
    }

    async fn try_activate(&self, page: &dyn Page, control: &ElementRef) -> Result<(), AutomationError> {
        page.script_click(control).await
    }
}

pub struct HoverThenClick {
    settle: Duration,
}

#[async_trait]
impl ActivateStrategy for HoverThenClick {
    fn name(&self) -> &'static str {
        "hover_then_click"
    }

    async fn try_activate(&self, page: &dyn Page, control: &ElementRef) -> Result<(), AutomationError> {
        page.hover(control).await?;
        tokio::time::sleep(self.settle).await;
        page.click(control).await
    }
}

pub fn activate_chain(form: &FormLayout) -> Vec<Box<dyn ActivateStrategy>> {
    vec![
        Box::new(DirectClick),
        Box::new(ScriptClick),
        Box::new(HoverThenClick { settle: Duration::from_millis(form.hover_settle_ms) }),
    ]
}

async fn non_empty_text(page: &dyn Page, element: Option<ElementRef>) -> Result<Option<String>, AutomationError> {
    let Some(element) = element else {
        return Ok(None);
    };
    let text = page.inspect(&element).await?.text;
    Ok((!text.is_empty()).then_some(text))
}

/// Time field inside the item container that holds the action's label
pub struct NearLabel {
    form: FormLayout,
}

#[async_trait]
impl ExtractStrategy for NearLabel {
    fn name(&self) -> &'static str {
        "near_label"
    }

    async fn try_extract(&self, page: &dyn Page, action: Action) -> Result<Option<String>, AutomationError> {
        let query = ElementQuery::Near {
            anchor: label(&self.form, action).to_string(),
            containers: self.form.item_classes.iter().map(|c| format!(".{c}")).collect(),
            target: format!(".{}", self.form.time_class),
        };
        let element = first(page, query).await?;
        non_empty_text(page, element).await
    }
}

/// Check-in time is the first time field, check-out the second
pub struct PositionalTime {
    form: FormLayout,
}

#[async_trait]
impl ExtractStrategy for PositionalTime {
    fn name(&self) -> &'static str {
        "positional_time"
    }

    async fn try_extract(&self, page: &dyn Page, action: Action) -> Result<Option<String>, AutomationError> {
        let query = ElementQuery::Nth { scope: format!(".{}", self.form.time_class), index: position(action) };
        let element = first(page, query).await?;
        non_empty_text(page, element).await
    }
}

pub fn extract_chain(form: &FormLayout) -> Vec<Box<dyn ExtractStrategy>> {
    vec![Box::new(NearLabel { form: form.clone() }), Box::new(PositionalTime { form: form.clone() })]
}
