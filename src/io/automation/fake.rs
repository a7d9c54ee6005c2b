//! Fake browser for testing
//!
//! Pages are backed by a flat list of `FakeElement`s. Queries are evaluated
//! against that list with a small CSS subset: comma alternatives, a tag,
//! `.class`, `[attr="value"]` and `:not(.class)`. Only the last compound of a
//! descendant selector is matched.

use super::{AutomationError, Browser, ElementQuery, ElementRef, ElementState, Page};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How an element was activated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Native,
    Script,
    Hover,
}

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub tag: String,
    pub classes: Vec<String>,
    pub attrs: HashMap<String, String>,
    pub text: String,
    pub disabled: bool,
    pub visible: bool,
    /// Item container this element sits in, for `Near` lookups
    pub group: Option<usize>,
    pub fail_click: bool,
    pub fail_script_click: bool,
    pub fail_hover: bool,
    /// Native clicks fail until the element has been hovered
    pub needs_hover: bool,
    pub hovered: bool,
    pub stale: bool,
}

impl FakeElement {
    pub fn new(tag: &str, text: &str) -> Self {
        Self { tag: tag.to_string(), text: text.to_string(), visible: true, ..Default::default() }
    }

    pub fn button(text: &str) -> Self {
        Self::new("button", text)
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn in_group(mut self, group: usize) -> Self {
        self.group = Some(group);
        self
    }

    pub fn failing_click(mut self) -> Self {
        self.fail_click = true;
        self
    }

    pub fn failing_script_click(mut self) -> Self {
        self.fail_script_click = true;
        self
    }

    pub fn failing_hover(mut self) -> Self {
        self.fail_hover = true;
        self
    }

    pub fn needs_hover(mut self) -> Self {
        self.needs_hover = true;
        self
    }

    pub fn stale(mut self) -> Self {
        self.stale = true;
        self
    }

    fn matches_selector(&self, selector: &str) -> bool {
        selector.split(',').any(|alt| {
            let compound = alt.split_whitespace().last().unwrap_or_default();
            !compound.is_empty() && self.matches_compound(compound)
        })
    }

    fn matches_compound(&self, compound: &str) -> bool {
        let mut rest = compound;
        let tag_end = rest.find(['.', '[', ':']).unwrap_or(rest.len());
        let tag = &rest[..tag_end];
        if !tag.is_empty() && tag != "*" && tag != self.tag {
            return false;
        }
        rest = &rest[tag_end..];

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix(":not(.") {
                let Some(end) = after.find(')') else { return false };
                if self.has_class(&after[..end]) {
                    return false;
                }
                rest = &after[end + 1..];
            } else if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[', ':']).unwrap_or(after.len());
                if !self.has_class(&after[..end]) {
                    return false;
                }
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let Some(end) = after.find(']') else { return false };
                let (name, value) = match after[..end].split_once('=') {
                    Some((n, v)) => (n, Some(v.trim_matches('"'))),
                    None => (&after[..end], None),
                };
                match (self.attrs.get(name), value) {
                    (Some(actual), Some(expected)) if actual == expected => {}
                    (Some(_), None) => {}
                    _ => return false,
                }
                rest = &after[end + 1..];
            } else {
                return false;
            }
        }
        true
    }

    fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    fn is_clickable(&self) -> bool {
        self.tag == "button"
            || self.attrs.contains_key("onclick")
            || self.attrs.get("role").is_some_and(|r| r == "button")
            || self.has_class("btn")
    }
}

/// Mutates the page after a successful activation
pub type ClickHook = Arc<dyn Fn(&mut Vec<FakeElement>, usize) + Send + Sync>;

#[derive(Default)]
struct FakeDom {
    elements: Vec<FakeElement>,
    activations: Vec<(usize, ClickKind)>,
    typed: Vec<(usize, String)>,
    visited: Vec<String>,
    closed: bool,
    fail_find: bool,
    on_click: Option<ClickHook>,
}

/// Scripted page; clones share the same DOM
#[derive(Clone, Default)]
pub struct FakePage {
    dom: Arc<Mutex<FakeDom>>,
}

impl FakePage {
    pub fn new(elements: Vec<FakeElement>) -> Self {
        let page = Self::default();
        page.dom.lock().elements = elements;
        page
    }

    pub fn with_click_hook(self, hook: ClickHook) -> Self {
        self.dom.lock().on_click = Some(hook);
        self
    }

    /// Every query fails with a timeout
    pub fn failing_queries(self) -> Self {
        self.dom.lock().fail_find = true;
        self
    }

    pub fn activations(&self) -> Vec<(usize, ClickKind)> {
        self.dom.lock().activations.clone()
    }

    pub fn typed(&self) -> Vec<(usize, String)> {
        self.dom.lock().typed.clone()
    }

    pub fn visited(&self) -> Vec<String> {
        self.dom.lock().visited.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.dom.lock().closed
    }

    pub fn remove_matching(&self, selector: &str) {
        self.dom.lock().elements.retain(|el| !el.matches_selector(selector));
    }

    /// Deep copy with its own DOM, for a fresh session
    fn fork(&self) -> Self {
        let dom = self.dom.lock();
        let page = Self::new(dom.elements.clone());
        {
            let mut fresh = page.dom.lock();
            fresh.fail_find = dom.fail_find;
            fresh.on_click = dom.on_click.clone();
        }
        page
    }

    fn element(&self, element: &ElementRef) -> Result<(usize, FakeElement), AutomationError> {
        let dom = self.dom.lock();
        let index: usize = element
            .0
            .parse()
            .map_err(|_| AutomationError::StaleElement(element.0.clone()))?;
        match dom.elements.get(index) {
            Some(el) if !el.stale => Ok((index, el.clone())),
            _ => Err(AutomationError::StaleElement(element.0.clone())),
        }
    }

    fn activate(&self, element: &ElementRef, kind: ClickKind) -> Result<(), AutomationError> {
        let (index, el) = self.element(element)?;
        let fails = match kind {
            ClickKind::Native => el.fail_click || (el.needs_hover && !el.hovered),
            ClickKind::Script => el.fail_script_click,
            ClickKind::Hover => el.fail_hover,
        };
        if fails {
            return Err(AutomationError::Protocol {
                error: "element click intercepted".to_string(),
                message: format!("{kind:?} on {index}"),
            });
        }

        let mut dom = self.dom.lock();
        dom.activations.push((index, kind));
        if kind == ClickKind::Hover {
            dom.elements[index].hovered = true;
        } else {
            if let Some(hook) = dom.on_click.clone() {
                hook(&mut dom.elements, index);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str) -> Result<(), AutomationError> {
        self.dom.lock().visited.push(url.to_string());
        Ok(())
    }

    async fn find_all(&self, query: &ElementQuery) -> Result<Vec<ElementRef>, AutomationError> {
        let dom = self.dom.lock();
        if dom.fail_find {
            return Err(AutomationError::Timeout { timeout_ms: 8000, what: query.to_string() });
        }

        let enabled = |el: &FakeElement, enabled_only: bool| !enabled_only || !el.disabled;
        let indices: Vec<usize> = match query {
            ElementQuery::Css(selector) => dom
                .elements
                .iter()
                .enumerate()
                .filter(|(_, el)| el.matches_selector(selector))
                .map(|(i, _)| i)
                .collect(),
            ElementQuery::Text { scope, text, enabled_only } => dom
                .elements
                .iter()
                .enumerate()
                .filter(|(_, el)| {
                    el.matches_selector(scope)
                        && el.text.trim().contains(text.as_str())
                        && enabled(el, *enabled_only)
                })
                .map(|(i, _)| i)
                .collect(),
            ElementQuery::Nth { scope, index } => dom
                .elements
                .iter()
                .enumerate()
                .filter(|(_, el)| el.matches_selector(scope))
                .map(|(i, _)| i)
                .nth(*index)
                .into_iter()
                .collect(),
            ElementQuery::Clickable { text, enabled_only } => dom
                .elements
                .iter()
                .enumerate()
                .filter(|(_, el)| {
                    el.is_clickable()
                        && el.text.trim().contains(text.as_str())
                        && enabled(el, *enabled_only)
                })
                .map(|(i, _)| i)
                .collect(),
            ElementQuery::Near { anchor, target, .. } => {
                let groups: Vec<usize> = dom
                    .elements
                    .iter()
                    .filter(|el| el.text.contains(anchor.as_str()))
                    .filter_map(|el| el.group)
                    .collect();
                dom.elements
                    .iter()
                    .enumerate()
                    .filter(|(_, el)| {
                        el.group.is_some_and(|g| groups.contains(&g)) && el.matches_selector(target)
                    })
                    .map(|(i, _)| i)
                    .collect()
            }
        };

        Ok(indices.into_iter().map(|i| ElementRef(i.to_string())).collect())
    }

    async fn inspect(&self, element: &ElementRef) -> Result<ElementState, AutomationError> {
        let (_, el) = self.element(element)?;
        Ok(ElementState { text: el.text.trim().to_string(), disabled: el.disabled, visible: el.visible })
    }

    async fn click(&self, element: &ElementRef) -> Result<(), AutomationError> {
        self.activate(element, ClickKind::Native)
    }

    async fn script_click(&self, element: &ElementRef) -> Result<(), AutomationError> {
        self.activate(element, ClickKind::Script)
    }

    async fn hover(&self, element: &ElementRef) -> Result<(), AutomationError> {
        self.activate(element, ClickKind::Hover)
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), AutomationError> {
        let (index, _) = self.element(element)?;
        self.dom.lock().typed.push((index, text.to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.dom.lock().closed = true;
        Ok(())
    }
}

/// Hands out a fresh fork of a template page per session
#[derive(Clone)]
pub struct FakeBrowser {
    template: FakePage,
    sessions: Arc<Mutex<Vec<FakePage>>>,
    failing_opens: Arc<AtomicUsize>,
    open_delay: Option<Duration>,
}

impl FakeBrowser {
    pub fn new(template: FakePage) -> Self {
        Self {
            template,
            sessions: Arc::new(Mutex::new(Vec::new())),
            failing_opens: Arc::new(AtomicUsize::new(0)),
            open_delay: None,
        }
    }

    /// The first `count` session opens fail
    pub fn failing_first_opens(self, count: usize) -> Self {
        self.failing_opens.store(count, Ordering::SeqCst);
        self
    }

    /// Every session open takes `delay`, so actions stay in flight
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn sessions(&self) -> Vec<FakePage> {
        self.sessions.lock().clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn open_session(&self) -> Result<Box<dyn Page>, AutomationError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.failing_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_opens.store(remaining - 1, Ordering::SeqCst);
            return Err(AutomationError::Protocol {
                error: "session not created".to_string(),
                message: "fake browser refused".to_string(),
            });
        }
        let page = self.template.fork();
        self.sessions.lock().push(page.clone());
        Ok(Box::new(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_subset() {
        let el = FakeElement::button("출근하기").class("check-button").attr("role", "button");
        assert!(el.matches_selector("button.check-button"));
        assert!(el.matches_selector(".btn, [role=\"button\"]"));
        assert!(el.matches_selector(".check-button:not(.disabled)"));
        assert!(!el.matches_selector("button.check-in-button"));
        assert!(!el.clone().class("disabled").matches_selector(".check-button:not(.disabled)"));
        assert!(FakeElement::new("input", "")
            .attr("type", "text")
            .matches_selector(".input-box input[type=\"text\"]"));
    }
}
