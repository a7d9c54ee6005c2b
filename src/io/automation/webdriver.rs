//! W3C WebDriver client (e.g. chromedriver)
//!
//! Protocol:
//! - POST /session creates a session; DELETE /session/{id} ends it
//! - Responses wrap their payload in `{"value": ...}`
//! - Errors carry `{"value": {"error": "...", "message": "..."}}` with a 4xx/5xx status
//! - Element references are objects keyed by the W3C element identifier
//!
//! Text and predicate queries are evaluated in-page through /execute/sync so
//! one round trip returns every match.

use super::{AutomationError, Browser, ElementQuery, ElementRef, ElementState, Page};
use crate::infra::config::Config;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// W3C element reference key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const TEXT_QUERY_SCRIPT: &str = r#"
const [scope, text, enabledOnly] = arguments;
return [...document.querySelectorAll(scope)].filter(el =>
  (el.textContent || '').trim().includes(text) &&
  (!enabledOnly || (!el.disabled && !el.classList.contains('disabled'))));
"#;

const NTH_QUERY_SCRIPT: &str = r#"
const [scope, index] = arguments;
const el = document.querySelectorAll(scope)[index];
return el ? [el] : [];
"#;

const CLICKABLE_QUERY_SCRIPT: &str = r#"
const [text, enabledOnly] = arguments;
return [...document.querySelectorAll('*')].filter(el =>
  (el.textContent || '').trim().includes(text) &&
  (el.tagName === 'BUTTON' || el.onclick || el.getAttribute('onclick') !== null ||
   el.getAttribute('role') === 'button' || el.style.cursor === 'pointer' ||
   el.classList.contains('btn')) &&
  (!enabledOnly || (!el.disabled && !el.classList.contains('disabled'))));
"#;

const NEAR_QUERY_SCRIPT: &str = r#"
const [anchor, containers, target] = arguments;
const found = [];
for (const el of document.querySelectorAll('*')) {
  if (el.children.length !== 0 || !(el.textContent || '').includes(anchor)) continue;
  let scope = null;
  for (const c of containers) { scope = el.closest('.' + c); if (scope) break; }
  scope = scope || el.parentElement;
  if (!scope) continue;
  for (const t of scope.querySelectorAll(target)) { if (!found.includes(t)) found.push(t); }
}
return found;
"#;

const INSPECT_SCRIPT: &str = r#"
const el = arguments[0];
return {
  text: (el.textContent || '').trim(),
  disabled: !!el.disabled || el.classList.contains('disabled'),
  visible: el.offsetWidth > 0 && el.offsetHeight > 0
};
"#;

const CLICK_SCRIPT: &str = "arguments[0].click();";

/// Launches sessions against a WebDriver endpoint
pub struct WebDriverBrowser {
    client: reqwest::Client,
    endpoint: String,
    headless: bool,
    args: Vec<String>,
}

impl WebDriverBrowser {
    pub fn new(config: &Config) -> Result<Self, AutomationError> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder().timeout(config.webdriver_timeout()).build()?;
        Ok(Self {
            client,
            endpoint: config.webdriver_endpoint().trim_end_matches('/').to_string(),
            headless: config.webdriver_headless(),
            args: config.webdriver_args().to_vec(),
        })
    }

    fn capabilities(&self) -> Value {
        let mut args = self.args.clone();
        if self.headless {
            args.push("--headless=new".to_string());
        }
        // Fresh profile per session so no cookies leak between attempts
        args.push(format!("--user-data-dir=/tmp/attendance_{}", Uuid::now_v7()));

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn open_session(&self) -> Result<Box<dyn Page>, AutomationError> {
        let url = format!("{}/session", self.endpoint);
        let value = send(&self.client, Method::POST, &url, Some(self.capabilities())).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| AutomationError::InvalidResponse("missing sessionId".to_string()))?;

        info!(session_id = %session_id, endpoint = %self.endpoint, "webdriver_session_opened");

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.endpoint, session_id),
        }))
    }
}

/// One live WebDriver session
pub struct WebDriverSession {
    client: reqwest::Client,
    base: String,
}

impl WebDriverSession {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, AutomationError> {
        let url = format!("{}{}", self.base, path);
        send(&self.client, method, &url, body).await
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, AutomationError> {
        self.command(Method::POST, "/execute/sync", Some(json!({ "script": script, "args": args })))
            .await
    }

    async fn find_by_script(
        &self,
        script: &str,
        args: Vec<Value>,
    ) -> Result<Vec<ElementRef>, AutomationError> {
        let value = self.execute(script, args).await?;
        element_list(&value)
    }
}

#[async_trait]
impl Page for WebDriverSession {
    async fn goto(&self, url: &str) -> Result<(), AutomationError> {
        debug!(url = %url, "webdriver_navigate");
        self.command(Method::POST, "/url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    async fn find_all(&self, query: &ElementQuery) -> Result<Vec<ElementRef>, AutomationError> {
        match query {
            ElementQuery::Css(selector) => {
                let value = self
                    .command(
                        Method::POST,
                        "/elements",
                        Some(json!({ "using": "css selector", "value": selector })),
                    )
                    .await?;
                element_list(&value)
            }
            ElementQuery::Text { scope, text, enabled_only } => {
                self.find_by_script(TEXT_QUERY_SCRIPT, vec![json!(scope), json!(text), json!(enabled_only)])
                    .await
            }
            ElementQuery::Nth { scope, index } => {
                self.find_by_script(NTH_QUERY_SCRIPT, vec![json!(scope), json!(index)]).await
            }
            ElementQuery::Clickable { text, enabled_only } => {
                self.find_by_script(CLICKABLE_QUERY_SCRIPT, vec![json!(text), json!(enabled_only)])
                    .await
            }
            ElementQuery::Near { anchor, containers, target } => {
                self.find_by_script(
                    NEAR_QUERY_SCRIPT,
                    vec![json!(anchor), json!(containers), json!(target)],
                )
                .await
            }
        }
    }

    async fn inspect(&self, element: &ElementRef) -> Result<ElementState, AutomationError> {
        let value = self.execute(INSPECT_SCRIPT, vec![element_arg(element)]).await?;
        Ok(ElementState {
            text: value.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
            disabled: value.get("disabled").and_then(Value::as_bool).unwrap_or(false),
            visible: value.get("visible").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    async fn click(&self, element: &ElementRef) -> Result<(), AutomationError> {
        self.command(Method::POST, &format!("/element/{}/click", element.0), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn script_click(&self, element: &ElementRef) -> Result<(), AutomationError> {
        self.execute(CLICK_SCRIPT, vec![element_arg(element)]).await?;
        Ok(())
    }

    async fn hover(&self, element: &ElementRef) -> Result<(), AutomationError> {
        let actions = json!({
            "actions": [{
                "type": "pointer",
                "id": "mouse",
                "parameters": { "pointerType": "mouse" },
                "actions": [{
                    "type": "pointerMove",
                    "duration": 0,
                    "origin": element_arg(element),
                    "x": 0,
                    "y": 0
                }]
            }]
        });
        self.command(Method::POST, "/actions", Some(actions)).await?;
        Ok(())
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), AutomationError> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.0),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.command(Method::DELETE, "", None).await?;
        debug!(session = %self.base, "webdriver_session_closed");
        Ok(())
    }
}

/// Send one protocol request and unwrap the `value` payload
async fn send(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, AutomationError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            AutomationError::Timeout { timeout_ms: 0, what: url.to_string() }
        } else {
            AutomationError::Http(e)
        }
    })?;
    let status = response.status();
    let payload: Value = response.json().await?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
        warn!(status = %status.as_u16(), error = %error, "webdriver_command_failed");
        return Err(protocol_error(error, message));
    }

    Ok(value)
}

fn protocol_error(error: &str, message: &str) -> AutomationError {
    match error {
        "stale element reference" | "no such element" => {
            AutomationError::StaleElement(message.to_string())
        }
        "timeout" | "script timeout" => {
            AutomationError::Timeout { timeout_ms: 0, what: message.to_string() }
        }
        _ => AutomationError::Protocol { error: error.to_string(), message: message.to_string() },
    }
}

fn element_arg(element: &ElementRef) -> Value {
    json!({ ELEMENT_KEY: element.0 })
}

/// Parse a JSON array of W3C element references
fn element_list(value: &Value) -> Result<Vec<ElementRef>, AutomationError> {
    let items = value
        .as_array()
        .ok_or_else(|| AutomationError::InvalidResponse(format!("expected element list, got {value}")))?;

    items
        .iter()
        .map(|item| {
            item.get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(|id| ElementRef(id.to_string()))
                .ok_or_else(|| AutomationError::InvalidResponse(format!("not an element: {item}")))
        })
        .collect()
}
