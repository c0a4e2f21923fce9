//! Task board session over the W3C WebDriver HTTP protocol.
//!
//! Talks to a running chromedriver (or any W3C endpoint) with plain JSON
//! requests. Transport failures and dead-session codes become
//! `SessionDead`; stale element codes become `RowStale`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{Field, RowHandle, SessionFactory, TaskBoardSession};
use crate::config::{BoardSelectors, Config};
use crate::error::{Error, Result};
use crate::model::NOT_SPECIFIED;
use crate::retry::{RetryPolicy, retry_until};

/// W3C key for element references in JSON payloads.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const HIDE_AUTOMATION_JS: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})";
const SCROLL_INTO_VIEW_JS: &str =
    "arguments[0].scrollIntoView({behavior: 'auto', block: 'center', inline: 'nearest'});";
const JS_CLICK: &str = "arguments[0].click();";

// ---------------------------------------------------------------------------
// Protocol failures
// ---------------------------------------------------------------------------

/// A failed WebDriver command before it is mapped onto the crate taxonomy.
#[derive(Debug, Clone, PartialEq)]
struct Failure {
    /// W3C error code, or `transport` when no response arrived.
    code: String,
    message: String,
}

impl Failure {
    fn transport(message: impl Into<String>) -> Self {
        Self {
            code: "transport".to_string(),
            message: message.into(),
        }
    }

    fn is(&self, code: &str) -> bool {
        self.code == code
    }

    fn session_gone(&self) -> bool {
        match self.code.as_str() {
            "transport" | "invalid session id" | "no such window" | "session not created" => true,
            "unknown error" => {
                let m = self.message.to_ascii_lowercase();
                m.contains("chrome not reachable") || m.contains("disconnected")
            }
            _ => false,
        }
    }

    fn into_error(self) -> Error {
        if self.session_gone() {
            return Error::SessionDead(format!("{}: {}", self.code, self.message));
        }
        match self.code.as_str() {
            "stale element reference" => Error::RowStale(self.message),
            "timeout" | "script timeout" => Error::RowTimeout(self.message),
            _ => Error::Other(format!("webdriver {}: {}", self.code, self.message)),
        }
    }
}

type Wire<T> = std::result::Result<T, Failure>;

fn element_ref(id: &str) -> Value {
    json!({ ELEMENT_KEY: id })
}

fn element_ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.get(ELEMENT_KEY).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Opens browser sessions against a WebDriver endpoint.
pub struct WebDriverFactory {
    client: reqwest::Client,
    endpoint: String,
    board_url: SecretString,
    profile_dir: Option<PathBuf>,
    profile_name: String,
    selectors: BoardSelectors,
    snapshot_dir: PathBuf,
}

impl WebDriverFactory {
    pub fn new(config: &Config, selectors: BoardSelectors) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.webdriver_url.trim_end_matches('/').to_string(),
            board_url: config.board_url()?.clone(),
            profile_dir: config.profile_dir.clone(),
            profile_name: config.profile_name.clone(),
            selectors,
            snapshot_dir: config.snapshot_dir.clone(),
        })
    }

    fn capabilities(&self) -> Value {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--start-maximized".to_string(),
            "--disable-extensions".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-infobars".to_string(),
            "--disable-popup-blocking".to_string(),
            "--ignore-certificate-errors".to_string(),
        ];
        if let Some(dir) = &self.profile_dir {
            args.push(format!("--user-data-dir={}", dir.display()));
            args.push(format!("--profile-directory={}", self.profile_name));
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "excludeSwitches": ["enable-automation", "enable-logging"],
                        "useAutomationExtension": false,
                    }
                }
            }
        })
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    async fn open(&self) -> Result<Box<dyn TaskBoardSession>> {
        if let Some(dir) = &self.profile_dir
            && !dir.is_dir()
        {
            return Err(Error::SessionInit(format!(
                "browser profile dir {} is missing",
                dir.display()
            )));
        }

        info!(endpoint = %self.endpoint, "opening webdriver session");
        let response = self
            .client
            .post(format!("{}/session", self.endpoint))
            .json(&self.capabilities())
            .send()
            .await
            .map_err(|e| Error::SessionInit(format!("webdriver unreachable: {e}")))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::SessionInit(format!("bad new-session response: {e}")))?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        let Some(session_id) = value.get("sessionId").and_then(Value::as_str) else {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no session id returned");
            return Err(Error::SessionInit(format!("new session ({status}): {message}")));
        };

        let session = WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{session_id}", self.endpoint),
            board_url: self.board_url.clone(),
            selectors: self.selectors.clone(),
            snapshot_dir: self.snapshot_dir.clone(),
        };
        if let Err(e) = session.execute(HIDE_AUTOMATION_JS, vec![]).await {
            debug!(code = %e.code, "could not mask webdriver flag");
        }
        info!(session = session_id, "webdriver session open");
        Ok(Box::new(session))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One live browser session pointed at the task board.
pub struct WebDriverSession {
    client: reqwest::Client,
    base: String,
    board_url: SecretString,
    selectors: BoardSelectors,
    snapshot_dir: PathBuf,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Wire<Value> {
        let mut request = self.client.request(method, format!("{}{path}", self.base));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Failure::transport(e.to_string()))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Failure::transport(format!("unreadable response: {e}")))?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(value);
        }
        Err(Failure {
            code: value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn find_all(&self, xpath: &str) -> Wire<Vec<String>> {
        let value = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": "xpath", "value": xpath })),
            )
            .await?;
        Ok(element_ids(&value))
    }

    async fn find_all_from(&self, element: &str, xpath: &str) -> Wire<Vec<String>> {
        let value = self
            .command(
                Method::POST,
                &format!("/element/{element}/elements"),
                Some(json!({ "using": "xpath", "value": xpath })),
            )
            .await?;
        Ok(element_ids(&value))
    }

    async fn text(&self, element: &str) -> Wire<String> {
        let value = self
            .command(Method::GET, &format!("/element/{element}/text"), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn displayed(&self, element: &str) -> Wire<bool> {
        let value = self
            .command(Method::GET, &format!("/element/{element}/displayed"), None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn attribute(&self, element: &str, name: &str) -> Wire<Option<String>> {
        let value = self
            .command(
                Method::GET,
                &format!("/element/{element}/attribute/{name}"),
                None,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Wire<Value> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    /// Native click, falling back to a script click when something overlays
    /// the element.
    async fn click(&self, element: &str) -> Wire<()> {
        match self
            .command(
                Method::POST,
                &format!("/element/{element}/click"),
                Some(json!({})),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(f) if f.is("element click intercepted") || f.is("element not interactable") => {
                debug!(element, "native click blocked, using script click");
                self.execute(JS_CLICK, vec![element_ref(element)])
                    .await
                    .map(|_| ())
            }
            Err(f) => Err(f),
        }
    }

    async fn navigate(&self, url: &str) -> Wire<()> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn current_url(&self) -> Wire<String> {
        let value = self.command(Method::GET, "/url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// True once `xpath` matches a displayed element.
    async fn visible(&self, xpath: &str) -> Result<bool> {
        let found = self.find_all(xpath).await.map_err(Failure::into_error)?;
        match found.first() {
            Some(element) => self.displayed(element).await.map_err(Failure::into_error),
            None => Ok(false),
        }
    }

    /// Save the current page source for later diagnosis.
    async fn snapshot(&self, reason: &str) {
        let source = match self.command(Method::GET, "/source", None).await {
            Ok(v) => v.as_str().unwrap_or_default().to_string(),
            Err(f) => {
                warn!(reason, code = %f.code, "could not read page source for snapshot");
                return;
            }
        };
        let name = format!(
            "board_{reason}_{}.html",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        let path = self.snapshot_dir.join(name);
        match tokio::fs::write(&path, source).await {
            Ok(()) => info!(path = %path.display(), "page snapshot saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "page snapshot failed"),
        }
    }

    fn poll(&self, timeout: Duration) -> RetryPolicy {
        RetryPolicy::poll(self.selectors.poll_interval(), timeout)
    }
}

/// Claim-path errors: anything short of session death aborts only this claim.
fn claim_error(e: Error) -> Error {
    if e.is_fatal() {
        e
    } else {
        Error::ClaimAttempt(e.to_string())
    }
}

#[async_trait]
impl TaskBoardSession for WebDriverSession {
    async fn verify_ready(&self) -> Result<bool> {
        self.current_url().await.map_err(Failure::into_error)?;
        self.navigate(self.board_url.expose_secret())
            .await
            .map_err(Failure::into_error)?;

        let landed = self.current_url().await.map_err(Failure::into_error)?;
        if !landed
            .to_ascii_lowercase()
            .contains(&self.selectors.expected_host)
        {
            warn!(url = %landed, "redirected away from the board, login likely failed");
            self.snapshot("redirect").await;
            return Ok(false);
        }

        let indicator = self.selectors.loaded_indicator_xpath.as_str();
        let policy = self.poll(self.selectors.ready_timeout());
        let ready = retry_until(&policy, move |_| self.visible(indicator)).await?;
        if !ready {
            warn!(
                timeout_secs = self.selectors.ready_timeout_secs,
                "board loaded indicator never appeared"
            );
            self.snapshot("ready_timeout").await;
        }
        Ok(ready)
    }

    async fn discover_rows(&self) -> Result<Vec<RowHandle>> {
        let xpath = self.selectors.row_xpath.as_str();
        let policy = self.poll(self.selectors.rows_timeout());
        let present = retry_until(&policy, move |_| async move {
            let rows = self.find_all(xpath).await.map_err(Failure::into_error)?;
            Ok(!rows.is_empty())
        })
        .await?;
        if !present {
            info!("no rows appeared before timeout");
            self.snapshot("rows_timeout").await;
            return Ok(Vec::new());
        }

        let rows = self.find_all(xpath).await.map_err(Failure::into_error)?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(index, element)| RowHandle { index, element })
            .collect())
    }

    async fn ensure_visible(&self, row: &RowHandle) -> Result<bool> {
        self.execute(SCROLL_INTO_VIEW_JS, vec![element_ref(&row.element)])
            .await
            .map_err(Failure::into_error)?;
        self.displayed(&row.element)
            .await
            .map_err(Failure::into_error)
    }

    async fn extract_field(&self, row: &RowHandle, field: Field) -> Result<String> {
        let column = self.selectors.column_xpath(field.column());
        let lookup = async {
            let columns = self.find_all_from(&row.element, &column).await?;
            let Some(column_el) = columns.first() else {
                return Ok(None);
            };
            let spans = self
                .find_all_from(column_el, self.selectors.value_xpath(field.kind()))
                .await?;
            let Some(span) = spans.first() else {
                return Ok(None);
            };
            self.text(span).await.map(Some)
        };
        match lookup.await {
            Ok(Some(text)) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(_) => Ok(NOT_SPECIFIED.to_string()),
            Err(f) if f.is("no such element") => Ok(NOT_SPECIFIED.to_string()),
            Err(f) => Err(f.into_error()),
        }
    }

    async fn row_dom_id(&self, row: &RowHandle) -> Result<Option<String>> {
        let id = self
            .attribute(&row.element, "id")
            .await
            .map_err(Failure::into_error)?;
        Ok(id.filter(|v| !v.trim().is_empty()))
    }

    async fn claim(&self, row: &RowHandle) -> Result<()> {
        self.click(&row.element)
            .await
            .map_err(|f| claim_error(f.into_error()))?;

        let policy = self.poll(self.selectors.claim_timeout());
        let action_bar = self.selectors.action_bar_xpath.as_str();
        if !retry_until(&policy, move |_| self.visible(action_bar))
            .await
            .map_err(claim_error)?
        {
            return Err(Error::ClaimAttempt("detail pane did not open".to_string()));
        }

        let start_xpath = self.selectors.start_task_xpath.as_str();
        if !retry_until(&policy, move |_| self.visible(start_xpath))
            .await
            .map_err(claim_error)?
        {
            return Err(Error::ClaimAttempt(
                "start task button did not appear".to_string(),
            ));
        }
        let buttons = self
            .find_all(start_xpath)
            .await
            .map_err(|f| claim_error(f.into_error()))?;
        let Some(button) = buttons.first() else {
            return Err(Error::ClaimAttempt("start task button vanished".to_string()));
        };
        self.click(button)
            .await
            .map_err(|f| claim_error(f.into_error()))?;

        tokio::time::sleep(self.selectors.settle_after_claim()).await;
        Ok(())
    }

    async fn navigate_home(&self) -> Result<()> {
        self.navigate(self.board_url.expose_secret())
            .await
            .map_err(Failure::into_error)
    }

    async fn close(&self) -> Result<()> {
        self.command(Method::DELETE, "", None)
            .await
            .map(|_| ())
            .map_err(Failure::into_error)
    }
}
