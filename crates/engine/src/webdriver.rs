//! W3C WebDriver client used as the production automation driver.
//!
//! Each actor role maps to a session on a WebDriver hub. A role may carry a
//! `nodename:applicationName` capability so the hub routes it to a node
//! with the right setup (an installed extension, a desktop agent).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use keystep_common::config::{ActorConfig, WebDriverConfig};

use crate::actors::SessionFactory;
use crate::driver::{xpath_literal, Action, AutomationDriver, ElementHandle, Selector};
use crate::error::{EngineError, EngineResult};

/// W3C element reference key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Capability used by the hub to route a session to a node
pub const NODE_CAPABILITY: &str = "nodename:applicationName";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chrome,
    Firefox,
    Edge,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Firefox => "firefox",
            Browser::Edge => "MicrosoftEdge",
        }
    }

    pub fn parse(name: &str) -> EngineResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "chrome" | "chromium" => Ok(Browser::Chrome),
            "firefox" => Ok(Browser::Firefox),
            "edge" | "microsoftedge" => Ok(Browser::Edge),
            other => Err(EngineError::Driver(format!("unsupported browser '{}'", other))),
        }
    }

    fn options_key(&self) -> &'static str {
        match self {
            Browser::Chrome => "goog:chromeOptions",
            Browser::Firefox => "moz:firefoxOptions",
            Browser::Edge => "ms:edgeOptions",
        }
    }
}

/// Capabilities for a new session
pub fn session_capabilities(browser: Browser, headless: bool, node: Option<&str>) -> Value {
    let args: Vec<&str> = if headless {
        match browser {
            Browser::Firefox => vec!["-headless"],
            _ => vec!["--headless=new"],
        }
    } else {
        Vec::new()
    };

    let mut always_match = json!({
        "browserName": browser.as_str(),
        browser.options_key(): { "args": args },
    });
    if let Some(node) = node {
        always_match[NODE_CAPABILITY] = json!(node);
    }
    json!({ "capabilities": { "alwaysMatch": always_match } })
}

/// Locator strategy and value on the wire
fn locator(selector: &Selector) -> (&'static str, String) {
    match selector {
        Selector::Css(css) => ("css selector", css.clone()),
        Selector::XPath(xpath) => ("xpath", xpath.clone()),
        Selector::Text(text) => (
            "xpath",
            format!("//*[normalize-space(text())={}]", xpath_literal(text.trim())),
        ),
    }
}

/// Key name to WebDriver key code; unknown names are typed literally
fn key_code(key: &str) -> String {
    match key.to_lowercase().as_str() {
        "enter" | "return" => "\u{E007}".to_string(),
        "tab" => "\u{E004}".to_string(),
        "escape" | "esc" => "\u{E00C}".to_string(),
        "backspace" => "\u{E003}".to_string(),
        "space" => "\u{E00D}".to_string(),
        _ => key.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

/// One remote browser session
pub struct WebDriverSession {
    client: reqwest::Client,
    hub_url: String,
    session_id: String,
}

impl WebDriverSession {
    /// Open a session on the hub
    pub async fn start(
        client: reqwest::Client,
        hub_url: &str,
        capabilities: &Value,
    ) -> EngineResult<Self> {
        let hub_url = hub_url.trim_end_matches('/').to_string();
        let response = client
            .post(format!("{}/session", hub_url))
            .json(capabilities)
            .send()
            .await?;
        let value = read_value(response).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Driver("hub response carried no sessionId".to_string()))?
            .to_string();
        debug!("Opened WebDriver session {}", session_id);
        Ok(Self {
            client,
            hub_url,
            session_id,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/session/{}", self.hub_url, self.session_id)
        } else {
            format!("{}/session/{}/{}", self.hub_url, self.session_id, path)
        }
    }

    async fn get(&self, path: &str) -> EngineResult<Value> {
        let response = self.client.get(self.endpoint(path)).send().await?;
        read_value(response).await
    }

    async fn post(&self, path: &str, body: Value) -> EngineResult<Value> {
        let response = self.client.post(self.endpoint(path)).json(&body).send().await?;
        read_value(response).await
    }

    async fn element_bool(&self, element: &ElementHandle, property: &str) -> EngineResult<bool> {
        let value = self
            .get(&format!("element/{}/{}", element.id, property))
            .await?;
        value
            .as_bool()
            .ok_or_else(|| EngineError::Driver(format!("'{}' was not a boolean: {}", property, value)))
    }

    async fn click(&self, element: &ElementHandle) -> EngineResult<()> {
        self.post(&format!("element/{}/click", element.id), json!({}))
            .await
            .map(|_| ())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> EngineResult<()> {
        self.post(
            &format!("element/{}/value", element.id),
            json!({ "text": text }),
        )
        .await
        .map(|_| ())
    }
}

/// Unwrap `{"value": ...}`, turning wire errors into driver errors
async fn read_value(response: reqwest::Response) -> EngineResult<Value> {
    let status = response.status();
    let envelope: Envelope = response.json().await?;
    if status.is_success() {
        return Ok(envelope.value);
    }
    match serde_json::from_value::<WireError>(envelope.value) {
        Ok(wire) if wire.error == "no such element" => {
            Err(EngineError::ElementNotFound(wire.message))
        }
        Ok(wire) => Err(EngineError::Driver(format!("{}: {}", wire.error, wire.message))),
        Err(_) => Err(EngineError::Driver(format!("hub returned {}", status))),
    }
}

#[async_trait]
impl AutomationDriver for WebDriverSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn navigate(&self, url: &str) -> EngineResult<()> {
        debug!("{} -> {}", self.session_id, url);
        self.post("url", json!({ "url": url })).await.map(|_| ())
    }

    async fn current_url(&self) -> EngineResult<String> {
        let value = self.get("url").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn locate(&self, selector: &Selector) -> EngineResult<Option<ElementHandle>> {
        let (using, value) = locator(selector);
        match self
            .post("element", json!({ "using": using, "value": value }))
            .await
        {
            Ok(found) => {
                let id = found
                    .get(ELEMENT_KEY)
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::Driver(format!("malformed element: {}", found)))?;
                Ok(Some(ElementHandle {
                    id: id.to_string(),
                    selector: selector.clone(),
                }))
            }
            Err(EngineError::ElementNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn is_displayed(&self, element: &ElementHandle) -> EngineResult<bool> {
        self.element_bool(element, "displayed").await
    }

    async fn act(&self, element: &ElementHandle, action: &Action) -> EngineResult<()> {
        match action {
            Action::Click => self.click(element).await,
            Action::Fill { value, clear_first } => {
                if *clear_first {
                    self.post(&format!("element/{}/clear", element.id), json!({}))
                        .await?;
                }
                self.send_keys(element, value).await
            }
            Action::Press { key } => self.send_keys(element, &key_code(key)).await,
            Action::Check | Action::Uncheck => {
                let want = matches!(action, Action::Check);
                if self.element_bool(element, "selected").await? != want {
                    self.click(element).await?;
                }
                Ok(())
            }
        }
    }

    async fn session_is_live(&self) -> bool {
        self.get("url").await.is_ok()
    }

    async fn dispose(&self) -> EngineResult<()> {
        let response = self.client.delete(self.endpoint("")).send().await?;
        read_value(response).await.map(|_| ())
    }
}

/// Opens hub sessions for configured roles
pub struct WebDriverFactory {
    client: reqwest::Client,
    hub_url: String,
    browser: Browser,
    headless: bool,
    actors: BTreeMap<String, ActorConfig>,
}

impl WebDriverFactory {
    pub fn new(
        config: &WebDriverConfig,
        actors: BTreeMap<String, ActorConfig>,
    ) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            hub_url: config.hub_url.clone(),
            browser: Browser::parse(&config.browser)?,
            headless: config.headless,
            actors,
        })
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    fn knows_role(&self, role: &str) -> bool {
        self.actors.contains_key(role)
    }

    async fn create(&self, role: &str) -> EngineResult<Arc<dyn AutomationDriver>> {
        let actor = self
            .actors
            .get(role)
            .ok_or_else(|| EngineError::UnknownRole(role.to_string()))?;
        let capabilities =
            session_capabilities(self.browser, self.headless, actor.capability.as_deref());
        let session = WebDriverSession::start(self.client.clone(), &self.hub_url, &capabilities)
            .await
            .map_err(|e| EngineError::SessionCreation {
                role: role.to_string(),
                reason: e.to_string(),
            })?;

        if actor.settle_ms > 0 {
            info!("Letting the '{}' session settle for {}ms", role, actor.settle_ms);
            tokio::time::sleep(Duration::from_millis(actor.settle_ms)).await;
        }
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_carry_node_routing() {
        let caps = session_capabilities(Browser::Chrome, true, Some("student-mv3"));
        let always = &caps["capabilities"]["alwaysMatch"];
        assert_eq!(always["browserName"], "chrome");
        assert_eq!(always[NODE_CAPABILITY], "student-mv3");
        assert_eq!(always["goog:chromeOptions"]["args"][0], "--headless=new");

        let caps = session_capabilities(Browser::Firefox, false, None);
        assert!(caps["capabilities"]["alwaysMatch"].get(NODE_CAPABILITY).is_none());
    }

    #[test]
    fn test_text_selector_quotes() {
        assert_eq!(
            locator(&Selector::text("Save")).1,
            "//*[normalize-space(text())='Save']"
        );
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(
            xpath_literal(r#"it's "x""#),
            r#"concat('it', "'", 's "x"')"#
        );
    }

    #[test]
    fn test_browser_parse() {
        assert_eq!(Browser::parse("Chromium").unwrap(), Browser::Chrome);
        assert_eq!(Browser::parse("edge").unwrap().as_str(), "MicrosoftEdge");
        assert!(Browser::parse("netscape").is_err());
    }
}
