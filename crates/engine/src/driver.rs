//! Automation driver capability consumed by step handlers.
//!
//! The engine never defines selectors or business actions; it only needs a
//! session it can navigate, query, act on, probe for liveness and dispose.
//! `webdriver::WebDriverSession` is the production implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::backoff::{poll_until_some, Backoff};
use crate::error::{EngineError, EngineResult};

/// First delay between element lookups while waiting
const WAIT_POLL_START: Duration = Duration::from_millis(100);

/// How to find an element
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "using", content = "value", rename_all = "snake_case")]
pub enum Selector {
    Css(String),
    XPath(String),
    /// Any element whose visible text equals the given string
    Text(String),
}

impl Selector {
    pub fn css(value: impl Into<String>) -> Self {
        Self::Css(value.into())
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::XPath(value.into())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

/// XPath string literal for arbitrary text
pub fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

impl Selector {
    /// Button with the given label inside the dialog titled `dialog`
    pub fn button_in_dialog(button: &str, dialog: &str) -> Self {
        Self::XPath(format!(
            "//*[@role='dialog' or contains(@class,'modal')][.//*[normalize-space(.)={}]]\
             //button[normalize-space(.)={}]",
            xpath_literal(dialog.trim()),
            xpath_literal(button.trim())
        ))
    }

    /// Input labelled, named or placeholdered `field`
    pub fn field(field: &str) -> Self {
        let field = xpath_literal(field.trim());
        Self::XPath(format!(
            "(//input[@name={f} or @placeholder={f} or @aria-label={f}] \
             | //label[normalize-space(.)={f}]/following::input[1] \
             | //label[normalize-space(.)={f}]/following::textarea[1])[1]",
            f = field
        ))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(v) => write!(f, "css:{}", v),
            Selector::XPath(v) => write!(f, "xpath:{}", v),
            Selector::Text(v) => write!(f, "text:{}", v),
        }
    }
}

/// Opaque reference to an element inside one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub id: String,
    pub selector: Selector,
}

/// Interaction performed on an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click,
    Fill { value: String, clear_first: bool },
    Press { key: String },
    Check,
    Uncheck,
}

impl Action {
    pub fn fill(value: impl Into<String>) -> Self {
        Self::Fill {
            value: value.into(),
            clear_first: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

/// One live automation session
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Identifier of the underlying session
    fn session_id(&self) -> &str;

    async fn navigate(&self, url: &str) -> EngineResult<()>;

    async fn current_url(&self) -> EngineResult<String>;

    /// Find the first element matching the selector, if any
    async fn locate(&self, selector: &Selector) -> EngineResult<Option<ElementHandle>>;

    async fn is_displayed(&self, element: &ElementHandle) -> EngineResult<bool>;

    async fn act(&self, element: &ElementHandle, action: &Action) -> EngineResult<()>;

    /// Cheap no-op round trip; false once the session is gone
    async fn session_is_live(&self) -> bool;

    async fn dispose(&self) -> EngineResult<()>;

    /// Wait, bounded by `timeout`, for an element to reach a state.
    ///
    /// Returns the element for `Visible`, `Attached` and present-but-hidden
    /// `Hidden` waits; `None` when the element is gone.
    async fn wait_for(
        &self,
        selector: &Selector,
        state: WaitState,
        timeout: Duration,
    ) -> EngineResult<Option<ElementHandle>> {
        let awaited = format!("{} to be {}", selector, state.as_str());
        let poll = poll_until_some(Backoff::covering(timeout, WAIT_POLL_START), || async move {
            let found = match self.locate(selector).await {
                Ok(found) => found,
                Err(e) => {
                    debug!("Lookup of {} failed while waiting: {}", selector, e);
                    return None;
                }
            };
            match (state, found) {
                (WaitState::Attached, Some(el)) => Some(Some(el)),
                (WaitState::Detached, None) | (WaitState::Hidden, None) => Some(None),
                (WaitState::Visible, Some(el)) => {
                    self.is_displayed(&el).await.unwrap_or(false).then_some(Some(el))
                }
                (WaitState::Hidden, Some(el)) => {
                    let displayed = self.is_displayed(&el).await.unwrap_or(true);
                    (!displayed).then_some(Some(el))
                }
                _ => None,
            }
        });

        match tokio::time::timeout(timeout, poll).await {
            Ok(outcome) => outcome.into_result(&awaited),
            Err(_) => Err(EngineError::Timeout(format!("{} within {:?}", awaited, timeout))),
        }
    }

    /// Wait for a visible element, failing with `ElementNotFound` otherwise
    async fn require(&self, selector: &Selector, timeout: Duration) -> EngineResult<ElementHandle> {
        self.wait_for(selector, WaitState::Visible, timeout)
            .await?
            .ok_or_else(|| EngineError::ElementNotFound(selector.to_string()))
    }
}
