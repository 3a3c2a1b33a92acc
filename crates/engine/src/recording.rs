//! In-process automation driver that records what it is asked to do.
//!
//! Backs `keystep run --dry-run` and the engine's tests. Pages are modelled
//! as a set of known selectors; in permissive mode every selector resolves
//! to a visible element so a scenario can be walked without a browser.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use keystep_common::normalize::normalize_role;

use crate::actors::SessionFactory;
use crate::driver::{Action, AutomationDriver, ElementHandle, Selector};
use crate::error::{EngineError, EngineResult};

/// Something the driver was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Navigate(String),
    Act { selector: Selector, action: Action },
    Dispose,
}

pub struct RecordingDriver {
    session_id: String,
    permissive: bool,
    live: AtomicBool,
    current_url: Mutex<String>,
    elements: Mutex<BTreeMap<Selector, bool>>,
    log: Mutex<Vec<Recorded>>,
}

impl RecordingDriver {
    pub fn new(permissive: bool) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            permissive,
            live: AtomicBool::new(true),
            current_url: Mutex::new("about:blank".to_string()),
            elements: Mutex::new(BTreeMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Make a selector resolvable, visible or not
    pub fn show(&self, selector: Selector, displayed: bool) {
        self.elements.lock().insert(selector, displayed);
    }

    pub fn remove(&self, selector: &Selector) {
        self.elements.lock().remove(selector);
    }

    /// Simulate the remote end dropping the session
    pub fn kill(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.live.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Driver(format!(
                "session {} is gone",
                self.session_id
            )))
        }
    }
}

#[async_trait]
impl AutomationDriver for RecordingDriver {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn navigate(&self, url: &str) -> EngineResult<()> {
        self.ensure_live()?;
        *self.current_url.lock() = url.to_string();
        self.log.lock().push(Recorded::Navigate(url.to_string()));
        Ok(())
    }

    async fn current_url(&self) -> EngineResult<String> {
        self.ensure_live()?;
        Ok(self.current_url.lock().clone())
    }

    async fn locate(&self, selector: &Selector) -> EngineResult<Option<ElementHandle>> {
        self.ensure_live()?;
        let known = self.elements.lock().contains_key(selector);
        Ok((known || self.permissive).then(|| ElementHandle {
            id: Uuid::new_v4().to_string(),
            selector: selector.clone(),
        }))
    }

    async fn is_displayed(&self, element: &ElementHandle) -> EngineResult<bool> {
        self.ensure_live()?;
        Ok(self
            .elements
            .lock()
            .get(&element.selector)
            .copied()
            .unwrap_or(self.permissive))
    }

    async fn act(&self, element: &ElementHandle, action: &Action) -> EngineResult<()> {
        self.ensure_live()?;
        self.log.lock().push(Recorded::Act {
            selector: element.selector.clone(),
            action: action.clone(),
        });
        Ok(())
    }

    async fn session_is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn dispose(&self) -> EngineResult<()> {
        self.ensure_live()?;
        self.live.store(false, Ordering::SeqCst);
        self.log.lock().push(Recorded::Dispose);
        Ok(())
    }
}

/// Hands out `RecordingDriver`s for a fixed set of roles
pub struct RecordingFactory {
    roles: BTreeSet<String>,
    permissive: bool,
    failing: Mutex<BTreeSet<String>>,
    created: AtomicU32,
    sessions: Mutex<Vec<(String, Arc<RecordingDriver>)>>,
}

impl RecordingFactory {
    pub fn new<I, S>(roles: I, permissive: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            roles: roles.into_iter().map(|r| normalize_role(r.as_ref())).collect(),
            permissive,
            failing: Mutex::new(BTreeSet::new()),
            created: AtomicU32::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Make session creation for a role fail
    pub fn fail_role(&self, role: &str) {
        self.failing.lock().insert(normalize_role(role));
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    /// Most recent session created for a role
    pub fn latest(&self, role: &str) -> Option<Arc<RecordingDriver>> {
        let role = normalize_role(role);
        self.sessions
            .lock()
            .iter()
            .rev()
            .find(|(r, _)| *r == role)
            .map(|(_, driver)| Arc::clone(driver))
    }

    /// Every session created so far, oldest first
    pub fn sessions(&self) -> Vec<Arc<RecordingDriver>> {
        self.sessions.lock().iter().map(|(_, d)| Arc::clone(d)).collect()
    }
}

#[async_trait]
impl SessionFactory for RecordingFactory {
    fn knows_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    async fn create(&self, role: &str) -> EngineResult<Arc<dyn AutomationDriver>> {
        if self.failing.lock().contains(role) {
            return Err(EngineError::SessionCreation {
                role: role.to_string(),
                reason: "hub refused the session".to_string(),
            });
        }
        let driver = Arc::new(RecordingDriver::new(self.permissive));
        self.created.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .push((role.to_string(), Arc::clone(&driver)));
        Ok(driver)
    }
}
