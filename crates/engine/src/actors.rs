//! Role-keyed pool of automation sessions.
//!
//! A role names a persona ("student", "teacher") whose steps must share one
//! session so log-ins and page state persist across steps. The pool hands
//! out the same session for a role until a liveness probe says it died;
//! then it quietly builds a replacement. Disposal belongs to the pool
//! alone: `ActorHandle` deliberately exposes no way to end a session.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use keystep_common::normalize::normalize_role;

use crate::driver::{Action, AutomationDriver, ElementHandle, Selector, WaitState};
use crate::error::{EngineError, EngineResult};

/// Builds sessions for known roles
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Whether the role (already normalised) can be served
    fn knows_role(&self, role: &str) -> bool;

    async fn create(&self, role: &str) -> EngineResult<Arc<dyn AutomationDriver>>;
}

/// A step's view of one pooled session
#[derive(Clone)]
pub struct ActorHandle {
    role: String,
    session: Arc<dyn AutomationDriver>,
}

impl ActorHandle {
    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    /// True when both handles drive the very same session object
    pub fn same_session(&self, other: &ActorHandle) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.session), Arc::as_ptr(&other.session))
    }

    pub async fn is_live(&self) -> bool {
        self.session.session_is_live().await
    }

    pub async fn navigate(&self, url: &str) -> EngineResult<()> {
        self.session.navigate(url).await
    }

    pub async fn current_url(&self) -> EngineResult<String> {
        self.session.current_url().await
    }

    pub async fn locate(&self, selector: &Selector) -> EngineResult<Option<ElementHandle>> {
        self.session.locate(selector).await
    }

    pub async fn is_displayed(&self, element: &ElementHandle) -> EngineResult<bool> {
        self.session.is_displayed(element).await
    }

    pub async fn act(&self, element: &ElementHandle, action: &Action) -> EngineResult<()> {
        self.session.act(element, action).await
    }

    pub async fn wait_for(
        &self,
        selector: &Selector,
        state: WaitState,
        timeout: Duration,
    ) -> EngineResult<Option<ElementHandle>> {
        self.session.wait_for(selector, state, timeout).await
    }

    pub async fn require(&self, selector: &Selector, timeout: Duration) -> EngineResult<ElementHandle> {
        self.session.require(selector, timeout).await
    }
}

impl fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("role", &self.role)
            .field("session", &self.session.session_id())
            .finish()
    }
}

/// Session lifecycle counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub created: u32,
    pub reused: u32,
    pub recreated: u32,
    pub disposed: u32,
}

pub struct ActorPool {
    factory: Arc<dyn SessionFactory>,
    sessions: BTreeMap<String, ActorHandle>,
    stats: PoolStats,
}

impl ActorPool {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            sessions: BTreeMap::new(),
            stats: PoolStats::default(),
        }
    }

    /// Session for a role, reused while live and rebuilt once dead
    pub async fn acquire(&mut self, role: &str) -> EngineResult<ActorHandle> {
        let key = normalize_role(role);
        if !self.factory.knows_role(&key) {
            return Err(EngineError::UnknownRole(role.to_string()));
        }

        if let Some(handle) = self.sessions.get(&key).cloned() {
            if handle.is_live().await {
                debug!("Reusing session {} for '{}'", handle.session_id(), key);
                self.stats.reused += 1;
                return Ok(handle);
            }
            warn!(
                "Session {} for '{}' is no longer live, starting a new one",
                handle.session_id(),
                key
            );
            self.sessions.remove(&key);
            self.stats.recreated += 1;
        }

        let session = self.factory.create(&key).await.map_err(|e| match e {
            e @ EngineError::SessionCreation { .. } => e,
            other => EngineError::SessionCreation {
                role: key.clone(),
                reason: other.to_string(),
            },
        })?;
        info!("Started session {} for '{}'", session.session_id(), key);
        self.stats.created += 1;

        let handle = ActorHandle {
            role: key.clone(),
            session,
        };
        self.sessions.insert(key, handle.clone());
        Ok(handle)
    }

    /// Roles with a cached session
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// End the session for one role; false if none was cached
    pub async fn dispose(&mut self, role: &str) -> EngineResult<bool> {
        let key = normalize_role(role);
        match self.sessions.remove(&key) {
            Some(handle) => {
                self.stats.disposed += 1;
                handle.session.dispose().await?;
                info!("Disposed session for '{}'", key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// End every cached session. Failures are logged, never raised; the
    /// pool is empty afterwards either way.
    pub async fn dispose_all(&mut self) -> usize {
        let sessions = std::mem::take(&mut self.sessions);
        let results = join_all(sessions.into_iter().map(|(role, handle)| async move {
            if !handle.is_live().await {
                return (role, None);
            }
            let result = handle.session.dispose().await;
            (role, Some(result))
        }))
        .await;

        let mut disposed = 0;
        for (role, result) in results {
            match result {
                Some(Ok(())) => {
                    disposed += 1;
                    debug!("Disposed session for '{}'", role);
                }
                Some(Err(e)) => warn!("Failed to dispose session for '{}': {}", role, e),
                None => debug!("Session for '{}' already gone", role),
            }
        }
        self.stats.disposed += disposed as u32;
        disposed
    }
}
