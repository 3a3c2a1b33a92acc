//! Execution context shared between the steps of a scenario.
//!
//! Steps are written by people, so data produced early ("Determine the
//! Current Time") is often consumed many steps later ("Enter the Current
//! Time in the Time Fields"). Handlers exchange such values through named
//! slots here instead of call arguments.
//!
//! Rules of the road:
//! - a slot must be set by an earlier step before anything reads it; reading
//!   an unset slot is a handler error, never a silent default
//! - the designated last consumer clears the slot (`take`), so nothing leaks
//!   into an unrelated scenario
//! - one instance per sequential run; concurrent scenarios each need their
//!   own instance

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Well-known slot names used by the built-in step library
pub mod slots {
    /// Role of the actor most recently driven by a step
    pub const AGENT: &str = "agent";
    /// Time captured by "Determine the Current Time"
    pub const CURRENT_TIME: &str = "current_time";
    /// URLs visited by the current actor, in order
    pub const ACTUAL_URLS: &str = "actual_urls";
    /// Last URL navigated to
    pub const CURRENT_URL: &str = "current_url";
}

/// Keyed blackboard of JSON values
#[derive(Debug, Default, Clone)]
pub struct ExecutionContext {
    slots: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing whatever the slot held
    pub fn set<T: Serialize>(&mut self, slot: &str, value: T) -> EngineResult<()> {
        let value = serde_json::to_value(value)?;
        debug!("context: set {} = {}", slot, value);
        self.slots.insert(slot.to_string(), value);
        Ok(())
    }

    /// Read a slot that an earlier step must have set
    pub fn get<T: DeserializeOwned>(&self, slot: &str) -> EngineResult<T> {
        let value = self
            .slots
            .get(slot)
            .ok_or_else(|| EngineError::UnsetSlot(slot.to_string()))?;
        decode(slot, value.clone())
    }

    /// Read a slot that may legitimately be unset
    pub fn get_opt<T: DeserializeOwned>(&self, slot: &str) -> EngineResult<Option<T>> {
        self.slots
            .get(slot)
            .map(|value| decode(slot, value.clone()))
            .transpose()
    }

    /// Read a slot and clear it; used by the slot's last consumer
    pub fn take<T: DeserializeOwned>(&mut self, slot: &str) -> EngineResult<T> {
        let value = self
            .slots
            .remove(slot)
            .ok_or_else(|| EngineError::UnsetSlot(slot.to_string()))?;
        debug!("context: took {}", slot);
        decode(slot, value)
    }

    /// Append to a list slot, creating it when unset
    pub fn push<T: Serialize>(&mut self, slot: &str, item: T) -> EngineResult<()> {
        let item = serde_json::to_value(item)?;
        match self.slots.entry(slot.to_string()).or_insert_with(|| Value::Array(Vec::new())) {
            Value::Array(items) => {
                items.push(item);
                Ok(())
            }
            other => Err(EngineError::SlotType {
                slot: slot.to_string(),
                reason: format!("expected a list, found {}", other),
            }),
        }
    }

    /// Clear a slot; returns whether it was set
    pub fn clear(&mut self, slot: &str) -> bool {
        let was_set = self.slots.remove(slot).is_some();
        if was_set {
            debug!("context: cleared {}", slot);
        }
        was_set
    }

    pub fn is_set(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    /// Names of the slots currently set
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn decode<T: DeserializeOwned>(slot: &str, value: Value) -> EngineResult<T> {
    serde_json::from_value(value).map_err(|e| EngineError::SlotType {
        slot: slot.to_string(),
        reason: e.to_string(),
    })
}
