//! Error types for the step engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid step pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Step {index} failed: {step} - {reason}")]
    StepFailed {
        index: usize,
        step: String,
        reason: String,
    },

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Context slot '{0}' read before any step set it")]
    UnsetSlot(String),

    #[error("Context slot '{slot}' holds an unexpected value: {reason}")]
    SlotType { slot: String, reason: String },

    #[error("Unknown actor role: {0}")]
    UnknownRole(String),

    #[error("Failed to create session for role '{role}': {reason}")]
    SessionCreation { role: String, reason: String },

    #[error("Automation driver error: {0}")]
    Driver(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Scenario source error: {0}")]
    Source(String),

    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("Issue tracker error: {0}")]
    Tracker(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("Config error: {0}")]
    Config(#[from] keystep_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// Shorthand for handler-side failures
    pub fn handler(reason: impl Into<String>) -> Self {
        Self::Handler(reason.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
