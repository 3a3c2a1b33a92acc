//! Keystep Step Engine
//!
//! Turns free-text test steps into executed actions:
//! - matches every step of a scenario against an ordered pattern registry
//! - executes only scenarios whose every step matched, in step order
//! - shares state between steps through an explicit execution context
//! - keeps one automation session per actor role, rebuilt when it dies
//! - files unmatched steps with the issue tracker, once per fingerprint
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioSource ── fetch_scenario(key) -> Scenario          │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  interpret(registry, scenario) -> Interpretation            │
//! │       ├── all matched ──► ExecutionPlan::run(StepEnv)       │
//! │       │                     ├── ExecutionContext (&mut)     │
//! │       │                     └── ActorPool ── acquire(role)  │
//! │       │                           └── AutomationDriver      │
//! │       └── any unmatched ─► Triage ── IssueTracker           │
//! │                              └── unmatched_steps_report.txt │
//! ├─────────────────────────────────────────────────────────────┤
//! │  cleanup hooks ─► clear scenario slots ─► dispose sessions  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod actors;
pub mod backoff;
pub mod context;
pub mod driver;
pub mod error;
pub mod finder;
pub mod jira;
pub mod library;
pub mod matcher;
pub mod recording;
pub mod registry;
pub mod report;
pub mod runner;
pub mod source;
pub mod triage;
pub mod webdriver;
pub mod zephyr;

pub use actors::{ActorHandle, ActorPool, SessionFactory};
pub use backoff::{poll_until, poll_until_some, retry, Backoff, PollOutcome};
pub use context::{slots, ExecutionContext};
pub use driver::{Action, AutomationDriver, ElementHandle, Selector, WaitState};
pub use error::{EngineError, EngineResult};
pub use matcher::{interpret, ExecutionPlan, Interpretation, MatchOutcome};
pub use registry::{handler_fn, PatternRegistry, PatternRule, StepCall, StepEnv, StepHandler, StepSettings};
pub use runner::{CleanupHook, RunnerConfig, ScenarioResult, ScenarioRunner, SuiteResult};
pub use source::{ScenarioSource, YamlScenarioSource};
pub use triage::{fingerprint, InMemoryTracker, IssueTracker, Triage, TriageOutcome};
