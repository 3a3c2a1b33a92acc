//! Ordered registry of step patterns.
//!
//! Rules are tried strictly in registration order and the first structural
//! match wins. Order is priority: a rule for "Click the X button in the Y
//! modal" must be registered before a catch-all "Click (.*)", otherwise the
//! catch-all claims the step. The registry never second-guesses the order;
//! `audit` is available to spot shadowed example sentences.

use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keystep_common::TestDataRecord;

use crate::actors::ActorPool;
use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};

/// Everything a handler knows about the step it was matched to
#[derive(Debug, Clone)]
pub struct StepCall {
    pub scenario_key: String,
    /// Position of the step within its scenario
    pub index: usize,
    pub text: String,
    pub test_data: TestDataRecord,
    /// Capture groups in pattern order; groups that did not participate are empty
    pub captures: Vec<String>,
}

impl StepCall {
    /// Capture group `n` (0-based, i.e. regex group n + 1)
    pub fn capture(&self, n: usize) -> EngineResult<&str> {
        self.captures.get(n).map(String::as_str).ok_or_else(|| {
            EngineError::handler(format!(
                "step '{}' has no capture group {}",
                self.text,
                n + 1
            ))
        })
    }

    /// Test data field required by the handler
    pub fn data(&self, field: &str) -> EngineResult<&str> {
        self.test_data.get(field).ok_or_else(|| {
            EngineError::handler(format!(
                "test data for '{}' has no field '{}'",
                self.text, field
            ))
        })
    }
}

/// Settings handlers read but never change
#[derive(Debug, Clone)]
pub struct StepSettings {
    /// Base URL of the application under test; relative URLs resolve against it
    pub base_url: String,

    /// Default bound for element waits
    pub wait_timeout: Duration,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            wait_timeout: Duration::from_secs(10),
        }
    }
}

impl StepSettings {
    /// Resolve a URL from step text against the base URL
    pub fn resolve_url(&self, url: &str) -> String {
        let url = url.trim();
        if url.contains("://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), url)
        } else {
            format!("https://{}", url)
        }
    }
}

/// State lent to a handler while it runs
pub struct StepEnv<'a> {
    pub context: &'a mut ExecutionContext,
    pub actors: &'a mut ActorPool,
    pub settings: &'a StepSettings,
}

/// Behaviour bound to a pattern
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, call: &StepCall, env: &mut StepEnv<'_>) -> EngineResult<()>;
}

/// Adapter for handlers that never wait on the outside world
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&StepCall, &mut StepEnv<'_>) -> EngineResult<()> + Send + Sync + 'static,
{
    async fn run(&self, call: &StepCall, env: &mut StepEnv<'_>) -> EngineResult<()> {
        (self.0)(call, env)
    }
}

/// Wrap a synchronous closure as a handler
pub fn handler_fn<F>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(&StepCall, &mut StepEnv<'_>) -> EngineResult<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// A named pattern and the handler it dispatches to
#[derive(Clone)]
pub struct PatternRule {
    name: String,
    pattern: Regex,
    handler: Arc<dyn StepHandler>,
    examples: Vec<String>,
}

impl PatternRule {
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        handler: Arc<dyn StepHandler>,
    ) -> EngineResult<Self> {
        let pattern = Regex::new(pattern).map_err(|source| EngineError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            name: name.into(),
            pattern,
            handler,
            examples: Vec::new(),
        })
    }

    /// Sentences this rule is meant to claim; checked by `PatternRegistry::audit`
    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.examples.extend(examples.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn examples(&self) -> &[String] {
        &self.examples
    }

    pub(crate) fn handler(&self) -> Arc<dyn StepHandler> {
        Arc::clone(&self.handler)
    }

    /// Capture groups if the pattern matches anywhere in `text`
    pub fn captures(&self, text: &str) -> Option<Vec<String>> {
        self.pattern.captures(text).map(|caps| {
            caps.iter()
                .skip(1)
                .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect()
        })
    }
}

impl fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

/// A rule match: the rule's position, the rule and its captures
pub struct RuleMatch<'a> {
    pub position: usize,
    pub rule: &'a PatternRule,
    pub captures: Vec<String>,
}

/// Problems found by `PatternRegistry::audit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditFinding {
    /// A rule does not match one of its own examples
    ExampleNotMatched { rule: String, example: String },

    /// An earlier rule claims one of this rule's examples
    Shadowed {
        rule: String,
        example: String,
        shadowed_by: String,
    },
}

impl fmt::Display for AuditFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditFinding::ExampleNotMatched { rule, example } => {
                write!(f, "rule '{}' does not match its example \"{}\"", rule, example)
            }
            AuditFinding::Shadowed {
                rule,
                example,
                shadowed_by,
            } => write!(
                f,
                "rule '{}' never sees \"{}\": '{}' is registered earlier and matches it",
                rule, example, shadowed_by
            ),
        }
    }
}

/// Append-only, ordered list of rules
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    rules: Vec<PatternRule>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule; it has lower priority than every rule already present
    pub fn register(&mut self, rule: PatternRule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    /// Compile and append a rule
    pub fn add(
        &mut self,
        name: impl Into<String>,
        pattern: &str,
        handler: Arc<dyn StepHandler>,
    ) -> EngineResult<&mut Self> {
        let rule = PatternRule::new(name, pattern, handler)?;
        Ok(self.register(rule))
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule, in registration order, whose pattern matches `text`
    pub fn find(&self, text: &str) -> Option<RuleMatch<'_>> {
        self.rules.iter().enumerate().find_map(|(position, rule)| {
            rule.captures(text).map(|captures| RuleMatch {
                position,
                rule,
                captures,
            })
        })
    }

    /// Check every rule's examples against the registration order
    pub fn audit(&self) -> Vec<AuditFinding> {
        let mut findings = Vec::new();
        for (position, rule) in self.rules.iter().enumerate() {
            for example in rule.examples() {
                if rule.captures(example).is_none() {
                    findings.push(AuditFinding::ExampleNotMatched {
                        rule: rule.name().to_string(),
                        example: example.clone(),
                    });
                    continue;
                }
                if let Some(winner) = self.find(example) {
                    if winner.position < position {
                        findings.push(AuditFinding::Shadowed {
                            rule: rule.name().to_string(),
                            example: example.clone(),
                            shadowed_by: winner.rule.name().to_string(),
                        });
                    }
                }
            }
        }
        findings
    }
}
