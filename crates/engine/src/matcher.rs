//! Transactional step dispatch.
//!
//! Interpretation walks the whole scenario before anything runs. Each
//! matched step becomes a `DeferredStep` (handler plus its bound call);
//! an unmatched step is recorded and scanning continues so triage sees
//! every gap at once. Only an interpretation in which every step matched
//! can be turned into an `ExecutionPlan`, so a partially understood
//! scenario never touches the system under test.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use keystep_common::Scenario;

use crate::error::{EngineError, EngineResult};
use crate::registry::{PatternRegistry, StepCall, StepEnv, StepHandler};

/// Per-step result of matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched { rule: String, captures: Vec<String> },
    Unmatched { step_text: String },
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

/// A step that no rule claimed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedStep {
    pub index: usize,
    pub text: String,
}

/// Handler bound to everything it needs; runs only when executed
#[derive(Clone)]
pub struct DeferredStep {
    rule: String,
    call: StepCall,
    handler: Arc<dyn StepHandler>,
}

impl DeferredStep {
    pub fn rule(&self) -> &str {
        &self.rule
    }

    pub fn call(&self) -> &StepCall {
        &self.call
    }

    pub async fn execute(&self, env: &mut StepEnv<'_>) -> EngineResult<()> {
        self.handler.run(&self.call, env).await
    }
}

impl std::fmt::Debug for DeferredStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredStep")
            .field("rule", &self.rule)
            .field("call", &self.call)
            .finish()
    }
}

/// Outcome of matching a whole scenario
#[derive(Debug)]
pub struct Interpretation {
    scenario_key: String,
    outcomes: Vec<MatchOutcome>,
    deferred: Vec<DeferredStep>,
    unmatched: Vec<UnmatchedStep>,
}

impl Interpretation {
    pub fn scenario_key(&self) -> &str {
        &self.scenario_key
    }

    pub fn all_matched(&self) -> bool {
        self.unmatched.is_empty()
    }

    pub fn outcomes(&self) -> &[MatchOutcome] {
        &self.outcomes
    }

    pub fn deferred(&self) -> &[DeferredStep] {
        &self.deferred
    }

    pub fn unmatched(&self) -> &[UnmatchedStep] {
        &self.unmatched
    }

    /// Plan for a fully matched scenario, or the steps that blocked it
    pub fn into_plan(self) -> Result<ExecutionPlan, Vec<UnmatchedStep>> {
        if self.unmatched.is_empty() {
            Ok(ExecutionPlan {
                scenario_key: self.scenario_key,
                steps: self.deferred,
            })
        } else {
            Err(self.unmatched)
        }
    }
}

/// Match every step of a scenario without running anything
pub fn interpret(registry: &PatternRegistry, scenario: &Scenario) -> Interpretation {
    let mut outcomes = Vec::with_capacity(scenario.len());
    let mut deferred = Vec::with_capacity(scenario.len());
    let mut unmatched = Vec::new();

    for (index, scenario_step) in scenario.steps.iter().enumerate() {
        let text = scenario_step.step.text.as_str();
        match registry.find(text) {
            Some(hit) => {
                debug!("{} step {}: '{}' -> {}", scenario.key, index, text, hit.rule.name());
                outcomes.push(MatchOutcome::Matched {
                    rule: hit.rule.name().to_string(),
                    captures: hit.captures.clone(),
                });
                deferred.push(DeferredStep {
                    rule: hit.rule.name().to_string(),
                    call: StepCall {
                        scenario_key: scenario.key.clone(),
                        index,
                        text: text.to_string(),
                        test_data: scenario_step.test_data.clone(),
                        captures: hit.captures,
                    },
                    handler: hit.rule.handler(),
                });
            }
            None => {
                info!("{} step {}: no match for \"{}\"", scenario.key, index, text);
                outcomes.push(MatchOutcome::Unmatched {
                    step_text: text.to_string(),
                });
                unmatched.push(UnmatchedStep {
                    index,
                    text: text.to_string(),
                });
            }
        }
    }

    Interpretation {
        scenario_key: scenario.key.clone(),
        outcomes,
        deferred,
        unmatched,
    }
}

impl PatternRegistry {
    pub fn interpret(&self, scenario: &Scenario) -> Interpretation {
        interpret(self, scenario)
    }
}

/// Fully matched steps, ready to run in order
#[derive(Debug)]
pub struct ExecutionPlan {
    scenario_key: String,
    steps: Vec<DeferredStep>,
}

impl ExecutionPlan {
    pub fn scenario_key(&self) -> &str {
        &self.scenario_key
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[DeferredStep] {
        &self.steps
    }

    /// Run each step to completion before the next; the first failure
    /// stops the plan and is reported with the step it came from.
    pub async fn run(&self, env: &mut StepEnv<'_>) -> EngineResult<()> {
        for step in &self.steps {
            let call = step.call();
            debug!("{} executing step {} via {}", self.scenario_key, call.index, step.rule());
            step.execute(env).await.map_err(|e| EngineError::StepFailed {
                index: call.index,
                step: call.text.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::handler_fn;
    use keystep_common::TestDataRecord;

    fn registry() -> PatternRegistry {
        let mut registry = PatternRegistry::new();
        registry
            .add("open", r"^Open the (\w+) page$", handler_fn(|_, _| Ok(())))
            .unwrap();
        registry
            .add("click", r"^Click (.+)$", handler_fn(|_, _| Ok(())))
            .unwrap();
        registry
    }

    #[test]
    fn test_interpretation_is_deterministic() {
        let scenario = Scenario::new("KS-T1")
            .step("Open the login page", TestDataRecord::new())
            .step("Dance a little", TestDataRecord::new())
            .step("Click Save", TestDataRecord::new());
        let registry = registry();

        let first = registry.interpret(&scenario);
        let second = registry.interpret(&scenario);
        assert_eq!(first.outcomes(), second.outcomes());
        assert!(!first.all_matched());
        assert_eq!(
            first.unmatched(),
            &[UnmatchedStep {
                index: 1,
                text: "Dance a little".to_string()
            }]
        );
        // matching continues past the gap
        assert_eq!(first.deferred().len(), 2);
    }

    #[test]
    fn test_plan_only_for_full_match() {
        let registry = registry();
        let partial = Scenario::new("KS-T2").step("Jump", TestDataRecord::new());
        assert!(registry.interpret(&partial).into_plan().is_err());

        let full = Scenario::new("KS-T3")
            .step("Open the home page", TestDataRecord::new())
            .step("Click Go", TestDataRecord::new());
        let plan = registry.interpret(&full).into_plan().unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps()[0].call().captures, vec!["home"]);
        assert_eq!(plan.steps()[1].rule(), "click");
    }
}
