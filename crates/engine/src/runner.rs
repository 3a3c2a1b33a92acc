//! Scenario runner: interpretation, triage, execution and cleanup

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use keystep_common::{Scenario, ScenarioOutcome};

use crate::actors::ActorPool;
use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::registry::{PatternRegistry, StepEnv, StepSettings};
use crate::source::ScenarioSource;
use crate::triage::{Triage, TriageOutcome};

pub const RESULTS_FILE: &str = "test-results.json";

/// Teardown of external state a scenario may have created
#[async_trait]
pub trait CleanupHook: Send + Sync {
    fn name(&self) -> &str;

    async fn cleanup(&self, scenario_key: &str, context: &mut ExecutionContext) -> EngineResult<()>;
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub key: String,
    pub outcome: ScenarioOutcome,
    pub duration_ms: u64,
    pub executed_steps: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub triage: Vec<TriageOutcome>,
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    fn tally(results: Vec<ScenarioResult>, duration_ms: u64) -> Self {
        let count = |label: &str| results.iter().filter(|r| r.outcome.label() == label).count();
        Self {
            total: results.len(),
            passed: count("passed"),
            failed: count("failed"),
            skipped: count("skipped"),
            duration_ms,
            results,
        }
    }

    /// Skipped scenarios do not count as failures
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Configuration for the scenario runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub settings: StepSettings,

    /// Context slots cleared after every scenario
    pub scenario_slots: Vec<String>,

    /// Directory receiving `test-results.json`
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            settings: StepSettings::default(),
            scenario_slots: vec!["current_time".to_string(), "actual_urls".to_string()],
            output_dir: PathBuf::from("test-results"),
        }
    }
}

pub struct ScenarioRunner {
    registry: PatternRegistry,
    triage: Triage,
    actors: ActorPool,
    context: ExecutionContext,
    settings: StepSettings,
    cleanup_hooks: Vec<Arc<dyn CleanupHook>>,
    scenario_slots: Vec<String>,
    output_dir: PathBuf,
}

impl ScenarioRunner {
    pub fn new(
        registry: PatternRegistry,
        triage: Triage,
        actors: ActorPool,
        config: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            triage,
            actors,
            context: ExecutionContext::new(),
            settings: config.settings,
            cleanup_hooks: Vec::new(),
            scenario_slots: config.scenario_slots,
            output_dir: config.output_dir,
        }
    }

    pub fn with_cleanup_hook(mut self, hook: Arc<dyn CleanupHook>) -> Self {
        self.cleanup_hooks.push(hook);
        self
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn actors(&self) -> &ActorPool {
        &self.actors
    }

    /// Log registry audit findings; returns how many there were
    pub fn log_audit(&self) -> usize {
        let findings = self.registry.audit();
        for finding in &findings {
            warn!("Rule audit: {}", finding);
        }
        findings.len()
    }

    /// Run fetched scenarios; a fetch failure fails that scenario only
    pub async fn run_keys(&mut self, source: &dyn ScenarioSource, keys: &[String]) -> SuiteResult {
        let start = Instant::now();
        self.log_audit();
        info!("Running {} scenario(s)...", keys.len());

        let mut results = Vec::with_capacity(keys.len());
        for (n, key) in keys.iter().enumerate() {
            info!("Scenario {} ({}/{})", key, n + 1, keys.len());
            let result = match source.fetch_scenario(key).await {
                Ok(scenario) => self.run_scenario(&scenario).await,
                Err(e) => ScenarioResult {
                    key: key.clone(),
                    outcome: ScenarioOutcome::Failed {
                        reason: format!("could not fetch scenario: {}", e),
                    },
                    duration_ms: 0,
                    executed_steps: 0,
                    triage: Vec::new(),
                },
            };
            log_result(&result);
            results.push(result);
        }

        self.summarise(results, start)
    }

    /// Run scenarios already in hand
    pub async fn run_scenarios(&mut self, scenarios: &[Scenario]) -> SuiteResult {
        let start = Instant::now();
        self.log_audit();
        info!("Running {} scenario(s)...", scenarios.len());

        let mut results = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            let result = self.run_scenario(scenario).await;
            log_result(&result);
            results.push(result);
        }

        self.summarise(results, start)
    }

    fn summarise(&self, results: Vec<ScenarioResult>, start: Instant) -> SuiteResult {
        let suite = SuiteResult::tally(results, start.elapsed().as_millis() as u64);
        info!("");
        info!(
            "Scenario results: {} passed, {} failed, {} skipped ({} ms)",
            suite.passed, suite.failed, suite.skipped, suite.duration_ms
        );
        suite
    }

    /// Interpret a scenario and execute it only if every step matched
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> ScenarioResult {
        let start = Instant::now();
        let key = scenario.key.clone();
        debug!("Interpreting {} ({} steps)", key, scenario.len());

        let plan = match self.registry.interpret(scenario).into_plan() {
            Ok(plan) => plan,
            Err(unmatched) => {
                info!(
                    "{}: {} step(s) not matched, skipping execution",
                    key,
                    unmatched.len()
                );
                let triage = self.triage.triage_all(&key, &unmatched).await;
                return ScenarioResult {
                    key,
                    outcome: ScenarioOutcome::Skipped {
                        unmatched: unmatched.into_iter().map(|s| s.text).collect(),
                    },
                    duration_ms: start.elapsed().as_millis() as u64,
                    executed_steps: 0,
                    triage,
                };
            }
        };

        if plan.is_empty() {
            return ScenarioResult {
                key,
                outcome: ScenarioOutcome::Failed {
                    reason: "no steps authored; an empty scenario is reported as failed"
                        .to_string(),
                },
                duration_ms: start.elapsed().as_millis() as u64,
                executed_steps: 0,
                triage: Vec::new(),
            };
        }

        info!("All {} steps of {} matched, executing", plan.len(), key);
        let mut env = StepEnv {
            context: &mut self.context,
            actors: &mut self.actors,
            settings: &self.settings,
        };
        let run = plan.run(&mut env).await;

        let executed_steps = match &run {
            Ok(()) => plan.len(),
            Err(EngineError::StepFailed { index, .. }) => *index,
            Err(_) => 0,
        };
        let cleanup = self.finish_scenario(&key).await;

        let outcome = match (run, cleanup) {
            (Err(e), _) => ScenarioOutcome::Failed {
                reason: e.to_string(),
            },
            (Ok(()), Err(e)) => ScenarioOutcome::Failed {
                reason: e.to_string(),
            },
            (Ok(()), Ok(())) => ScenarioOutcome::Passed,
        };

        ScenarioResult {
            key,
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
            executed_steps,
            triage: Vec::new(),
        }
    }

    /// Cleanup hooks, then scenario slots, then every actor session.
    /// Every stage runs even if an earlier one failed; the first hook
    /// failure is returned.
    async fn finish_scenario(&mut self, key: &str) -> EngineResult<()> {
        let mut first_failure = None;
        for hook in &self.cleanup_hooks {
            if let Err(e) = hook.cleanup(key, &mut self.context).await {
                error!("Cleanup hook '{}' failed for {}: {}", hook.name(), key, e);
                first_failure.get_or_insert_with(|| {
                    EngineError::Cleanup(format!("{}: {}", hook.name(), e))
                });
            }
        }

        for slot in &self.scenario_slots {
            self.context.clear(slot);
        }

        let disposed = self.actors.dispose_all().await;
        debug!("Disposed {} session(s) after {}", disposed, key);

        first_failure.map_or(Ok(()), Err)
    }

    /// Write suite results to `test-results.json` in the output directory
    pub fn write_results(&self, results: &SuiteResult) -> EngineResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;

        let path = self.output_dir.join(RESULTS_FILE);
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

fn log_result(result: &ScenarioResult) {
    match &result.outcome {
        ScenarioOutcome::Passed => info!("✓ {} ({} ms)", result.key, result.duration_ms),
        ScenarioOutcome::Failed { reason } => error!("✗ {} - {}", result.key, reason),
        ScenarioOutcome::Skipped { unmatched } => {
            warn!("○ {} skipped, {} unmatched step(s)", result.key, unmatched.len())
        }
    }
}
