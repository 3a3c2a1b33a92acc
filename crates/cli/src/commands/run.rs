//! Run Command

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use keystep_common::{KeystepConfig, ScenarioOutcome};
use keystep_engine::jira::JiraTracker;
use keystep_engine::library::standard_registry;
use keystep_engine::recording::RecordingFactory;
use keystep_engine::report::UnmatchedReport;
use keystep_engine::webdriver::WebDriverFactory;
use keystep_engine::{
    ActorPool, InMemoryTracker, IssueTracker, RunnerConfig, ScenarioResult, ScenarioRunner,
    SessionFactory, StepSettings, Triage,
};

use super::SelectionArgs;
use crate::output::{print_error, print_list, print_success, print_warning, OutputFormat, TableDisplay};

/// Longest failure reason shown in the summary table
const REASON_DISPLAY_LENGTH: usize = 80;

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Directory receiving test-results.json
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Do not look up or file tracker records for unmatched steps
    #[arg(long)]
    pub no_tracker: bool,

    /// Drive recording sessions instead of a WebDriver hub
    #[arg(long)]
    pub dry_run: bool,
}

/// Scenario row for the summary table
#[derive(Serialize)]
pub struct ScenarioRow {
    pub key: String,
    pub status: String,
    pub steps: usize,
    pub duration_ms: u64,
    pub detail: String,
}

impl From<&ScenarioResult> for ScenarioRow {
    fn from(result: &ScenarioResult) -> Self {
        let detail = match &result.outcome {
            ScenarioOutcome::Passed => String::new(),
            ScenarioOutcome::Failed { reason } => reason.clone(),
            ScenarioOutcome::Skipped { unmatched } => {
                format!("unmatched: {}", unmatched.join(" | "))
            }
        };
        Self {
            key: result.key.clone(),
            status: result.outcome.label().to_string(),
            steps: result.executed_steps,
            duration_ms: result.duration_ms,
            detail,
        }
    }
}

impl TableDisplay for ScenarioRow {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "Status", "Steps", "Duration", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        let status = match self.status.as_str() {
            "passed" => self.status.green().to_string(),
            "failed" => self.status.red().to_string(),
            _ => self.status.yellow().to_string(),
        };
        let detail = if self.detail.chars().count() > REASON_DISPLAY_LENGTH {
            let cut: String = self.detail.chars().take(REASON_DISPLAY_LENGTH).collect();
            format!("{}…", cut)
        } else {
            self.detail.clone()
        };
        vec![
            self.key.clone(),
            status,
            self.steps.to_string(),
            format!("{}ms", self.duration_ms),
            detail,
        ]
    }
}

pub async fn execute(args: RunArgs, config: &KeystepConfig, format: OutputFormat) -> Result<()> {
    let source = args.selection.open_source(config)?;
    let keys = args.selection.keys(source.as_ref()).await?;
    if keys.is_empty() {
        print_warning("No scenarios selected");
        return Ok(());
    }

    let tracker_enabled = !(args.no_tracker || args.dry_run);
    let tracker: Arc<dyn IssueTracker> = if tracker_enabled {
        Arc::new(JiraTracker::from_config(&config.tracker).context("connecting to the tracker")?)
    } else {
        Arc::new(InMemoryTracker::new())
    };
    let create_new = tracker_enabled && config.tracker.create_new_tasks_for_missing_steps;
    let triage = Triage::new(
        tracker,
        create_new,
        UnmatchedReport::in_dir(&config.runner.report_dir),
    );

    let factory: Arc<dyn SessionFactory> = if args.dry_run {
        Arc::new(RecordingFactory::new(config.actors.keys(), true))
    } else {
        Arc::new(WebDriverFactory::new(&config.webdriver, config.actors.clone())?)
    };

    let environment = config.environment()?;
    info!(
        "Running {} scenario(s) against {} ({})",
        keys.len(),
        environment.base_url,
        config.environment_name()
    );

    let runner_config = RunnerConfig {
        settings: StepSettings {
            base_url: environment.base_url.clone(),
            wait_timeout: Duration::from_millis(config.webdriver.wait_timeout_ms),
        },
        scenario_slots: config.runner.scenario_slots.clone(),
        output_dir: args
            .output
            .unwrap_or_else(|| config.runner.output_dir.clone()),
    };

    let mut runner = ScenarioRunner::new(
        standard_registry()?,
        triage,
        ActorPool::new(factory),
        runner_config,
    );

    let suite = runner.run_keys(source.as_ref(), &keys).await;
    let path = runner.write_results(&suite)?;

    let rows: Vec<ScenarioRow> = suite.results.iter().map(ScenarioRow::from).collect();
    print_list(&rows, format);

    let summary = format!(
        "{} passed, {} failed, {} skipped in {}ms ({})",
        suite.passed,
        suite.failed,
        suite.skipped,
        suite.duration_ms,
        path.display()
    );
    if suite.has_failures() {
        print_error(&summary);
        std::process::exit(1);
    }
    print_success(&summary);
    Ok(())
}
