//! Rules Command
//!
//! Lists the built-in step rules in priority order.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use keystep_engine::library::standard_registry;
use keystep_engine::PatternRule;

use crate::output::{print_error, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct RulesArgs {
    /// Check every rule's examples against registration order
    #[arg(long)]
    pub audit: bool,
}

#[derive(Serialize)]
pub struct RuleRow {
    pub priority: usize,
    pub name: String,
    pub pattern: String,
    pub examples: Vec<String>,
}

impl RuleRow {
    fn new(priority: usize, rule: &PatternRule) -> Self {
        Self {
            priority,
            name: rule.name().to_string(),
            pattern: rule.pattern().to_string(),
            examples: rule.examples().to_vec(),
        }
    }
}

impl TableDisplay for RuleRow {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Rule", "Pattern", "Example"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.priority.to_string(),
            self.name.clone(),
            self.pattern.clone(),
            self.examples.first().cloned().unwrap_or_default(),
        ]
    }
}

pub fn execute(args: RulesArgs, format: OutputFormat) -> Result<()> {
    let registry = standard_registry()?;
    let rows: Vec<RuleRow> = registry
        .rules()
        .iter()
        .enumerate()
        .map(|(i, rule)| RuleRow::new(i + 1, rule))
        .collect();
    print_list(&rows, format);

    if args.audit {
        let findings = registry.audit();
        if findings.is_empty() {
            print_success("Every example is claimed by its own rule");
        } else {
            for finding in &findings {
                print_error(&finding.to_string());
            }
            anyhow::bail!("{} audit finding(s)", findings.len());
        }
    }
    Ok(())
}
