//! Find Command

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};

use keystep_common::KeystepConfig;
use keystep_engine::finder::{find_phrases, PhraseHits};

use super::SelectionArgs;
use crate::output::{print_info, print_list, print_warning, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct FindArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// File with one phrase per line
    #[arg(long)]
    pub phrases_file: PathBuf,

    /// Directory receiving matchReport.txt and noMatchReport.txt
    #[arg(long, default_value = ".")]
    pub output: PathBuf,
}

#[derive(Serialize)]
pub struct PhraseRow {
    pub phrase: String,
    pub scenarios: Vec<String>,
}

impl From<&PhraseHits> for PhraseRow {
    fn from(hits: &PhraseHits) -> Self {
        Self {
            phrase: hits.phrase.clone(),
            scenarios: hits.keys.clone(),
        }
    }
}

impl TableDisplay for PhraseRow {
    fn headers() -> Vec<&'static str> {
        vec!["Phrase", "Found In"]
    }

    fn row(&self) -> Vec<String> {
        let found = if self.scenarios.is_empty() {
            "-".to_string()
        } else {
            self.scenarios.join(", ")
        };
        vec![self.phrase.clone(), found]
    }
}

fn read_phrases(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading phrases from {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

pub async fn execute(args: FindArgs, config: &KeystepConfig, format: OutputFormat) -> Result<()> {
    let phrases = read_phrases(&args.phrases_file)?;
    if phrases.is_empty() {
        print_warning("No phrases to look for");
        return Ok(());
    }

    let source = args.selection.open_source(config)?;
    let keys = args.selection.keys(source.as_ref()).await?;
    let report = find_phrases(source.as_ref(), &keys, &phrases).await;

    let rows: Vec<PhraseRow> = report.phrases.iter().map(PhraseRow::from).collect();
    print_list(&rows, format);

    if !report.unreadable.is_empty() {
        print_warning(&format!("Could not read: {}", report.unreadable.join(", ")));
    }
    for path in report.write(&args.output)? {
        print_info(&format!("Wrote {}", path.display()));
    }
    Ok(())
}
