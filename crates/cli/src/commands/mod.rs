//! CLI Commands

pub mod find;
pub mod rules;
pub mod run;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::PathBuf;

use keystep_common::KeystepConfig;
use keystep_engine::source::{resolve_keys, ScenarioSource, YamlScenarioSource};
use keystep_engine::zephyr::ZephyrSource;

/// Where scenarios come from
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum SourceKind {
    /// Test-management service
    #[default]
    Zephyr,
    /// YAML files under `--specs`
    Yaml,
}

/// Scenario selection shared by `run` and `find`
#[derive(Args)]
pub struct SelectionArgs {
    /// Folder whose scenarios are selected, including sub-folders
    #[arg(long, env = "FOLDER_NAME")]
    pub folder: Option<String>,

    /// Comma separated scenario keys; overrides folder discovery
    #[arg(long, env = "TEST_CASES")]
    pub test_cases: Option<String>,

    /// Scenario source
    #[arg(long, value_enum, default_value = "zephyr")]
    pub source: SourceKind,

    /// Root directory of YAML scenarios
    #[arg(long, default_value = "specs")]
    pub specs: PathBuf,
}

impl SelectionArgs {
    pub fn open_source(&self, config: &KeystepConfig) -> Result<Box<dyn ScenarioSource>> {
        Ok(match self.source {
            SourceKind::Zephyr => Box::new(
                ZephyrSource::from_config(&config.zephyr)
                    .context("connecting to test management")?,
            ),
            SourceKind::Yaml => Box::new(
                YamlScenarioSource::open(&self.specs, config.zephyr.excluded_folder.clone())
                    .with_context(|| format!("reading scenarios under {}", self.specs.display()))?,
            ),
        })
    }

    /// Keys selected by `--test-cases`, or discovered under `--folder`
    pub async fn keys(&self, source: &dyn ScenarioSource) -> Result<Vec<String>> {
        let explicit = self.test_cases.as_deref().filter(|list| !list.trim().is_empty());
        let folder = match (&self.folder, explicit) {
            (Some(folder), _) => folder.as_str(),
            (None, Some(_)) => "",
            (None, None) => anyhow::bail!("either --folder or --test-cases is required"),
        };
        Ok(resolve_keys(source, folder, explicit).await?)
    }
}
