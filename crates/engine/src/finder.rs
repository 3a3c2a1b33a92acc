//! Phrase search across the scenarios of a folder.
//!
//! Answers "which scenarios still use this wording?" before a rule is
//! changed or written. Results go to `matchReport.txt` (phrase and the keys
//! using it) and `noMatchReport.txt` (phrases no scenario uses).

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use keystep_common::normalize::normalize_step_text;

use crate::error::EngineResult;
use crate::source::ScenarioSource;

pub const MATCH_REPORT_FILE: &str = "matchReport.txt";
pub const NO_MATCH_REPORT_FILE: &str = "noMatchReport.txt";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhraseHits {
    pub phrase: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FinderReport {
    /// One entry per phrase, in the order given
    pub phrases: Vec<PhraseHits>,
    /// Scenarios that could not be fetched
    pub unreadable: Vec<String>,
}

impl FinderReport {
    pub fn found(&self) -> impl Iterator<Item = &PhraseHits> {
        self.phrases.iter().filter(|p| !p.keys.is_empty())
    }

    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.phrases
            .iter()
            .filter(|p| p.keys.is_empty())
            .map(|p| p.phrase.as_str())
    }

    /// Write whichever of the two reports has content
    pub fn write(&self, dir: &Path) -> EngineResult<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        let found: Vec<String> = self
            .found()
            .map(|p| format!("\"{}\" was found in {}", p.phrase, p.keys.join(", ")))
            .collect();
        if found.is_empty() {
            info!("No phrase was found in any scenario");
        } else {
            let path = dir.join(MATCH_REPORT_FILE);
            std::fs::write(&path, found.join("\n"))?;
            written.push(path);
        }

        let missing: Vec<String> = self
            .missing()
            .map(|phrase| format!("\"{}\" was not found.", phrase))
            .collect();
        if missing.is_empty() {
            info!("Every phrase was found in at least one scenario");
        } else {
            let path = dir.join(NO_MATCH_REPORT_FILE);
            std::fs::write(&path, missing.join("\n"))?;
            written.push(path);
        }

        Ok(written)
    }
}

/// Search the authored steps of every scenario for each phrase
pub async fn find_phrases(
    source: &dyn ScenarioSource,
    keys: &[String],
    phrases: &[String],
) -> FinderReport {
    let needles: Vec<String> = phrases.iter().map(|p| normalize_step_text(p)).collect();
    let mut report = FinderReport {
        phrases: phrases
            .iter()
            .map(|p| PhraseHits {
                phrase: p.clone(),
                keys: Vec::new(),
            })
            .collect(),
        unreadable: Vec::new(),
    };

    for key in keys {
        let scenario = match source.fetch_definition(key).await {
            Ok(scenario) => scenario,
            Err(e) => {
                warn!("Skipping {}: {}", key, e);
                report.unreadable.push(key.clone());
                continue;
            }
        };
        for (needle, hits) in needles.iter().zip(report.phrases.iter_mut()) {
            if needle.is_empty() || hits.keys.contains(key) {
                continue;
            }
            if scenario.texts().any(|text| text.contains(needle.as_str())) {
                hits.keys.push(key.clone());
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, EngineResult};
    use async_trait::async_trait;
    use keystep_common::{Scenario, TestDataRecord};
    use tempfile::TempDir;

    struct Fixed(Vec<Scenario>);

    #[async_trait]
    impl ScenarioSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn discover(&self, _folder: &str) -> EngineResult<Vec<String>> {
            Ok(self.0.iter().map(|s| s.key.clone()).collect())
        }

        async fn fetch_scenario(&self, key: &str) -> EngineResult<Scenario> {
            self.0
                .iter()
                .find(|s| s.key == key)
                .cloned()
                .ok_or_else(|| EngineError::ScenarioNotFound(key.to_string()))
        }
    }

    #[tokio::test]
    async fn test_reports_found_and_missing_phrases() {
        let source = Fixed(vec![
            Scenario::new("KS-T1")
                .step("Search for keyword is accessed", TestDataRecord::new())
                .step("Configuration is saved successfully", TestDataRecord::new()),
            Scenario::new("KS-T2").step("Configuration is saved successfully", TestDataRecord::new()),
        ]);
        let keys = vec!["KS-T1".to_string(), "KS-T2".to_string(), "KS-T3".to_string()];
        let phrases = vec![
            "Configuration is saved successfully.".to_string(),
            "Search for &quot;keyword&quot;".to_string(),
            "Enable the rule".to_string(),
        ];

        let report = find_phrases(&source, &keys, &phrases).await;
        assert_eq!(report.phrases[0].keys, vec!["KS-T1", "KS-T2"]);
        assert_eq!(report.phrases[1].keys, vec!["KS-T1"]);
        assert_eq!(report.missing().collect::<Vec<_>>(), vec!["Enable the rule"]);
        assert_eq!(report.unreadable, vec!["KS-T3"]);

        let dir = TempDir::new().unwrap();
        let written = report.write(dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        let found = std::fs::read_to_string(dir.path().join(MATCH_REPORT_FILE)).unwrap();
        assert!(found.starts_with("\"Configuration is saved successfully.\" was found in KS-T1, KS-T2"));
        let missing = std::fs::read_to_string(dir.path().join(NO_MATCH_REPORT_FILE)).unwrap();
        assert_eq!(missing, "\"Enable the rule\" was not found.");
    }
}
