//! Append-only report of unmatched steps for human review

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::triage::TriageOutcome;

pub const UNMATCHED_REPORT_FILE: &str = "unmatched_steps_report.txt";

#[derive(Debug, Clone)]
pub struct UnmatchedReport {
    path: PathBuf,
}

impl UnmatchedReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Report file named `unmatched_steps_report.txt` inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(UNMATCHED_REPORT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one unmatched step. Write failures are logged and dropped.
    pub fn append(&self, step_text: &str, outcome: &TriageOutcome) {
        let entry = format!(
            "No match for step: \"{}\"\n{}\n",
            step_text,
            outcome.report_line()
        );
        if let Err(e) = self.write(&entry) {
            warn!("Could not write to {}: {}", self.path.display(), e);
        }
    }

    fn write(&self, entry: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(entry.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_entries_accumulate() {
        let dir = TempDir::new().unwrap();
        let report = UnmatchedReport::in_dir(&dir.path().join("reports"));

        report.append(
            "Dance a little",
            &TriageOutcome::CreationDisabled {
                fingerprint: "abc".to_string(),
            },
        );
        report.append(
            "Sing",
            &TriageOutcome::Filed {
                fingerprint: "def".to_string(),
                record: "KS-9".to_string(),
            },
        );

        let content = std::fs::read_to_string(report.path()).unwrap();
        assert_eq!(
            content,
            "No match for step: \"Dance a little\"\nTicket creation skipped by config\n\
             No match for step: \"Sing\"\nNew ticket created: KS-9 (def)\n"
        );
    }
}
