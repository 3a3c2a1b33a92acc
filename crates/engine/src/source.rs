//! Where scenarios come from.
//!
//! A source resolves a folder name to scenario keys and a key to a
//! `Scenario`. `ZephyrSource` talks to the test-management API;
//! `YamlScenarioSource` reads scenario files from disk for offline runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use keystep_common::normalize::{parse_test_data, split_key_list};
use keystep_common::{Scenario, TestDataRecord, TestStepRecord};

use crate::error::{EngineError, EngineResult};

#[async_trait]
pub trait ScenarioSource: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Scenario keys in a folder and all of its sub-folders
    async fn discover(&self, folder: &str) -> EngineResult<Vec<String>>;

    /// Scenario ready to run
    async fn fetch_scenario(&self, key: &str) -> EngineResult<Scenario>;

    /// Scenario as authored, without preparing a run. Sources that do
    /// extra work to prepare a run (creating executions) override this.
    async fn fetch_definition(&self, key: &str) -> EngineResult<Scenario> {
        self.fetch_scenario(key).await
    }
}

/// Keys to run: the explicit list when one is given, else discovery
pub async fn resolve_keys(
    source: &dyn ScenarioSource,
    folder: &str,
    explicit: Option<&str>,
) -> EngineResult<Vec<String>> {
    if let Some(list) = explicit {
        let keys = split_key_list(list);
        if !keys.is_empty() {
            info!("Running {} explicitly listed scenario(s)", keys.len());
            return Ok(keys);
        }
    }
    let keys = source.discover(folder).await?;
    info!(
        "Discovered {} scenario(s) in '{}' via {}",
        keys.len(),
        folder,
        source.name()
    );
    Ok(keys)
}

/// Keep the first occurrence of every key
pub(crate) fn dedup_keys(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

/// Test data written either as a map or as raw `key: value<br>` text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTestData {
    Fields(BTreeMap<String, String>),
    Text(String),
}

impl RawTestData {
    fn into_record(self) -> TestDataRecord {
        match self {
            RawTestData::Fields(fields) => fields.into_iter().collect(),
            RawTestData::Text(raw) => parse_test_data(&raw),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDocument {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expected_result: String,
    #[serde(default)]
    pub test_data: Option<RawTestData>,
}

/// One scenario file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDocument {
    /// Defaults to the file stem
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<StepDocument>,
}

impl ScenarioDocument {
    pub fn from_yaml(content: &str) -> EngineResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn into_scenario(self, key: String) -> Scenario {
        let records: Vec<TestStepRecord> = self
            .steps
            .into_iter()
            .map(|step| TestStepRecord {
                description: step.description,
                expected_result: step.expected_result,
                test_data: step
                    .test_data
                    .map(RawTestData::into_record)
                    .unwrap_or_default(),
            })
            .collect();
        Scenario::from_records(key, &records)
    }
}

#[derive(Debug, Clone)]
struct IndexedScenario {
    key: String,
    /// Directory names between the root and the file
    folders: Vec<String>,
    path: PathBuf,
    /// Why the file could not be parsed when it was indexed
    broken: Option<String>,
}

/// Scenarios stored as YAML files; sub-directories are folders
#[derive(Debug, Clone)]
pub struct YamlScenarioSource {
    root: PathBuf,
    excluded_folder: String,
    index: Vec<IndexedScenario>,
}

impl YamlScenarioSource {
    /// Index every `.yaml`/`.yml` file below `root`
    pub fn open(root: &Path, excluded_folder: impl Into<String>) -> EngineResult<Self> {
        if !root.is_dir() {
            return Err(EngineError::Source(format!(
                "scenario directory {} does not exist",
                root.display()
            )));
        }

        let mut index = Vec::new();
        for entry in walkdir::WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let path = entry.path().to_path_buf();
            // a broken file is indexed under its stem and fails only its own fetch
            let (key, broken) = match std::fs::read_to_string(&path)
                .map_err(EngineError::from)
                .and_then(|content| ScenarioDocument::from_yaml(&content))
            {
                Ok(document) => (document.key.unwrap_or_else(|| file_stem(&path)), None),
                Err(e) => {
                    warn!("Could not parse {}: {}", path.display(), e);
                    (file_stem(&path), Some(e.to_string()))
                }
            };
            let folders = path
                .parent()
                .and_then(|dir| dir.strip_prefix(root).ok())
                .map(|rel| {
                    rel.components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            debug!("Indexed {} from {}", key, path.display());
            index.push(IndexedScenario {
                key,
                folders,
                path,
                broken,
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            excluded_folder: excluded_folder.into(),
            index,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl ScenarioSource for YamlScenarioSource {
    fn name(&self) -> &str {
        "yaml"
    }

    async fn discover(&self, folder: &str) -> EngineResult<Vec<String>> {
        let mut found = false;
        let mut keys = Vec::new();
        for scenario in &self.index {
            let Some(pos) = scenario.folders.iter().position(|f| f == folder) else {
                continue;
            };
            found = true;
            // nested under the excluded folder somewhere below the match
            if scenario.folders[pos + 1..]
                .iter()
                .any(|f| *f == self.excluded_folder)
            {
                continue;
            }
            keys.push(scenario.key.clone());
        }

        if !found {
            return Err(EngineError::Source(format!(
                "folder '{}' not found under {}",
                folder,
                self.root.display()
            )));
        }
        Ok(dedup_keys(keys))
    }

    async fn fetch_scenario(&self, key: &str) -> EngineResult<Scenario> {
        let indexed = self
            .index
            .iter()
            .find(|s| s.key == key)
            .ok_or_else(|| EngineError::ScenarioNotFound(key.to_string()))?;
        if let Some(reason) = &indexed.broken {
            return Err(EngineError::Source(format!(
                "{}: {}",
                indexed.path.display(),
                reason
            )));
        }
        let content = std::fs::read_to_string(&indexed.path)?;
        let document = ScenarioDocument::from_yaml(&content)?;
        let scenario = document.into_scenario(indexed.key.clone());
        if scenario.is_empty() {
            warn!("Scenario {} has no steps", key);
        }
        Ok(scenario)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "Smoke/login.yaml",
            r#"
key: KS-T1
steps:
  - description: "<p>Open the login page.</p>"
    expected_result: "The login page is displayed"
    test_data: "username: alice<br>url: https://example.com/login"
"#,
        );
        write(
            dir.path(),
            "Smoke/Checkout/pay.yml",
            r#"
steps:
  - description: "Click Pay"
    test_data:
      amount: "10"
"#,
        );
        write(
            dir.path(),
            "Smoke/Base Test Cases/base.yaml",
            "key: KS-T0\nsteps: []\n",
        );
        dir
    }

    #[tokio::test]
    async fn test_discover_recurses_and_skips_base_cases() {
        let dir = fixture();
        let source = YamlScenarioSource::open(dir.path(), "Base Test Cases").unwrap();
        assert_eq!(source.len(), 3);

        let mut keys = source.discover("Smoke").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["KS-T1", "pay"]);
        assert_eq!(source.discover("Checkout").await.unwrap(), vec!["pay"]);
        assert!(source.discover("Nope").await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_builds_normalised_scenario() {
        let dir = fixture();
        let source = YamlScenarioSource::open(dir.path(), "Base Test Cases").unwrap();

        let scenario = source.fetch_scenario("KS-T1").await.unwrap();
        let texts: Vec<&str> = scenario.texts().collect();
        assert_eq!(texts, vec!["Open the login page", "The login page is displayed"]);
        assert_eq!(scenario.steps[1].test_data.get("url"), Some("https://example.com/login"));

        let pay = source.fetch_scenario("pay").await.unwrap();
        let texts: Vec<&str> = pay.texts().collect();
        assert_eq!(texts, vec!["Click Pay", "No expected result"]);
        assert_eq!(pay.steps[1].test_data.get("amount"), Some("10"));

        assert!(matches!(
            source.fetch_scenario("KS-T404").await,
            Err(EngineError::ScenarioNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_explicit_keys_override_discovery() {
        let dir = fixture();
        let source = YamlScenarioSource::open(dir.path(), "Base Test Cases").unwrap();
        let keys = resolve_keys(&source, "Smoke", Some(" KS-T9, KS-T1 ,,")).await.unwrap();
        assert_eq!(keys, vec!["KS-T9", "KS-T1"]);

        let keys = resolve_keys(&source, "Checkout", Some("  ")).await.unwrap();
        assert_eq!(keys, vec!["pay"]);
    }

    #[tokio::test]
    async fn test_broken_file_fails_only_its_scenario() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "Smoke/good.yaml",
            "key: KS-T1\nsteps:\n  - description: Click Save\n",
        );
        write(dir.path(), "Smoke/bad.yaml", "key: [unclosed");

        let source = YamlScenarioSource::open(dir.path(), "Base Test Cases").unwrap();
        let mut keys = source.discover("Smoke").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["KS-T1", "bad"]);

        let good = source.fetch_scenario("KS-T1").await.unwrap();
        assert_eq!(good.texts().next(), Some("Click Save"));
        match source.fetch_scenario("bad").await {
            Err(EngineError::Source(reason)) => assert!(reason.contains("bad.yaml")),
            other => panic!("expected a source error, got {:?}", other),
        }
    }

    #[test]
    fn test_dedup_keeps_first_seen_order() {
        let keys = dedup_keys(["B", "A", "B", "C", "A"].map(String::from));
        assert_eq!(keys, vec!["B", "A", "C"]);
    }
}
