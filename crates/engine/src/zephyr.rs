//! Scenario source backed by a Zephyr-Scale-style test-management API.
//!
//! Discovery walks the folder tree (minus the shared "Base Test Cases"
//! folder). Fetching a scenario for a run goes through the test case's
//! latest execution: it is looked up, created when missing, synced with
//! the test case, and its steps become the scenario.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use keystep_common::config::{secret_from_env, ZephyrConfig};
use keystep_common::normalize::parse_test_data;
use keystep_common::{Scenario, TestStepRecord};

use crate::backoff::{retry, Backoff};
use crate::error::{EngineError, EngineResult};
use crate::source::{dedup_keys, ScenarioSource};

const ZERO_WIDTH_SPACE: char = '\u{200B}';

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default = "Vec::new")]
    values: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct KeyRef {
    key: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineStep {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    expected_result: Option<String>,
    #[serde(default)]
    test_data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalledTest {
    test_case_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepEntry {
    #[serde(default)]
    inline: Option<InlineStep>,
    #[serde(default)]
    test_case: Option<CalledTest>,
}

impl InlineStep {
    fn into_record(self) -> TestStepRecord {
        TestStepRecord {
            description: self.description.unwrap_or_default(),
            expected_result: self.expected_result.unwrap_or_default(),
            test_data: self
                .test_data
                .as_deref()
                .map(parse_test_data)
                .unwrap_or_default(),
        }
    }
}

pub struct ZephyrSource {
    client: reqwest::Client,
    config: ZephyrConfig,
    token: String,
    execution_backoff: Backoff,
}

impl ZephyrSource {
    pub fn new(config: ZephyrConfig, token: impl Into<String>) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            config,
            token: token.into(),
            // three lookups in total
            execution_backoff: Backoff::new(2, Duration::from_secs(1)),
        })
    }

    /// Build from config, reading the token from its environment variable
    pub fn from_config(config: &ZephyrConfig) -> EngineResult<Self> {
        let token = secret_from_env(&config.token_env)?;
        Self::new(config.clone(), token)
    }

    pub fn with_execution_backoff(mut self, backoff: Backoff) -> Self {
        self.execution_backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> EngineResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .header("Authorization", &self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Source(format!("GET {} returned {}", path, status)));
        }
        let body = response.text().await?.replace(ZERO_WIDTH_SPACE, "");
        Ok(serde_json::from_str(&body)?)
    }

    fn page_query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("maxResults", self.config.max_results.to_string()),
            ("startAt", "0".to_string()),
        ]
    }

    /// Every test-case folder in the project
    pub async fn folders(&self) -> EngineResult<Vec<Folder>> {
        let mut query = self.page_query();
        query.push(("projectKey", self.config.project_key.clone()));
        query.push(("folderType", "TEST_CASE".to_string()));
        let page: Page<Folder> = self.get_json("folders", &query).await?;
        Ok(page.values)
    }

    /// Ids of the folder's descendants, depth first, skipping the excluded folder
    pub fn descendant_ids(&self, folders: &[Folder], parent: u64) -> Vec<u64> {
        let mut ids = Vec::new();
        for child in folders
            .iter()
            .filter(|f| f.parent_id == Some(parent) && f.name != self.config.excluded_folder)
        {
            ids.push(child.id);
            ids.extend(self.descendant_ids(folders, child.id));
        }
        ids
    }

    pub async fn test_case_keys(&self, folder_id: u64) -> EngineResult<Vec<String>> {
        let mut query = self.page_query();
        query.push(("projectKey", self.config.project_key.clone()));
        query.push(("folderId", folder_id.to_string()));
        let page: Page<KeyRef> = self.get_json("testcases", &query).await?;
        debug!("{} test case(s) in folder {}", page.values.len(), folder_id);
        Ok(page.values.into_iter().map(|k| k.key).collect())
    }

    /// Key of the latest execution, creating one when none is recent enough
    pub async fn latest_execution(&self, test_case_key: &str) -> EngineResult<String> {
        let what = format!("latest execution of {}", test_case_key);
        retry(self.execution_backoff, &what, || async move {
            match self.find_latest_execution(test_case_key).await? {
                Some(key) => Ok(key),
                None => {
                    info!("No recent execution for {}, creating one", test_case_key);
                    self.create_execution(test_case_key).await?;
                    Err(EngineError::Source(format!(
                        "no execution for {} yet",
                        test_case_key
                    )))
                }
            }
        })
        .await
    }

    async fn find_latest_execution(&self, test_case_key: &str) -> EngineResult<Option<String>> {
        let since = Utc::now() - chrono::Duration::days(self.config.latest_execution_days);
        let mut query = self.page_query();
        query.push(("projectKey", self.config.project_key.clone()));
        query.push(("testCase", test_case_key.to_string()));
        query.push((
            "actualEndDateAfter",
            since.to_rfc3339_opts(SecondsFormat::Millis, true),
        ));
        query.push(("onlyLastExecutions", "true".to_string()));

        let page: Page<KeyRef> = self.get_json("testexecutions", &query).await?;
        if page.total.unwrap_or(page.values.len() as u64) == 0 {
            return Ok(None);
        }
        Ok(page.values.into_iter().last().map(|e| e.key))
    }

    pub async fn create_execution(&self, test_case_key: &str) -> EngineResult<()> {
        let body = json!({
            "projectKey": self.config.project_key,
            "statusName": "Not Executed",
            "testCaseKey": test_case_key,
            "testCycleKey": format!("{}-R1", self.config.project_key),
        });
        let response = self
            .client
            .post(self.url("testexecutions"))
            .header("Authorization", &self.token)
            .json(&body)
            .send()
            .await?;
        if response.status().is_success() {
            debug!("Created execution for {}", test_case_key);
        } else {
            warn!(
                "Creating execution for {} returned {}",
                test_case_key,
                response.status()
            );
        }
        Ok(())
    }

    /// Refresh an execution's steps from its test case
    pub async fn sync_execution(&self, execution_key: &str) -> EngineResult<()> {
        let path = format!("testexecutions/{}/teststeps/sync", execution_key);
        let response = self
            .client
            .post(self.url(&path))
            .header("Authorization", &self.token)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!("Sync of {} returned {}", execution_key, response.status());
        }
        Ok(())
    }

    pub async fn execution_steps(&self, execution_key: &str) -> EngineResult<Vec<TestStepRecord>> {
        let path = format!("testexecutions/{}/teststeps", execution_key);
        let page: Page<StepEntry> = self.get_json(&path, &self.page_query()).await?;
        if page.values.is_empty() {
            warn!("Execution {} has no steps", execution_key);
        }
        Ok(page
            .values
            .into_iter()
            .filter_map(|entry| entry.inline)
            .map(InlineStep::into_record)
            .collect())
    }

    /// Test case steps as authored; calls to other tests are expanded one level
    pub async fn test_case_steps(&self, test_case_key: &str) -> EngineResult<Vec<TestStepRecord>> {
        let path = format!("testcases/{}/teststeps", test_case_key);
        let page: Page<StepEntry> = self.get_json(&path, &self.page_query()).await?;

        let mut records = Vec::new();
        for entry in page.values {
            match (entry.inline, entry.test_case) {
                (Some(inline), _) => records.push(inline.into_record()),
                (None, Some(called)) => {
                    let path = format!("testcases/{}/teststeps", called.test_case_key);
                    let called: Page<StepEntry> = self.get_json(&path, &self.page_query()).await?;
                    records.extend(
                        called
                            .values
                            .into_iter()
                            .filter_map(|e| e.inline)
                            .map(InlineStep::into_record),
                    );
                }
                (None, None) => {}
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl ScenarioSource for ZephyrSource {
    fn name(&self) -> &str {
        "zephyr"
    }

    async fn discover(&self, folder: &str) -> EngineResult<Vec<String>> {
        let folders = self.folders().await?;
        let root = folders
            .iter()
            .find(|f| f.name == folder)
            .ok_or_else(|| EngineError::Source(format!("folder '{}' not found", folder)))?;

        let mut ids = vec![root.id];
        ids.extend(self.descendant_ids(&folders, root.id));

        let mut keys = Vec::new();
        for id in ids {
            keys.extend(self.test_case_keys(id).await?);
        }
        Ok(dedup_keys(keys))
    }

    async fn fetch_scenario(&self, key: &str) -> EngineResult<Scenario> {
        let execution = self.latest_execution(key).await?;
        info!("Using execution {} for {}", execution, key);
        self.sync_execution(&execution).await?;
        let records = self.execution_steps(&execution).await?;
        Ok(Scenario::from_records(key, &records))
    }

    async fn fetch_definition(&self, key: &str) -> EngineResult<Scenario> {
        let records = self.test_case_steps(key).await?;
        Ok(Scenario::from_records(key, &records))
    }
}
