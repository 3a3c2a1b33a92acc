//! Issue tracker backed by a Jira-style REST API.
//!
//! Records for unmatched steps are tasks under a parent epic whose summary
//! is the step fingerprint; the step text goes in the description.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use keystep_common::config::{secret_from_env, TrackerConfig};

use crate::error::{EngineError, EngineResult};
use crate::triage::{IssueTracker, TrackingRecord};

const SEARCH_LIMIT: u32 = 10_000;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    issues: Option<Vec<IssueRef>>,
}

#[derive(Debug, Deserialize)]
struct IssueRef {
    key: String,
}

pub struct JiraTracker {
    client: reqwest::Client,
    config: TrackerConfig,
    token: String,
}

impl JiraTracker {
    pub fn new(config: TrackerConfig, token: impl Into<String>) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            config,
            token: token.into(),
        })
    }

    pub fn from_config(config: &TrackerConfig) -> EngineResult<Self> {
        let token = secret_from_env(&config.token_env)?;
        Self::new(config.clone(), token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Open tasks under the parent epic whose summary mentions the fingerprint
    pub fn search_jql(&self, fingerprint: &str) -> String {
        format!(
            "Project={} AND type=Task and parentEpic={} and summary ~\"{}\" and status != Done",
            self.config.project_key, self.config.parent_epic, fingerprint
        )
    }
}

#[async_trait]
impl IssueTracker for JiraTracker {
    async fn find_by_fingerprint(&self, fingerprint: &str) -> EngineResult<Option<TrackingRecord>> {
        let response = self
            .client
            .get(self.url("rest/api/3/search"))
            .header("Authorization", &self.token)
            .header("Accept", "application/json")
            .query(&[
                ("maxResults", SEARCH_LIMIT.to_string()),
                ("fields", "Key,Summary".to_string()),
                ("jql", self.search_jql(fingerprint)),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::Tracker(format!(
                "search returned {}",
                response.status()
            )));
        }
        let body: SearchResponse = response.json().await?;
        let issues = body
            .issues
            .ok_or_else(|| EngineError::Tracker("search response had no issues list".to_string()))?;
        debug!("{} open issue(s) for {}", issues.len(), fingerprint);

        Ok(issues.into_iter().next().map(|issue| TrackingRecord {
            id: issue.key,
            fingerprint: fingerprint.to_string(),
        }))
    }

    async fn create_record(&self, fingerprint: &str, summary: &str) -> EngineResult<String> {
        let body = json!({
            "fields": {
                "project": { "key": self.config.project_key },
                "issuetype": { "id": self.config.task_type_id },
                "summary": fingerprint,
                "parent": { "key": self.config.parent_epic },
                "description": summary,
            }
        });
        let response = self
            .client
            .post(self.url("rest/api/2/issue"))
            .header("Authorization", &self.token)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::Tracker(format!(
                "create returned {}",
                response.status()
            )));
        }
        let created: IssueRef = response.json().await?;
        Ok(created.key)
    }
}
