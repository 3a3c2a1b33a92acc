//! Keystep configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::normalize::normalize_role;

/// Environment variable selecting the application environment
pub const ENVIRONMENT_VAR: &str = "KEYSTEP_ENV";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystepConfig {
    /// Application under test
    pub app: AppConfig,

    /// Test-case-management service
    pub zephyr: ZephyrConfig,

    /// Issue tracker used for unmatched-step triage
    pub tracker: TrackerConfig,

    /// WebDriver hub
    pub webdriver: WebDriverConfig,

    /// Actor roles keyed by role name
    pub actors: BTreeMap<String, ActorConfig>,

    /// Runner behaviour
    pub runner: RunnerSettings,
}

/// Application environments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Environment used when `KEYSTEP_ENV` is unset or unknown
    pub default_environment: String,

    pub environments: BTreeMap<String, EnvironmentConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut environments = BTreeMap::new();
        environments.insert(
            "stg".to_string(),
            EnvironmentConfig {
                base_url: "http://127.0.0.1:8080".to_string(),
            },
        );
        Self {
            default_environment: "stg".to_string(),
            environments,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub base_url: String,
}

/// Zephyr-Scale-style test management API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZephyrConfig {
    pub base_url: String,
    pub project_key: String,
    pub max_results: u32,

    /// How far back to look for the latest execution
    pub latest_execution_days: i64,

    /// Folder name excluded from discovery
    pub excluded_folder: String,

    /// Environment variable holding the API token
    pub token_env: String,
}

impl Default for ZephyrConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.zephyrscale.smartbear.com/v2".to_string(),
            project_key: "KS".to_string(),
            max_results: 1000,
            latest_execution_days: 30,
            excluded_folder: "Base Test Cases".to_string(),
            token_env: "ZEPHYR_AUTH_TOKEN".to_string(),
        }
    }
}

/// Jira-style issue tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub base_url: String,
    pub project_key: String,
    pub parent_epic: String,
    pub task_type_id: String,

    /// File a new task for unmatched steps that are not tracked yet
    pub create_new_tasks_for_missing_steps: bool,

    /// Environment variable holding the API token
    pub token_env: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://example.atlassian.net".to_string(),
            project_key: "KS".to_string(),
            parent_epic: "KS-1".to_string(),
            task_type_id: "10002".to_string(),
            create_new_tasks_for_missing_steps: true,
            token_env: "JIRA_API_TOKEN".to_string(),
        }
    }
}

/// WebDriver hub settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    pub hub_url: String,
    pub browser: String,
    pub headless: bool,

    /// Upper bound for any single HTTP call to the hub
    pub request_timeout_ms: u64,

    /// Default bound for element waits
    pub wait_timeout_ms: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            hub_url: "http://127.0.0.1:4444".to_string(),
            browser: "chrome".to_string(),
            headless: true,
            request_timeout_ms: 60_000,
            wait_timeout_ms: 10_000,
        }
    }
}

/// One actor role
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Hub node capability (`nodename:applicationName`) routing the session
    pub capability: Option<String>,

    /// Pause after session creation, e.g. while a browser extension syncs
    pub settle_ms: u64,
}

/// Runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Directory receiving the unmatched-step report
    pub report_dir: PathBuf,

    /// Directory receiving `test-results.json`
    pub output_dir: PathBuf,

    /// Context slots cleared at the end of every scenario
    pub scenario_slots: Vec<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            report_dir: PathBuf::from("reports"),
            output_dir: PathBuf::from("test-results"),
            scenario_slots: vec!["current_time".to_string(), "actual_urls".to_string()],
        }
    }
}

impl KeystepConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.actors = std::mem::take(&mut config.actors)
            .into_iter()
            .map(|(role, actor)| (normalize_role(&role), actor))
            .collect();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Name of the active environment
    pub fn environment_name(&self) -> String {
        self.resolve_environment_name(std::env::var(ENVIRONMENT_VAR).ok().as_deref())
    }

    fn resolve_environment_name(&self, requested: Option<&str>) -> String {
        match requested {
            Some(name) if self.app.environments.contains_key(name) => name.to_string(),
            Some(name) => {
                tracing::warn!(
                    "Environment '{}' is not configured, using '{}'",
                    name,
                    self.app.default_environment
                );
                self.app.default_environment.clone()
            }
            None => self.app.default_environment.clone(),
        }
    }

    /// Active environment settings
    pub fn environment(&self) -> Result<&EnvironmentConfig> {
        let name = self.environment_name();
        self.app
            .environments
            .get(&name)
            .ok_or(Error::UnknownEnvironment(name))
    }

    /// Configuration for a role, after role-name normalisation
    pub fn actor(&self, role: &str) -> Option<&ActorConfig> {
        self.actors.get(&normalize_role(role))
    }
}

/// Read a secret from the environment
pub fn secret_from_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::MissingSecret(var.to_string())),
    }
}
