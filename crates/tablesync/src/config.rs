//! Configuration for the sync worker
//!
//! Loaded from YAML with `${VAR}` / `${VAR:-default}` environment expansion:
//!
//! ```yaml
//! cluster:
//!   endpoint: ${SEARCH_ENDPOINT}
//!   auth:
//!     type: aws_sigv4
//!     region: ${AWS_REGION:-us-east-1}
//!   request_timeout_ms: 10000
//! mapping:
//!   source:
//!     type: s3
//!     bucket: my-artifacts
//!     key: lib/table_mapping.json
//! sync:
//!   batch_deadline_ms: 60000
//!   refresh: periodic
//!   failure_policy: fail_fast
//! ```

use crate::error::SyncError;
use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tablesync_search::{Auth, IndexSettings, OpenSearchClient, Refresh};
use validator::Validate;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

// ─────────────────────────────────────────────────────────────────
// Secrets
// ─────────────────────────────────────────────────────────────────

/// A string that never shows up in logs, `Debug` output or config dumps
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Use only where the actual value is needed (authentication)
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl JsonSchema for SensitiveString {
    fn schema_name() -> String {
        "SensitiveString".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = gen.subschema_for::<String>();
        if let schemars::schema::Schema::Object(obj) = &mut schema {
            obj.format = Some("password".to_string());
        }
        schema
    }
}

// ─────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct SyncConfig {
    #[validate(nested)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    #[validate(nested)]
    pub mapping: MappingConfig,

    #[serde(default)]
    #[validate(nested)]
    pub index: IndexConfig,

    #[serde(default)]
    #[validate(nested)]
    pub sync: SyncSettings,

    #[serde(default)]
    #[validate(nested)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Search cluster connection
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct ClusterConfig {
    /// Base URL, e.g. `https://search-orders.eu-west-1.es.amazonaws.com`
    #[validate(length(min = 1, max = 2048))]
    pub endpoint: String,

    #[serde(default)]
    pub auth: ClusterAuth,

    /// Timeout for each cluster request (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    #[validate(range(min = 100, max = 600_000))]
    pub request_timeout_ms: u64,

    /// TCP connect timeout (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 50, max = 60_000))]
    pub connect_timeout_ms: u64,
}

/// How requests to the cluster authenticate
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterAuth {
    #[default]
    None,
    Basic {
        username: String,
        password: SensitiveString,
    },
    /// Sign with the credentials of the hosting identity
    AwsSigv4 {
        region: String,
        /// `es` for managed domains, `aoss` for serverless collections
        #[serde(default = "default_sigv4_service")]
        service: String,
    },
}

/// Where the key-schema mapping artifact lives
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct MappingConfig {
    #[serde(default)]
    pub source: MappingSource,

    /// Upper bound on loading the artifact at cold start (milliseconds)
    #[serde(default = "default_mapping_load_timeout_ms")]
    #[validate(range(min = 100, max = 600_000))]
    pub load_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MappingSource {
    /// No artifact; every table falls back to key delivery order
    #[default]
    None,
    /// Local JSON artifact. A file that does not exist is treated like
    /// `none`; any other read or parse failure fails initialization.
    File {
        path: PathBuf,
    },
    S3 {
        bucket: String,
        key: String,
        #[serde(default)]
        region: Option<String>,
    },
}

/// Target index naming and creation settings
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, JsonSchema)]
pub struct IndexConfig {
    /// Lowercase table names when used as index names
    #[serde(default)]
    pub lowercase_names: bool,

    #[serde(default)]
    #[validate(range(min = 1, max = 1024))]
    pub number_of_shards: Option<u32>,

    #[serde(default)]
    #[validate(range(max = 16))]
    pub number_of_replicas: Option<u32>,
}

/// Refresh behaviour for writes
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Rely on the cluster's periodic refresh
    #[default]
    Periodic,
    /// Refresh affected shards after every bulk request
    Immediate,
    /// Wait for the next periodic refresh before acknowledging
    WaitFor,
}

/// What to report when a record fails
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the whole batch; the host redelivers all of it
    #[default]
    FailFast,
    /// Report the failed record and everything after it for redelivery
    ReportFailedItems,
}

/// Per-batch behaviour
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct SyncSettings {
    /// Hard limit for processing one batch (milliseconds)
    #[serde(default = "default_batch_deadline_ms")]
    #[validate(range(min = 1000, max = 900_000))]
    pub batch_deadline_ms: u64,

    #[serde(default)]
    pub refresh: RefreshMode,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Actions per bulk request; larger batches are split in order
    #[serde(default = "default_max_bulk_actions")]
    #[validate(range(min = 1, max = 10_000))]
    pub max_bulk_actions: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_deadline_ms: default_batch_deadline_ms(),
            refresh: RefreshMode::default(),
            failure_policy: FailurePolicy::default(),
            max_bulk_actions: default_max_bulk_actions(),
        }
    }
}

/// In-process retry of transient bulk failures
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 10))]
    pub max_retries: u32,

    /// Initial backoff between retries (milliseconds)
    #[serde(default = "default_initial_backoff_ms")]
    #[validate(range(min = 10, max = 60_000))]
    pub initial_backoff_ms: u64,

    /// Maximum backoff between retries (milliseconds)
    #[serde(default = "default_max_backoff_ms")]
    #[validate(range(min = 10, max = 300_000))]
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_sigv4_service() -> String {
    "es".to_string()
}

fn default_mapping_load_timeout_ms() -> u64 {
    5_000
}

fn default_batch_deadline_ms() -> u64 {
    60_000
}

fn default_max_bulk_actions() -> usize {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

// ─────────────────────────────────────────────────────────────────
// Loading and validation
// ─────────────────────────────────────────────────────────────────

impl SyncConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text, expanding environment variables
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        let config: SyncConfig = serde_yaml::from_str(&expanded)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Expand environment variables in config content
    /// Supports ${VAR} and ${VAR:-default} syntax
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Field ranges plus the cross-field rules
    pub fn validate_all(&self) -> anyhow::Result<()> {
        self.validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let endpoint = url::Url::parse(&self.cluster.endpoint).map_err(|e| {
            anyhow::anyhow!("cluster.endpoint '{}' is not a URL: {}", self.cluster.endpoint, e)
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            anyhow::bail!("cluster.endpoint must use http or https");
        }

        match &self.cluster.auth {
            ClusterAuth::Basic { username, .. } if username.is_empty() => {
                anyhow::bail!("cluster.auth.username must not be empty")
            }
            ClusterAuth::AwsSigv4 { region, .. } if region.is_empty() => {
                anyhow::bail!("cluster.auth.region must not be empty")
            }
            _ => {}
        }

        // Every blocking call has to fit inside the batch deadline
        let deadline = self.sync.batch_deadline_ms;
        if self.cluster.request_timeout_ms >= deadline {
            anyhow::bail!(
                "cluster.request_timeout_ms ({}) must be less than sync.batch_deadline_ms ({})",
                self.cluster.request_timeout_ms,
                deadline
            );
        }
        if self.mapping.load_timeout_ms >= deadline {
            anyhow::bail!(
                "mapping.load_timeout_ms ({}) must be less than sync.batch_deadline_ms ({})",
                self.mapping.load_timeout_ms,
                deadline
            );
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            anyhow::bail!(
                "retry.initial_backoff_ms ({}) must be <= retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms
            );
        }

        if let MappingSource::S3 { bucket, key, .. } = &self.mapping.source {
            if bucket.is_empty() || key.is_empty() {
                anyhow::bail!("mapping.source needs a bucket and a key");
            }
        }

        Ok(())
    }

    /// JSON schema of the configuration file
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(SyncConfig)
    }
}

impl ClusterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Build the REST client for this cluster
    pub fn build_client(&self) -> Result<OpenSearchClient, SyncError> {
        let auth = match &self.auth {
            ClusterAuth::None => Auth::None,
            ClusterAuth::Basic { username, password } => {
                Auth::basic(username.clone(), password.expose_secret())
            }
            ClusterAuth::AwsSigv4 { region, service } => {
                Auth::aws_sigv4(region.clone(), service.clone())
            }
        };

        Ok(OpenSearchClient::builder()
            .endpoint(&self.endpoint)
            .auth(auth)
            .timeout(self.request_timeout())
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .build()?)
    }
}

impl MappingConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            source: MappingSource::None,
            load_timeout_ms: default_mapping_load_timeout_ms(),
        }
    }
}

impl IndexConfig {
    pub fn settings(&self) -> IndexSettings {
        IndexSettings {
            coerce: true,
            number_of_shards: self.number_of_shards,
            number_of_replicas: self.number_of_replicas,
        }
    }
}

impl RefreshMode {
    pub fn as_refresh(self) -> Refresh {
        match self {
            RefreshMode::Periodic => Refresh::False,
            RefreshMode::Immediate => Refresh::True,
            RefreshMode::WaitFor => Refresh::WaitFor,
        }
    }
}

impl SyncSettings {
    pub fn batch_deadline(&self) -> Duration {
        Duration::from_millis(self.batch_deadline_ms)
    }
}
