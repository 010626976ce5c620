use crate::auth::AuthProvider;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of `toolgate.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolgateConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub workers: WorkerSettings,

    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    #[serde(default)]
    pub providers: Vec<AuthProvider>,
}

/// Caller authentication for the HTTP API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Accept unauthenticated callers. Local development only.
    #[serde(default)]
    pub disable_auth: bool,

    /// HS256 key for caller tokens. Prefer `worker_secret_env`.
    #[serde(default)]
    pub worker_secret: Option<String>,

    #[serde(default = "default_worker_secret_env")]
    pub worker_secret_env: String,
}

fn default_worker_secret_env() -> String {
    "TOOLGATE_WORKER_SECRET".to_string()
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            disable_auth: false,
            worker_secret: None,
            worker_secret_env: default_worker_secret_env(),
        }
    }
}

impl ApiSettings {
    /// Key used to verify caller tokens; `None` when auth is disabled
    pub fn resolve_secret(&self) -> Result<Option<String>> {
        if self.disable_auth {
            return Ok(None);
        }
        let secret = self
            .worker_secret
            .clone()
            .filter(|secret| !secret.is_empty())
            .or_else(|| {
                std::env::var(&self.worker_secret_env)
                    .ok()
                    .filter(|secret| !secret.is_empty())
            });
        match secret {
            Some(secret) => Ok(Some(secret)),
            None => anyhow::bail!(
                "no worker secret configured: set {} or api.worker_secret, or enable api.disable_auth",
                self.worker_secret_env
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_connections_file")]
    pub connections_file: String,
}

fn default_connections_file() -> String {
    "connections.redb".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            connections_file: default_connections_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Callback URL registered with every provider
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,

    /// Bound on code exchange, refresh and revoke requests
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Refresh this many seconds before the provider's expiry
    #[serde(default)]
    pub refresh_margin_secs: i64,
}

fn default_redirect_uri() -> String {
    "http://127.0.0.1:8080/api/auth/callback".to_string()
}

fn default_pending_ttl_secs() -> u64 {
    600
}

fn default_http_timeout_secs() -> u64 {
    10
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            redirect_uri: default_redirect_uri(),
            pending_ttl_secs: default_pending_ttl_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            refresh_margin_secs: 0,
        }
    }
}

/// Upper bound for configured auth windows (pending TTL, refresh margin)
const MAX_AUTH_WINDOW_SECS: i64 = 365 * 24 * 60 * 60;

impl AuthSettings {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn pending_ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.pending_ttl_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.clamp(0, MAX_AUTH_WINDOW_SECS))
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            self.refresh_margin_secs
                .clamp(-MAX_AUTH_WINDOW_SECS, MAX_AUTH_WINDOW_SECS),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.pending_ttl_secs == 0 || self.pending_ttl_secs > MAX_AUTH_WINDOW_SECS as u64 {
            anyhow::bail!(
                "auth.pending_ttl_secs must be between 1 and {}",
                MAX_AUTH_WINDOW_SECS
            );
        }
        if !(0..=MAX_AUTH_WINDOW_SECS).contains(&self.refresh_margin_secs) {
            anyhow::bail!(
                "auth.refresh_margin_secs must be between 0 and {}",
                MAX_AUTH_WINDOW_SECS
            );
        }
        Ok(())
    }
}

/// Execution limits for a single tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolLimits {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Unset means unbounded
    #[serde(default)]
    pub default_max_concurrency: Option<usize>,

    /// Overrides keyed by qualified tool name
    #[serde(default)]
    pub tools: HashMap<String, ToolLimits>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            default_max_concurrency: None,
            tools: HashMap::new(),
        }
    }
}

impl WorkerSettings {
    pub fn timeout_for(&self, tool: &str) -> Duration {
        let ms = self
            .tools
            .get(tool)
            .and_then(|limits| limits.timeout_ms)
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn concurrency_for(&self, tool: &str) -> Option<usize> {
        self.tools
            .get(tool)
            .and_then(|limits| limits.max_concurrency)
            .or(self.default_max_concurrency)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,

    #[serde(default = "default_idempotency_capacity")]
    pub idempotency_capacity: usize,
}

fn default_idempotency_ttl_secs() -> u64 {
    3600
}

fn default_idempotency_capacity() -> usize {
    10_000
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            idempotency_capacity: default_idempotency_capacity(),
        }
    }
}

impl ToolgateConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self::default()
        };

        config.data_dir = data_dir;
        config.auth.validate().context("Invalid [auth] configuration")?;

        Ok(config)
    }

    /// Path of the redb connection database
    pub fn connections_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.connections_file)
    }
}
