//! TOML-based configuration system for contentsync.
//!
//! Secrets (the GitHub token) are never written to the file; the config names
//! an environment variable instead and the value is resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::git::paths::{normalize_path, PathRules};
use crate::git::provider::RetryPolicy;
use crate::ids::WorkspaceId;
use crate::models::{ProviderConfig, ProviderKind, TransformerKind};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// The workspace this configuration operates on.
    pub workspace: WorkspaceConfig,

    /// Document database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// GitHub repository and API settings.
    pub github: GitHubConfig,

    /// Sync behaviour settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

// ---------------------------------------------------------------------------
// Workspace / database / logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub id: WorkspaceId,
}

/// Document database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file (default `contentsync.db`).
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("contentsync.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

/// GitHub repository and API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API base URL (default `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Repository in `owner/repo` format.
    pub repo: String,

    /// Branch content is committed to.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Environment variable holding the GitHub personal access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Repository subdirectory all synced content lives under.
    #[serde(default)]
    pub base_directory: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_branch() -> String {
    "main".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// Initial mapping of a repository subdirectory to a content group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub path: String,
    /// Content group name; created on `configure` when missing.
    pub content_group: String,
}

/// Sync behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Text format of repository files.
    #[serde(default)]
    pub transformer: TransformerKind,

    /// Store variant bodies under `<variant key>/` subdirectories.
    #[serde(default = "default_true")]
    pub variant_subdirectories: bool,

    /// Glob patterns a repository path must match to be synced (empty = all).
    #[serde(default)]
    pub include: Vec<String>,

    /// Glob patterns excluding repository paths.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Quiet period before a live edit is persisted.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Retries for idempotent repository reads.
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    /// Base delay of the exponential read backoff.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default)]
    pub directories: Vec<DirectoryConfig>,
}

fn default_true() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    2000
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transformer: TransformerKind::default(),
            variant_subdirectories: true,
            include: Vec::new(),
            exclude: Vec::new(),
            debounce_ms: default_debounce_ms(),
            fetch_retries: default_fetch_retries(),
            retry_base_ms: default_retry_base_ms(),
            directories: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn path_rules(&self) -> PathRules {
        PathRules::new(self.include.clone(), self.exclude.clone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.fetch_retries, Duration::from_millis(self.retry_base_ms))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `*_env` fields from the environment.
    ///
    /// A missing token only logs a warning: local-only commands (history,
    /// status) work without one. Use [`require_token`](Self::require_token)
    /// where the provider is needed.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");
        self.github.token = resolve_optional_env(&self.github.token_env, "github.token_env");
        debug!("environment variable resolution complete");
        Ok(())
    }

    /// The resolved GitHub token, or [`ConfigError::EnvVarMissing`].
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.github
            .token
            .as_deref()
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.github.token_env.clone(),
                field: "github.token_env".into(),
            })
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.repo.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "github.repo".into(),
                detail: "GitHub repo must not be empty".into(),
            });
        }
        let parts: Vec<&str> = self.github.repo.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "github.repo".into(),
                detail: "GitHub repo must be in 'owner/repo' format".into(),
            });
        }
        if self.github.branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "github.branch".into(),
                detail: "branch must not be empty".into(),
            });
        }
        if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: format!("unknown level '{}'", self.logging.level),
            });
        }
        if self.sync.debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.debounce_ms".into(),
                detail: "debounce must be > 0".into(),
            });
        }
        if self.sync.fetch_retries > 10 {
            return Err(ConfigError::InvalidValue {
                field: "sync.fetch_retries".into(),
                detail: "at most 10 retries are allowed".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for dir in &self.sync.directories {
            let normalized = normalize_path(&dir.path);
            if normalized.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "sync.directories.path".into(),
                    detail: "directory path must not be empty".into(),
                });
            }
            if normalized.split('/').any(|seg| seg == "..") {
                return Err(ConfigError::InvalidValue {
                    field: "sync.directories.path".into(),
                    detail: format!("'{}' escapes the repository", dir.path),
                });
            }
            if !seen.insert(normalized) {
                return Err(ConfigError::InvalidValue {
                    field: "sync.directories.path".into(),
                    detail: format!("duplicate directory '{}'", dir.path),
                });
            }
            if dir.content_group.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "sync.directories.content_group".into(),
                    detail: format!("directory '{}' has no content group", dir.path),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Provider settings stored with the workspace on `configure`.
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::GitHub,
            repository: self.github.repo.clone(),
            branch: self.github.branch.clone(),
            base_directory: normalize_path(&self.github.base_directory),
            transformer: self.sync.transformer,
            variant_subdirectories: self.sync.variant_subdirectories,
        }
    }

    /// A commented starter configuration for `contentsync init`.
    pub fn sample(workspace_id: WorkspaceId) -> String {
        format!(
            r#"[workspace]
id = "{workspace_id}"

[database]
path = "contentsync.db"

[logging]
level = "info"

[github]
repo = "owner/content"
branch = "main"
token_env = "GITHUB_TOKEN"
# base_directory = "content"

[sync]
transformer = "markdown"
variant_subdirectories = true
include = ["**/*.md"]
exclude = []

[[sync.directories]]
path = "docs"
content_group = "Docs"
"#
        )
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
