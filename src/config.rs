use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{JobKey, DEFAULT_CHECKPOINT_PATH};
use crate::credentials::{self, Credential, CredentialStore};
use crate::db::{ConnectionParams, DEFAULT_OFFLINE_ERROR_CODES, DEFAULT_PORT};
use crate::error::{Error, Result};
use crate::job::JobPlan;
use crate::rebuild::{RebuildOptions, REBUILD_TIMEOUT};
use crate::scanner::SCAN_TIMEOUT;

pub const ENV_PREFIX: &str = "INDEX_REBUILD";
pub const DEFAULT_THRESHOLD: i64 = 20;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Layered configuration: `Config.toml`, then `INDEX_REBUILD_*` environment
/// variables, then command-line overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: Option<String>,
    pub credential: Option<String>,
    #[serde(default = "default_threshold")]
    pub threshold: i64,
    #[serde(default)]
    pub allow_offline_fallback: bool,
    pub table: Option<String>,
    #[serde(default)]
    pub trust_server_certificate: bool,
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_rebuild_timeout")]
    pub rebuild_timeout_secs: u64,
    #[serde(default = "default_offline_error_codes")]
    pub offline_error_codes: Vec<u32>,
    #[serde(default)]
    pub credentials: HashMap<String, Credential>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_threshold() -> i64 {
    DEFAULT_THRESHOLD
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from(DEFAULT_CHECKPOINT_PATH)
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_scan_timeout() -> u64 {
    SCAN_TIMEOUT.as_secs()
}

fn default_rebuild_timeout() -> u64 {
    REBUILD_TIMEOUT.as_secs()
}

fn default_offline_error_codes() -> Vec<u32> {
    DEFAULT_OFFLINE_ERROR_CODES.to_vec()
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub credential: Option<String>,
    pub threshold: Option<i64>,
    pub allow_offline_fallback: Option<bool>,
    pub table: Option<String>,
    pub trust_server_certificate: Option<bool>,
    pub checkpoint_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load from `config_path` (or an optional `Config.toml`), the
    /// environment, and `overrides`.
    pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> Result<AppConfig> {
        let file_source = match config_path {
            Some(path) => ConfigFile::from(path).required(true),
            None => ConfigFile::with_name("Config").required(false),
        };

        let builder = Config::builder()
            .add_source(file_source)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("offline_error_codes"),
            );

        let config = apply_overrides(builder, overrides)?.build()?;
        Ok(config.try_deserialize::<AppConfig>()?)
    }

    /// Copy with every credential password masked, for display.
    pub fn redacted(&self) -> AppConfig {
        let mut config = self.clone();
        config.credentials = self
            .credentials
            .iter()
            .map(|(name, credential)| (name.clone(), credential.redacted()))
            .collect();
        config
    }
}

fn apply_overrides(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
    overrides: &Overrides,
) -> std::result::Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    builder
        .set_override_option("server", overrides.server.clone())?
        .set_override_option("port", overrides.port.map(i64::from))?
        .set_override_option("database", overrides.database.clone())?
        .set_override_option("credential", overrides.credential.clone())?
        .set_override_option("threshold", overrides.threshold)?
        .set_override_option("allow_offline_fallback", overrides.allow_offline_fallback)?
        .set_override_option("table", overrides.table.clone())?
        .set_override_option(
            "trust_server_certificate",
            overrides.trust_server_certificate,
        )?
        .set_override_option(
            "checkpoint_path",
            overrides
                .checkpoint_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
}

/// Validated, immutable parameters for one job.
#[derive(Debug, Clone)]
pub struct JobParameters {
    pub connection: ConnectionParams,
    pub plan: JobPlan,
    pub checkpoint_path: PathBuf,
}

impl JobParameters {
    /// Validate `config` and resolve its credential reference through `store`.
    pub fn resolve(config: &AppConfig, store: &dyn CredentialStore) -> Result<JobParameters> {
        let server = required("server", &config.server)?;
        let database = required("database", &config.database)?;
        let reference = required("credential", &config.credential)?;

        let threshold_percent = u8::try_from(config.threshold)
            .ok()
            .filter(|t| *t <= 100)
            .ok_or_else(|| {
                Error::invalid(
                    "threshold",
                    format!("{} is outside 0..=100", config.threshold),
                )
            })?;

        let connect_timeout = timeout("connect_timeout_secs", config.connect_timeout_secs)?;
        let scan_timeout = timeout("scan_timeout_secs", config.scan_timeout_secs)?;
        let rebuild_timeout = timeout("rebuild_timeout_secs", config.rebuild_timeout_secs)?;

        let table_filter = config
            .table
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let credential = credentials::resolve(store, &reference)?;

        let job = JobKey {
            server: server.clone(),
            port: config.port,
            database: database.clone(),
            threshold_percent,
            table_filter,
        };

        Ok(JobParameters {
            connection: ConnectionParams {
                server,
                port: config.port,
                database,
                username: credential.username,
                password: credential.password,
                trust_server_certificate: config.trust_server_certificate,
                connect_timeout,
            },
            plan: JobPlan {
                job,
                scan_timeout,
                rebuild: RebuildOptions {
                    allow_offline_fallback: config.allow_offline_fallback,
                    timeout: rebuild_timeout,
                    offline_error_codes: config.offline_error_codes.clone(),
                },
            },
            checkpoint_path: config.checkpoint_path.clone(),
        })
    }
}

fn required(name: &'static str, value: &Option<String>) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::invalid(name, "a value is required"))
}

fn timeout(name: &'static str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(Error::invalid(name, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}
