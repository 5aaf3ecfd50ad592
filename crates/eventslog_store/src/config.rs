use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use eventslog_core::{Dialect, EventsLogError, EventsLogResult};

const DEFAULT_CONFIG_NAME: &str = "eventslog.json";
const DEFAULT_PRIMARY_PATH: &str = "events-db/change_events_primary.sqlite";
const DEFAULT_LOCAL_PATH: &str = "events-db/change_events.sqlite";

pub const DEFAULT_MAX_AGE_DAYS: u32 = 30;
pub const DEFAULT_MAX_TRIES: u32 = 3;
pub const DEFAULT_RETRY_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_RETURN_LIMIT: u32 = 5_000;
pub const DEFAULT_CLEANUP_HOUR: u8 = 23;
pub const DEFAULT_BATCH_CAPACITY: usize = 10_000;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2_000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
    Spanner { url: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalConfig {
    pub path: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchConfig {
    /// Defaults to the dialect's own preference when unset.
    pub enabled: Option<bool>,
    pub capacity: Option<usize>,
    pub batch_size: Option<usize>,
    pub flush_interval_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventsLogConfig {
    pub database: DatabaseConfig,
    pub local: Option<LocalConfig>,
    pub pool: Option<PoolConfig>,
    pub max_age_days: Option<u32>,
    pub max_tries: Option<u32>,
    pub retry_timeout_ms: Option<u64>,
    /// Interval between connection probes while offline.
    pub connect_timeout_ms: Option<u64>,
    pub copy_local: Option<bool>,
    pub return_limit: Option<u32>,
    pub cleanup_hour: Option<u8>,
    pub batch: Option<BatchConfig>,
}

impl EventsLogConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            local: Some(LocalConfig {
                path: Some(DEFAULT_LOCAL_PATH.to_string()),
            }),
            pool: None,
            max_age_days: Some(DEFAULT_MAX_AGE_DAYS),
            max_tries: Some(DEFAULT_MAX_TRIES),
            retry_timeout_ms: Some(DEFAULT_RETRY_TIMEOUT_MS),
            connect_timeout_ms: Some(DEFAULT_CONNECT_TIMEOUT_MS),
            copy_local: Some(false),
            return_limit: Some(DEFAULT_RETURN_LIMIT),
            cleanup_hour: Some(DEFAULT_CLEANUP_HOUR),
            batch: None,
        }
    }

    pub fn load_or_init(base_dir: &Path) -> EventsLogResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| EventsLogError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| EventsLogError::storage(format!("read config: {err}")))?;
            let config: EventsLogConfig = serde_json::from_str(&raw)
                .map_err(|err| EventsLogError::config(err.to_string()))?;
            return Ok(config);
        }
        let default = EventsLogConfig::default_sqlite(DEFAULT_PRIMARY_PATH);
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| EventsLogError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| EventsLogError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn dialect(&self) -> Dialect {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => Dialect::Embedded,
            DatabaseConfig::Postgres { .. } => Dialect::Postgres,
            DatabaseConfig::Mysql { .. } => Dialect::MySql,
            DatabaseConfig::Spanner { .. } => Dialect::Spanner,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
            DatabaseConfig::Spanner { .. } => "spanner",
        }
    }

    pub fn connection_url(&self) -> Option<&str> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => None,
            DatabaseConfig::Postgres { url }
            | DatabaseConfig::Mysql { url }
            | DatabaseConfig::Spanner { url } => Some(url.as_str()),
        }
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> EventsLogResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => Ok(resolve(
                base_dir,
                path.as_deref().unwrap_or(DEFAULT_PRIMARY_PATH),
            )),
            _ => Err(EventsLogError::config("config is not sqlite backend")),
        }
    }

    /// Path of the local backup database.
    pub fn local_path(&self, base_dir: &Path) -> PathBuf {
        let path = self
            .local
            .as_ref()
            .and_then(|local| local.path.as_deref())
            .unwrap_or(DEFAULT_LOCAL_PATH);
        resolve(base_dir, path)
    }

    pub fn settings(&self) -> StoreSettings {
        StoreSettings::from_config(self)
    }

    /// Batch writer settings for the primary store, or `None` when writes go
    /// straight to the database.
    pub fn batch_settings(&self) -> Option<BatchSettings> {
        let batch = self.batch.clone().unwrap_or_default();
        let enabled = batch
            .enabled
            .unwrap_or_else(|| self.dialect().prefers_batching());
        if !enabled {
            return None;
        }
        Some(BatchSettings {
            capacity: batch.capacity.unwrap_or(DEFAULT_BATCH_CAPACITY).max(1),
            batch_size: batch.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
            flush_interval: Duration::from_millis(
                batch
                    .flush_interval_ms
                    .unwrap_or(DEFAULT_FLUSH_INTERVAL_MS)
                    .max(1),
            ),
        })
    }
}

fn resolve(base_dir: &Path, path: &str) -> PathBuf {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        candidate
    } else {
        base_dir.join(candidate)
    }
}

/// Tunables resolved once from [`EventsLogConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSettings {
    pub max_age_days: u32,
    pub max_tries: u32,
    pub retry_timeout: Duration,
    pub connect_interval: Duration,
    pub copy_local: bool,
    pub return_limit: u32,
    pub cleanup_hour: u8,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            max_tries: DEFAULT_MAX_TRIES,
            retry_timeout: Duration::from_millis(DEFAULT_RETRY_TIMEOUT_MS),
            connect_interval: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            copy_local: false,
            return_limit: DEFAULT_RETURN_LIMIT,
            cleanup_hour: DEFAULT_CLEANUP_HOUR,
        }
    }
}

impl StoreSettings {
    pub fn from_config(config: &EventsLogConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_age_days: config.max_age_days.unwrap_or(defaults.max_age_days),
            max_tries: config.max_tries.unwrap_or(defaults.max_tries),
            retry_timeout: config
                .retry_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_timeout),
            connect_interval: config
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_interval),
            copy_local: config.copy_local.unwrap_or(defaults.copy_local),
            return_limit: config.return_limit.unwrap_or(defaults.return_limit),
            cleanup_hour: config
                .cleanup_hour
                .filter(|hour| *hour < 24)
                .unwrap_or(defaults.cleanup_hour),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchSettings {
    pub capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BATCH_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
        }
    }
}
