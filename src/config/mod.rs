//! Configuration management.
//!
//! [`CacheConfig`] is loaded once at startup from a TOML file with
//! `MEDIACACHE_*` environment overrides. Values the cache tunes at runtime
//! (the writer capacity) go through a [`SettingsStore`] instead.

mod paths;
mod settings;

pub use paths::{DATABASE_FILE_NAME, StoragePaths, get_user_data_dir};
pub use settings::{FileSettings, MemorySettings, SettingsStore, WRITER_CAPACITY_KEY};

use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding the database, snapshots and settings.
    pub data_dir: PathBuf,
    /// Which backend to use.
    pub backend: BackendConfig,
    /// Write throttle configuration.
    pub throttle: ThrottleConfig,
    /// Connection pool configuration.
    pub pool: PoolConfig,
    /// Reset and cleanup configuration.
    pub recovery: RecoveryConfig,
}

/// Backend selection.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Embedded single-file `SQLite` database.
    Sqlite {
        /// Database file; `{data_dir}/mediacache.db` when absent.
        path: Option<PathBuf>,
    },
    /// Networked PostgreSQL server.
    Postgres(PostgresConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Sqlite { path: None }
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    pub password: SecretString,
    /// Database name.
    pub database: String,
    /// Maximum connections held by the driver pool.
    pub pool_max_size: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "mediacache".to_string(),
            password: SecretString::from(String::new()),
            database: "mediacache".to_string(),
            pool_max_size: 8,
        }
    }
}

/// Write-concurrency throttle settings.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Initial number of concurrent writers (minimum 1).
    pub writer_capacity: usize,
    /// Timeout for acquiring a write permit in milliseconds (0 = 60 s cap).
    pub acquire_timeout_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            writer_capacity: 2,
            acquire_timeout_ms: 30_000,
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle handles older than this are closed on the next checkout.
    pub idle_timeout: Duration,
    /// Open timeout: `busy_timeout` on `SQLite`, connect timeout on PostgreSQL.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Destructive reset settings.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Delay before backup files left by a reset are removed.
    pub cleanup_delay: Duration,
    /// Delete attempts when renaming the database file fails.
    pub delete_attempts: u32,
    /// Initial backoff between delete attempts, doubled each time.
    pub delete_backoff: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            cleanup_delay: Duration::from_secs(60),
            delete_attempts: 5,
            delete_backoff: Duration::from_millis(100),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Backend section.
    pub backend: Option<ConfigFileBackend>,
    /// Throttle section.
    pub throttle: Option<ConfigFileThrottle>,
    /// Pool section.
    pub pool: Option<ConfigFilePool>,
    /// Recovery section.
    pub recovery: Option<ConfigFileRecovery>,
}

/// Backend section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileBackend {
    /// `sqlite` or `postgres`.
    pub kind: Option<String>,
    /// `SQLite` file path.
    pub path: Option<String>,
    /// PostgreSQL host.
    pub host: Option<String>,
    /// PostgreSQL port.
    pub port: Option<u16>,
    /// PostgreSQL user.
    pub user: Option<String>,
    /// PostgreSQL password.
    pub password: Option<String>,
    /// PostgreSQL database.
    pub database: Option<String>,
    /// PostgreSQL pool size.
    pub pool_max_size: Option<usize>,
}

/// Throttle section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileThrottle {
    /// Initial writer capacity.
    pub writer_capacity: Option<usize>,
    /// Permit timeout.
    pub acquire_timeout_ms: Option<u64>,
}

/// Pool section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePool {
    /// Idle eviction in seconds.
    pub idle_timeout_secs: Option<u64>,
    /// Open timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
}

/// Recovery section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRecovery {
    /// Backup cleanup delay in seconds.
    pub cleanup_delay_secs: Option<u64>,
    /// Delete attempts.
    pub delete_attempts: Option<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: get_user_data_dir().unwrap_or_else(|_| std::env::temp_dir().join("mediacache")),
            backend: BackendConfig::default(),
            throttle: ThrottleConfig::default(),
            pool: PoolConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Creates a configuration rooted at `data_dir` with default values.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from a file path, then applies env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::failed("read_config_file", e))?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text, then applies env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| Error::failed("parse_config_file", e))?;
        Ok(Self::from_config_file(file)?.with_env_overrides())
    }

    /// Loads configuration from the platform config directory
    /// (`{config_dir}/mediacache/config.toml`).
    ///
    /// Returns defaults (with env overrides) if no readable file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default().with_env_overrides();
        };

        let path = base_dirs.config_dir().join("mediacache").join("config.toml");
        if path.exists() {
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                },
            }
        }

        Self::default().with_env_overrides()
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(backend) = file.backend {
            config.backend = Self::backend_from_file(backend)?;
        }
        if let Some(throttle) = file.throttle {
            if let Some(v) = throttle.writer_capacity {
                config.throttle.writer_capacity = v.max(1);
            }
            if let Some(v) = throttle.acquire_timeout_ms {
                config.throttle.acquire_timeout_ms = v;
            }
        }
        if let Some(pool) = file.pool {
            if let Some(v) = pool.idle_timeout_secs {
                config.pool.idle_timeout = Duration::from_secs(v);
            }
            if let Some(v) = pool.connect_timeout_ms {
                config.pool.connect_timeout = Duration::from_millis(v);
            }
        }
        if let Some(recovery) = file.recovery {
            if let Some(v) = recovery.cleanup_delay_secs {
                config.recovery.cleanup_delay = Duration::from_secs(v);
            }
            if let Some(v) = recovery.delete_attempts {
                config.recovery.delete_attempts = v.max(1);
            }
        }

        Ok(config)
    }

    fn backend_from_file(backend: ConfigFileBackend) -> Result<BackendConfig> {
        match backend.kind.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("sqlite") => Ok(BackendConfig::Sqlite {
                path: backend.path.map(PathBuf::from),
            }),
            Some("postgres" | "postgresql") => {
                let defaults = PostgresConfig::default();
                Ok(BackendConfig::Postgres(PostgresConfig {
                    host: backend.host.unwrap_or(defaults.host),
                    port: backend.port.unwrap_or(defaults.port),
                    user: backend.user.unwrap_or(defaults.user),
                    password: backend
                        .password
                        .map_or(defaults.password, SecretString::from),
                    database: backend.database.unwrap_or(defaults.database),
                    pool_max_size: backend.pool_max_size.unwrap_or(defaults.pool_max_size),
                }))
            },
            Some(other) => Err(Error::InvalidInput(format!(
                "unknown backend kind '{other}' (expected 'sqlite' or 'postgres')"
            ))),
        }
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `MEDIACACHE_DATA_DIR` | Data directory |
    /// | `MEDIACACHE_DB_PATH` | `SQLite` file (selects the `SQLite` backend) |
    /// | `MEDIACACHE_PG_HOST` | PostgreSQL host (selects the PostgreSQL backend) |
    /// | `MEDIACACHE_PG_PASSWORD` | PostgreSQL password |
    /// | `MEDIACACHE_WRITER_CAPACITY` | Initial writer capacity |
    /// | `MEDIACACHE_THROTTLE_ACQUIRE_TIMEOUT_MS` | Permit timeout |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("MEDIACACHE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MEDIACACHE_DB_PATH") {
            self.backend = BackendConfig::Sqlite {
                path: Some(PathBuf::from(v)),
            };
        }
        if let Ok(host) = std::env::var("MEDIACACHE_PG_HOST") {
            let mut pg = match self.backend {
                BackendConfig::Postgres(pg) => pg,
                BackendConfig::Sqlite { .. } => PostgresConfig::default(),
            };
            pg.host = host;
            if let Ok(v) = std::env::var("MEDIACACHE_PG_PASSWORD") {
                pg.password = SecretString::from(v);
            }
            self.backend = BackendConfig::Postgres(pg);
        }
        if let Ok(v) = std::env::var("MEDIACACHE_WRITER_CAPACITY")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.throttle.writer_capacity = parsed.max(1);
        }
        if let Ok(v) = std::env::var("MEDIACACHE_THROTTLE_ACQUIRE_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.throttle.acquire_timeout_ms = parsed;
        }
        self
    }

    /// Sets the backend.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the initial writer capacity.
    #[must_use]
    pub fn with_writer_capacity(mut self, capacity: usize) -> Self {
        self.throttle.writer_capacity = capacity.max(1);
        self
    }

    /// Sets the delay before reset backups are removed.
    #[must_use]
    pub const fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.recovery.cleanup_delay = delay;
        self
    }

    /// Returns the storage path helper for this configuration.
    #[must_use]
    pub fn paths(&self) -> StoragePaths {
        StoragePaths::new(&self.data_dir)
    }

    /// Resolves the `SQLite` database file, if the `SQLite` backend is selected.
    #[must_use]
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        match &self.backend {
            BackendConfig::Sqlite { path } => {
                Some(path.clone().unwrap_or_else(|| self.paths().database_path()))
            },
            BackendConfig::Postgres(_) => None,
        }
    }
}
