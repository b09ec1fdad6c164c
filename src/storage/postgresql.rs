//! Networked PostgreSQL backend.
//!
//! The driver is async; the cache API is blocking. The backend owns a small
//! tokio runtime and blocks on it for every call, so it must not be used from
//! inside another runtime's async context.

#[cfg(feature = "postgres")]
mod implementation {
    use crate::config::PostgresConfig;
    use crate::storage::dialect::{Dialect, PostgresDialect};
    use crate::storage::driver::{
        Backend, BackendKind, Connection, DriverError, DriverErrorKind, DriverResult,
    };
    use crate::storage::value::{Row, Value};
    use crate::{Error, Result};
    use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
    use secrecy::ExposeSecret;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::runtime::Runtime as TokioRuntime;
    use tokio_postgres::error::SqlState;
    use tokio_postgres::types::{ToSql, Type};
    use tokio_postgres::NoTls;

    type Param = Box<dyn ToSql + Sync + Send>;

    /// Classifies a tokio-postgres error for the executor.
    pub fn classify(err: &tokio_postgres::Error) -> DriverError {
        let message = err.to_string();
        let Some(code) = err.code() else {
            return DriverError::other(message);
        };

        let kind = if *code == SqlState::UNDEFINED_TABLE || *code == SqlState::UNDEFINED_COLUMN {
            DriverErrorKind::MissingObject
        } else if *code == SqlState::LOCK_NOT_AVAILABLE
            || *code == SqlState::T_R_DEADLOCK_DETECTED
            || *code == SqlState::T_R_SERIALIZATION_FAILURE
        {
            DriverErrorKind::Busy
        } else {
            DriverErrorKind::Other
        };
        DriverError::new(kind, message)
    }

    #[allow(clippy::needless_pass_by_value)]
    fn classify_owned(err: tokio_postgres::Error) -> DriverError {
        classify(&err)
    }

    /// Converts a cache value into a driver parameter matching the
    /// statement's inferred parameter type.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn bind(value: &Value, ty: &Type) -> Param {
        match value {
            Value::Null => null_of(ty),
            Value::Integer(i) => {
                if *ty == Type::INT4 {
                    Box::new(*i as i32)
                } else if *ty == Type::INT2 {
                    Box::new(*i as i16)
                } else if *ty == Type::FLOAT8 {
                    Box::new(*i as f64)
                } else if is_text(ty) {
                    Box::new(i.to_string())
                } else {
                    Box::new(*i)
                }
            },
            Value::Real(f) => {
                if *ty == Type::FLOAT4 {
                    Box::new(*f as f32)
                } else if *ty == Type::INT8 {
                    Box::new(*f as i64)
                } else {
                    Box::new(*f)
                }
            },
            Value::Text(s) => {
                if *ty == Type::BYTEA {
                    Box::new(s.as_bytes().to_vec())
                } else {
                    Box::new(s.clone())
                }
            },
            Value::Blob(b) => {
                if is_text(ty) {
                    Box::new(String::from_utf8_lossy(b).into_owned())
                } else {
                    Box::new(b.clone())
                }
            },
        }
    }

    fn null_of(ty: &Type) -> Param {
        if *ty == Type::INT8 {
            Box::new(None::<i64>)
        } else if *ty == Type::INT4 {
            Box::new(None::<i32>)
        } else if *ty == Type::INT2 {
            Box::new(None::<i16>)
        } else if *ty == Type::FLOAT8 {
            Box::new(None::<f64>)
        } else if *ty == Type::BYTEA {
            Box::new(None::<Vec<u8>>)
        } else {
            Box::new(None::<String>)
        }
    }

    fn is_text(ty: &Type) -> bool {
        *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    }

    fn read_column(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> DriverResult<Value> {
        let value = if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx).map(Value::from)
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)
                .map(|v| Value::from(v.map(i64::from)))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)
                .map(|v| Value::from(v.map(i64::from)))
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)
                .map(|v| Value::from(v.map(i64::from)))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)
                .map(|v| v.map_or(Value::Null, Value::Real))
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)
                .map(|v| v.map_or(Value::Null, |f| Value::Real(f64::from(f))))
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(idx).map(Value::from)
        } else {
            row.try_get::<_, Option<String>>(idx).map(Value::from)
        };
        value.map_err(classify_owned)
    }

    /// PostgreSQL engine backed by a deadpool connection pool.
    pub struct PostgresBackend {
        pool: Pool,
        runtime: Arc<TokioRuntime>,
        dialect: PostgresDialect,
        location: String,
    }

    impl PostgresBackend {
        /// Creates the backend and its driver pool.
        ///
        /// No connection is opened until the first statement runs.
        ///
        /// # Errors
        ///
        /// Returns an error if the runtime or the pool cannot be created.
        pub fn new(config: &PostgresConfig, connect_timeout: Duration) -> Result<Self> {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("mediacache-pg")
                .enable_all()
                .build()
                .map_err(|e| Error::failed("postgres_create_runtime", e))?;

            let cfg = Self::build_pool_config(config, connect_timeout);
            let pool = cfg
                .create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| Error::failed("postgres_create_pool", e))?;

            Ok(Self {
                pool,
                runtime: Arc::new(runtime),
                dialect: PostgresDialect,
                location: format!(
                    "postgresql://{}@{}:{}/{}",
                    config.user, config.host, config.port, config.database
                ),
            })
        }

        /// Builds a deadpool config with bounded wait, create and recycle
        /// timeouts.
        fn build_pool_config(config: &PostgresConfig, connect_timeout: Duration) -> Config {
            let mut cfg = Config::new();
            cfg.host = Some(config.host.clone());
            cfg.port = Some(config.port);
            cfg.user = Some(config.user.clone());
            let password = config.password.expose_secret();
            if !password.is_empty() {
                cfg.password = Some(password.to_string());
            }
            cfg.dbname = Some(config.database.clone());
            cfg.connect_timeout = Some(connect_timeout);

            cfg.pool = Some(deadpool_postgres::PoolConfig {
                max_size: config.pool_max_size.max(1),
                timeouts: deadpool_postgres::Timeouts {
                    wait: Some(connect_timeout),
                    create: Some(connect_timeout),
                    recycle: Some(connect_timeout),
                },
                ..Default::default()
            });
            cfg.manager = Some(ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            });
            cfg
        }
    }

    impl Backend for PostgresBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Networked
        }

        fn dialect(&self) -> &dyn Dialect {
            &self.dialect
        }

        fn open(&self) -> DriverResult<Box<dyn Connection>> {
            let client = self
                .runtime
                .block_on(self.pool.get())
                .map_err(|e| DriverError::other(format!("postgres pool: {e}")))?;
            Ok(Box::new(PostgresConnection {
                client,
                runtime: Arc::clone(&self.runtime),
                in_tx: false,
            }))
        }

        fn describe(&self) -> String {
            self.location.clone()
        }
    }

    /// A pooled PostgreSQL client.
    pub struct PostgresConnection {
        client: deadpool_postgres::Object,
        runtime: Arc<TokioRuntime>,
        in_tx: bool,
    }

    impl PostgresConnection {
        fn batch(&self, sql: &str) -> DriverResult<()> {
            self.runtime
                .block_on(self.client.batch_execute(sql))
                .map_err(classify_owned)
        }
    }

    impl Connection for PostgresConnection {
        fn query(&mut self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>> {
            let client = &self.client;
            self.runtime.block_on(async {
                let stmt = client.prepare_cached(sql).await.map_err(classify_owned)?;
                let bound: Vec<Param> = params
                    .iter()
                    .zip(stmt.params())
                    .map(|(value, ty)| bind(value, ty))
                    .collect();
                let refs: Vec<&(dyn ToSql + Sync)> =
                    bound.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
                let rows = client.query(&stmt, &refs).await.map_err(classify_owned)?;

                rows.iter()
                    .map(|row| {
                        row.columns()
                            .iter()
                            .enumerate()
                            .map(|(idx, column)| read_column(row, idx, column.type_()))
                            .collect::<DriverResult<Vec<_>>>()
                            .map(Row)
                    })
                    .collect()
            })
        }

        fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<u64> {
            let client = &self.client;
            self.runtime.block_on(async {
                let stmt = client.prepare_cached(sql).await.map_err(classify_owned)?;
                let bound: Vec<Param> = params
                    .iter()
                    .zip(stmt.params())
                    .map(|(value, ty)| bind(value, ty))
                    .collect();
                let refs: Vec<&(dyn ToSql + Sync)> =
                    bound.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
                client.execute(&stmt, &refs).await.map_err(classify_owned)
            })
        }

        fn begin(&mut self) -> DriverResult<()> {
            self.batch("BEGIN")?;
            self.in_tx = true;
            Ok(())
        }

        fn commit(&mut self) -> DriverResult<()> {
            let result = self.batch("COMMIT");
            self.in_tx = false;
            result
        }

        fn rollback(&mut self) -> DriverResult<()> {
            let result = self.batch("ROLLBACK");
            self.in_tx = false;
            result
        }

        fn in_transaction(&self) -> bool {
            self.in_tx
        }
    }

    impl Drop for PostgresConnection {
        fn drop(&mut self) {
            // The client returns to the driver pool; never hand it back mid-transaction.
            if self.in_tx {
                let _ = self.batch("ROLLBACK");
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_bind_null_uses_column_type() {
            // Only checks that binding does not panic for each supported type.
            for ty in [Type::INT8, Type::INT4, Type::BYTEA, Type::TEXT, Type::FLOAT8] {
                let _ = bind(&Value::Null, &ty);
                let _ = bind(&Value::Integer(1), &ty);
                let _ = bind(&Value::Text("x".to_string()), &ty);
            }
        }

        #[test]
        fn test_backend_creation_is_lazy() {
            let config = PostgresConfig {
                host: "127.0.0.1".to_string(),
                port: 1,
                ..PostgresConfig::default()
            };
            let backend = PostgresBackend::new(&config, Duration::from_millis(200)).unwrap();
            assert_eq!(backend.kind(), BackendKind::Networked);
            assert_eq!(backend.dialect().name(), "postgresql");
            assert!(backend.describe().contains("127.0.0.1:1"));
            assert!(backend.storage_files().is_empty());

            // Nothing listens on port 1
            assert!(backend.open().is_err());
        }
    }
}

#[cfg(feature = "postgres")]
pub use implementation::{PostgresBackend, PostgresConnection, classify};
