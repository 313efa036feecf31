use super::{Connector, SessionHandle, SqlStatement, TabularResult, Value, Warehouse};
use crate::config::WarehouseConfig;
use crate::errors::{DashboardError, DashboardResult};
use anyhow::Context;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// VM instructions between deadline checks.
const PROGRESS_CHECK_OPS: i32 = 1_000;

/// Embedded warehouse backed by rusqlite (bundled SQLite).
#[derive(Debug)]
pub struct SqliteWarehouse {
    conn: Mutex<Connection>,
}

impl SqliteWarehouse {
    /// Opens or creates a database file.
    pub fn create(path: &Path) -> DashboardResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|error| DashboardError::Connection(error.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    /// Opens a database that must already exist.
    pub fn open_existing(path: &Path) -> DashboardResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|error| DashboardError::Connection(format!("{}: {}", path.display(), error)))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> DashboardResult<Self> {
        let conn = Connection::open_in_memory().map_err(|error| DashboardError::Connection(error.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self { conn: Mutex::new(conn) }
    }

    /// Runs a batch of statements without results, e.g. schema setup or fixture loading.
    pub fn execute_batch(&self, sql: &str) -> DashboardResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)
            .map_err(|error| DashboardError::query_failed(error.to_string()))
    }

    fn lock(&self) -> DashboardResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DashboardError::Internal("warehouse mutex poisoned".to_string()))
    }
}

impl Warehouse for SqliteWarehouse {
    fn execute(&self, statement: &SqlStatement, timeout: Duration) -> DashboardResult<TabularResult> {
        // Waiting for the shared connection counts against the statement's budget.
        let deadline = Instant::now() + timeout;
        let conn = self.lock()?;
        if Instant::now() >= deadline {
            return Err(DashboardError::query_timeout(format!(
                "waited more than {}ms for the warehouse connection",
                timeout.as_millis()
            )));
        }
        conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || Instant::now() >= deadline));
        let outcome = run_statement(&conn, statement);
        conn.progress_handler(PROGRESS_CHECK_OPS, None::<fn() -> bool>);

        outcome.map_err(|error| {
            if error.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
                DashboardError::query_timeout(format!("statement exceeded {}ms", timeout.as_millis()))
            } else {
                DashboardError::query_failed(error.to_string())
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

fn run_statement(conn: &Connection, statement: &SqlStatement) -> rusqlite::Result<TabularResult> {
    let mut prepared = conn.prepare(&statement.text)?;
    let columns = prepared
        .column_names()
        .into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let width = columns.len();
    let params = statement.params.iter().map(to_sql_value).collect::<Vec<_>>();

    let rows = prepared
        .query_map(rusqlite::params_from_iter(params), |row| {
            (0..width)
                .map(|index| row.get_ref(index).map(from_value_ref))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TabularResult { columns, rows })
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(i) => rusqlite::types::Value::Integer(*i),
        Value::Real(f) => rusqlite::types::Value::Real(*f),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Connects to `config.database`; `:memory:` yields a fresh scratch database.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl Connector for SqliteConnector {
    fn connect(&self, config: &WarehouseConfig) -> anyhow::Result<SessionHandle> {
        let warehouse = match config.database_path() {
            None => SqliteWarehouse::open_in_memory(),
            Some(path) => SqliteWarehouse::open_existing(&path),
        }
        .with_context(|| format!("opening sqlite warehouse {:?}", config.database))?;
        tracing::info!(database = %config.database, "connected to sqlite warehouse");
        Ok(Arc::new(warehouse))
    }
}

#[cfg(test)]
mod tests {
    use super::{SqliteConnector, SqliteWarehouse};
    use crate::config::WarehouseConfig;
    use crate::db::{Connector, SqlStatement, Value, Warehouse};
    use crate::errors::{DashboardError, QueryErrorKind};
    use std::time::Duration;

    #[test]
    fn binds_parameters_and_reads_native_columns() {
        let warehouse = SqliteWarehouse::open_in_memory().expect("db");
        warehouse
            .execute_batch(
                "CREATE TABLE CLIENTES (C_MKTSEGMENT TEXT);
                 INSERT INTO CLIENTES VALUES ('BUILDING'), ('BUILDING'), ('HOUSEHOLD');",
            )
            .expect("seed");

        let result = warehouse
            .execute(
                &SqlStatement {
                    text: "SELECT C_MKTSEGMENT, COUNT(*) AS CANTIDAD FROM CLIENTES WHERE C_MKTSEGMENT = ?1 GROUP BY C_MKTSEGMENT"
                        .to_string(),
                    params: vec![Value::Text("BUILDING".to_string())],
                },
                Duration::from_secs(5),
            )
            .expect("query");

        assert_eq!(result.columns, vec!["C_MKTSEGMENT".to_string(), "CANTIDAD".to_string()]);
        assert_eq!(
            result.rows,
            vec![vec![Value::Text("BUILDING".to_string()), Value::Integer(2)]]
        );
    }

    #[test]
    fn quote_in_parameter_is_data_not_sql() {
        let warehouse = SqliteWarehouse::open_in_memory().expect("db");
        warehouse
            .execute_batch("CREATE TABLE CLIENTES (C_MKTSEGMENT TEXT); INSERT INTO CLIENTES VALUES ('BUILDING');")
            .expect("seed");
        let result = warehouse
            .execute(
                &SqlStatement {
                    text: "SELECT COUNT(*) FROM CLIENTES WHERE C_MKTSEGMENT = ?1".to_string(),
                    params: vec![Value::Text("x' OR '1'='1".to_string())],
                },
                Duration::from_secs(5),
            )
            .expect("query");
        assert_eq!(result.rows, vec![vec![Value::Integer(0)]]);
    }

    #[test]
    fn malformed_sql_is_a_query_failure() {
        let warehouse = SqliteWarehouse::open_in_memory().expect("db");
        let err = warehouse
            .execute(
                &SqlStatement {
                    text: "SELECT FROM nowhere".to_string(),
                    params: Vec::new(),
                },
                Duration::from_secs(5),
            )
            .expect_err("bad sql");
        assert!(matches!(
            err,
            DashboardError::QueryExecution {
                kind: QueryErrorKind::Failed,
                ..
            }
        ));
    }

    #[test]
    fn long_statement_is_interrupted_as_timeout() {
        let warehouse = SqliteWarehouse::open_in_memory().expect("db");
        let err = warehouse
            .execute(
                &SqlStatement {
                    text: "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT COUNT(*) FROM n"
                        .to_string(),
                    params: Vec::new(),
                },
                Duration::from_millis(50),
            )
            .expect_err("unbounded recursion must be interrupted");
        assert!(matches!(
            err,
            DashboardError::QueryExecution {
                kind: QueryErrorKind::Timeout,
                ..
            }
        ));

        // Handler is cleared; the connection stays usable.
        let ok = warehouse
            .execute(
                &SqlStatement {
                    text: "SELECT 1".to_string(),
                    params: Vec::new(),
                },
                Duration::from_secs(5),
            )
            .expect("follow-up query");
        assert_eq!(ok.rows, vec![vec![Value::Integer(1)]]);
    }

    #[test]
    fn time_spent_waiting_for_the_connection_counts_toward_timeout() {
        let warehouse = SqliteWarehouse::open_in_memory().expect("db");
        let err = std::thread::scope(|scope| {
            let held = warehouse.conn.lock().expect("hold connection");
            let waiter = scope.spawn(|| {
                warehouse.execute(
                    &SqlStatement {
                        text: "SELECT 1".to_string(),
                        params: Vec::new(),
                    },
                    Duration::from_millis(50),
                )
            });
            std::thread::sleep(Duration::from_millis(150));
            drop(held);
            waiter.join().expect("join").expect_err("deadline passed while queued")
        });
        assert!(matches!(
            err,
            DashboardError::QueryExecution {
                kind: QueryErrorKind::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn connector_rejects_missing_database_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = WarehouseConfig {
            database: dir.path().join("absent.db").to_string_lossy().into_owned(),
            ..WarehouseConfig::default()
        };
        let err = SqliteConnector.connect(&config).err().expect("missing file");
        assert!(format!("{:#}", err).contains("absent.db"));
    }

    #[test]
    fn connector_opens_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("warehouse.db");
        SqliteWarehouse::create(&path)
            .expect("create")
            .execute_batch("CREATE TABLE CLIENTES (C_MKTSEGMENT TEXT);")
            .expect("schema");

        let config = WarehouseConfig {
            database: path.to_string_lossy().into_owned(),
            ..WarehouseConfig::default()
        };
        let handle = SqliteConnector.connect(&config).expect("connect");
        assert_eq!(handle.backend_name(), "sqlite");
    }
}
