mod sqlite;

use crate::config::WarehouseConfig;
use crate::errors::DashboardResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use self::sqlite::{SqliteConnector, SqliteWarehouse};

/// Bound parameter and result cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

/// A statement plus its positional parameters. User input only ever travels in `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub text: String,
    pub params: Vec<Value>,
}

/// Raw tabular output with the warehouse's own column naming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularResult {
    /// Case-insensitive column lookup; warehouses disagree on identifier casing.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }
}

pub trait Warehouse: Send + Sync {
    fn execute(&self, statement: &SqlStatement, timeout: Duration) -> DashboardResult<TabularResult>;

    fn backend_name(&self) -> &'static str {
        "warehouse"
    }
}

/// Live, shared handle to the warehouse. Released when the last clone drops.
pub type SessionHandle = Arc<dyn Warehouse>;

pub trait Connector: Send + Sync {
    fn connect(&self, config: &WarehouseConfig) -> anyhow::Result<SessionHandle>;
}

impl<F> Connector for F
where
    F: Fn(&WarehouseConfig) -> anyhow::Result<SessionHandle> + Send + Sync,
{
    fn connect(&self, config: &WarehouseConfig) -> anyhow::Result<SessionHandle> {
        self(config)
    }
}
