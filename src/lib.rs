mod cache;
mod config;
mod context;
mod db;
mod errors;
mod models;
mod query;
mod session;
mod telemetry;

pub use crate::cache::{CacheOutcome, Clock, ResultCache, SystemClock};
pub use crate::config::{DashboardConfig, WarehouseConfig};
pub use crate::context::DashboardContext;
pub use crate::db::{
    Connector, SessionHandle, SqlStatement, SqliteConnector, SqliteWarehouse, TabularResult, Value, Warehouse,
};
pub use crate::errors::{DashboardError, DashboardResult, QueryErrorKind};
pub use crate::models::{AggregateRow, QueryResult, SegmentFilter};
pub use crate::query::{QueryShape, SegmentAggregateQuery};
pub use crate::session::SessionProvider;
pub use crate::telemetry::{init_tracing, init_tracing_from_config};
