use crate::config::WarehouseConfig;
use crate::db::{Connector, SessionHandle};
use crate::errors::{DashboardError, DashboardResult};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Lazily connects once and hands out the same handle afterwards.
pub struct SessionProvider {
    connector: Arc<dyn Connector>,
    config: WarehouseConfig,
    session: OnceCell<SessionHandle>,
}

impl SessionProvider {
    pub fn new(connector: Arc<dyn Connector>, config: WarehouseConfig) -> Self {
        Self {
            connector,
            config,
            session: OnceCell::new(),
        }
    }

    /// Failed attempts are not memoized; the next call connects again.
    pub fn get_session(&self) -> DashboardResult<SessionHandle> {
        self.session
            .get_or_try_init(|| {
                tracing::info!(
                    account = self.config.account.as_deref().unwrap_or("-"),
                    warehouse = self.config.warehouse.as_deref().unwrap_or("-"),
                    "opening warehouse session"
                );
                self.connector.connect(&self.config).map_err(|error| {
                    tracing::error!(error = %format!("{:#}", error), "warehouse connection failed");
                    DashboardError::Connection(format!("{:#}", error))
                })
            })
            .cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.session.get().is_some()
    }
}
