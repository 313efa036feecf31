use crate::cache::{CacheOutcome, Clock, ResultCache, SystemClock};
use crate::config::DashboardConfig;
use crate::db::Connector;
use crate::errors::DashboardResult;
use crate::models::{QueryResult, SegmentFilter};
use crate::query::{QueryShape, SegmentAggregateQuery};
use crate::session::SessionProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Everything one dashboard process needs: the memoized session, the query and its cache.
/// The host owns it and drops it on shutdown, which releases the warehouse handle.
pub struct DashboardContext {
    sessions: SessionProvider,
    query: SegmentAggregateQuery,
    cache: ResultCache,
    query_timeout: Duration,
}

impl DashboardContext {
    pub fn new(config: DashboardConfig, connector: Arc<dyn Connector>) -> DashboardResult<Self> {
        Self::with_clock(config, connector, Arc::new(SystemClock))
    }

    pub fn with_clock(config: DashboardConfig, connector: Arc<dyn Connector>, clock: Arc<dyn Clock>) -> DashboardResult<Self> {
        config.validate()?;
        let query = SegmentAggregateQuery::new(QueryShape::from_config(&config)?);
        Ok(Self {
            sessions: SessionProvider::new(connector, config.warehouse.clone()),
            query,
            cache: ResultCache::new(config.cache_ttl(), clock),
            query_timeout: config.query_timeout(),
        })
    }

    /// Entry point for raw selector values. Unknown values never reach the warehouse.
    pub fn segment_counts(&self, filter: &str) -> DashboardResult<QueryResult> {
        let filter = filter.parse::<SegmentFilter>().inspect_err(|error| {
            tracing::warn!(error = %error, "rejected segment filter");
        })?;
        self.segment_counts_for(filter)
    }

    pub fn segment_counts_for(&self, filter: SegmentFilter) -> DashboardResult<QueryResult> {
        let (result, outcome) = self.cache.get_or_try_insert_with(filter, || self.execute(filter))?;
        if outcome == CacheOutcome::Hit {
            tracing::debug!(filter = %filter, rows = result.cardinality(), "segment counts served from cache");
        }
        Ok(result)
    }

    /// Runs the blocking path on tokio's blocking pool.
    pub async fn segment_counts_async(self: &Arc<Self>, filter: String) -> DashboardResult<QueryResult> {
        let context = Arc::clone(self);
        tokio::task::spawn_blocking(move || context.segment_counts(&filter)).await?
    }

    /// Drops the cached entry for `filter` and queries again.
    pub fn refresh(&self, filter: SegmentFilter) -> DashboardResult<QueryResult> {
        self.cache.invalidate(filter)?;
        self.segment_counts_for(filter)
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn is_connected(&self) -> bool {
        self.sessions.is_connected()
    }

    fn execute(&self, filter: SegmentFilter) -> DashboardResult<QueryResult> {
        let query_id = Uuid::new_v4();
        let started = Instant::now();
        let outcome = self
            .sessions
            .get_session()
            .and_then(|handle| self.query.run(&handle, filter, self.query_timeout));

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => tracing::info!(
                query_id = %query_id,
                filter = %filter,
                rows = result.cardinality(),
                total = result.total(),
                elapsed_ms,
                "segment aggregate executed"
            ),
            Err(error) => tracing::warn!(
                query_id = %query_id,
                filter = %filter,
                elapsed_ms,
                error = %error,
                "segment aggregate failed"
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::DashboardContext;
    use crate::cache::tests::ManualClock;
    use crate::config::{DashboardConfig, WarehouseConfig};
    use crate::db::{SessionHandle, SqliteWarehouse};
    use crate::errors::DashboardError;
    use crate::models::SegmentFilter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn seeded_connector(connects: Arc<AtomicUsize>) -> impl Fn(&WarehouseConfig) -> anyhow::Result<SessionHandle> + Send + Sync {
        move |_: &WarehouseConfig| -> anyhow::Result<SessionHandle> {
            connects.fetch_add(1, Ordering::SeqCst);
            let warehouse = SqliteWarehouse::open_in_memory()?;
            warehouse.execute_batch(
                "CREATE TABLE CLIENTES (C_CUSTKEY INTEGER, C_MKTSEGMENT TEXT);
                 INSERT INTO CLIENTES VALUES (1, 'BUILDING'), (2, 'BUILDING'), (3, 'HOUSEHOLD');",
            )?;
            let handle: SessionHandle = Arc::new(warehouse);
            Ok(handle)
        }
    }

    #[test]
    fn invalid_filter_never_opens_a_session() {
        let connects = Arc::new(AtomicUsize::new(0));
        let context =
            DashboardContext::new(DashboardConfig::default(), Arc::new(seeded_connector(connects.clone()))).expect("context");

        let err = context.segment_counts("SHIPPING").expect_err("invalid filter");
        assert!(matches!(err, DashboardError::InvalidFilter(_)));
        assert!(!context.is_connected());
        assert_eq!(connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn refresh_bypasses_fresh_entry() {
        let connects = Arc::new(AtomicUsize::new(0));
        let clock = ManualClock::new();
        let context = DashboardContext::with_clock(
            DashboardConfig::default(),
            Arc::new(seeded_connector(connects.clone())),
            clock,
        )
        .expect("context");

        let first = context.segment_counts("BUILDING").expect("first");
        assert_eq!(first.total(), 2);
        let refreshed = context.refresh(SegmentFilter::Building).expect("refresh");
        assert_eq!(refreshed.total(), 2);
        assert!(refreshed.fetched_at() >= first.fetched_at());
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connection_failure_surfaces_and_is_not_cached() {
        let context = DashboardContext::new(
            DashboardConfig::default(),
            Arc::new(|_: &WarehouseConfig| -> anyhow::Result<SessionHandle> { anyhow::bail!("network unreachable") }),
        )
        .expect("context");

        let err = context.segment_counts("Todos").expect_err("connect fails");
        assert!(matches!(err, DashboardError::Connection(_)));
        assert!(!err.is_retryable());
        assert!(context.cache().is_empty().expect("is_empty"));
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = DashboardConfig::default();
        config.query_timeout_ms = 1;
        let err = DashboardContext::new(config, Arc::new(seeded_connector(Arc::new(AtomicUsize::new(0)))))
            .err()
            .expect("invalid config");
        assert!(matches!(err, DashboardError::Config(_)));
    }

    #[tokio::test]
    async fn async_entry_point_matches_blocking_path() {
        let mut config = DashboardConfig::default();
        config.cache_ttl_secs = 60;
        let context = Arc::new(
            DashboardContext::new(config, Arc::new(seeded_connector(Arc::new(AtomicUsize::new(0))))).expect("context"),
        );

        let result = context.segment_counts_async("Todos".to_string()).await.expect("async");
        assert_eq!(result.total(), 3);
        assert_eq!(result.rows()[0].segment, "BUILDING");
        assert_eq!(context.cache().ttl(), Duration::from_secs(60));

        let err = context
            .segment_counts_async("household".to_string())
            .await
            .expect_err("case-sensitive filter");
        assert!(matches!(err, DashboardError::InvalidFilter(_)));
    }
}
