use crate::config::{validate_identifier, DashboardConfig};
use crate::db::{SessionHandle, SqlStatement, TabularResult, Value};
use crate::errors::{DashboardError, DashboardResult};
use crate::models::{AggregateRow, QueryResult, SegmentFilter};
use chrono::Utc;
use std::time::Duration;

/// Names the aggregate runs against. Spliced into SQL text, hence validated up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryShape {
    relation: String,
    segment_column: String,
    count_alias: String,
}

impl QueryShape {
    pub fn new(
        relation: impl Into<String>,
        segment_column: impl Into<String>,
        count_alias: impl Into<String>,
    ) -> DashboardResult<Self> {
        let shape = Self {
            relation: relation.into(),
            segment_column: segment_column.into(),
            count_alias: count_alias.into(),
        };
        validate_identifier("relation", &shape.relation)?;
        validate_identifier("segment_column", &shape.segment_column)?;
        validate_identifier("count_alias", &shape.count_alias)?;
        Ok(shape)
    }

    pub fn from_config(config: &DashboardConfig) -> DashboardResult<Self> {
        Self::new(&config.relation, &config.segment_column, &config.count_alias)
    }
}

#[derive(Debug, Clone)]
pub struct SegmentAggregateQuery {
    shape: QueryShape,
}

impl SegmentAggregateQuery {
    pub fn new(shape: QueryShape) -> Self {
        Self { shape }
    }

    pub fn statement(&self, filter: SegmentFilter) -> SqlStatement {
        let QueryShape {
            relation,
            segment_column,
            count_alias,
        } = &self.shape;

        let (predicate, params) = match filter.segment_code() {
            None => (String::new(), Vec::new()),
            Some(code) => (
                format!(" WHERE {} = ?1", segment_column),
                vec![Value::Text(code.to_string())],
            ),
        };

        SqlStatement {
            text: format!(
                "SELECT {col}, COUNT(*) AS {alias} FROM {rel}{predicate} GROUP BY {col} ORDER BY {alias} DESC",
                col = segment_column,
                alias = count_alias,
                rel = relation,
                predicate = predicate,
            ),
            params,
        }
    }

    pub fn run(&self, handle: &SessionHandle, filter: SegmentFilter, timeout: Duration) -> DashboardResult<QueryResult> {
        let statement = self.statement(filter);
        tracing::debug!(filter = %filter, sql = %statement.text, "executing segment aggregate");
        let raw = handle.execute(&statement, timeout)?;
        let rows = self.normalize(raw)?;
        Ok(QueryResult::from_rows(filter, rows, Utc::now()))
    }

    /// Maps native column names onto `{segment, count}`.
    fn normalize(&self, raw: TabularResult) -> DashboardResult<Vec<AggregateRow>> {
        if raw.rows.is_empty() {
            return Ok(Vec::new());
        }
        let segment_index = raw
            .column_index(&self.shape.segment_column)
            .ok_or_else(|| missing_column(&self.shape.segment_column, &raw.columns))?;
        let count_index = raw
            .column_index(&self.shape.count_alias)
            .ok_or_else(|| missing_column(&self.shape.count_alias, &raw.columns))?;

        raw.rows
            .into_iter()
            .map(|mut cells| {
                let count = match cells.get(count_index) {
                    Some(Value::Integer(value)) if *value >= 0 => *value as u64,
                    other => {
                        return Err(DashboardError::query_failed(format!(
                            "count column {} holds {:?}, expected a non-negative integer",
                            self.shape.count_alias, other
                        )))
                    }
                };
                let segment = match cells
                    .get_mut(segment_index)
                    .map(|cell| std::mem::replace(cell, Value::Null))
                {
                    Some(Value::Text(text)) => text,
                    Some(Value::Integer(value)) => value.to_string(),
                    Some(Value::Real(value)) => value.to_string(),
                    Some(Value::Null) | None => String::new(),
                };
                Ok(AggregateRow { segment, count })
            })
            .collect()
    }
}

fn missing_column(expected: &str, columns: &[String]) -> DashboardError {
    DashboardError::query_failed(format!(
        "result is missing column {} (got {})",
        expected,
        columns.join(", ")
    ))
}
