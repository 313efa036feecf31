use crate::errors::{DashboardError, DashboardResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentFilter {
    #[serde(rename = "Todos")]
    All,
    #[serde(rename = "HOUSEHOLD")]
    Household,
    #[serde(rename = "BUILDING")]
    Building,
    #[serde(rename = "FURNITURE")]
    Furniture,
    #[serde(rename = "AUTOMOBILE")]
    Automobile,
    #[serde(rename = "MACHINERY")]
    Machinery,
}

impl SegmentFilter {
    /// Selector options in display order, "Todos" first.
    pub const ALL_OPTIONS: [SegmentFilter; 6] = [
        Self::All,
        Self::Household,
        Self::Building,
        Self::Furniture,
        Self::Automobile,
        Self::Machinery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "Todos",
            Self::Household => "HOUSEHOLD",
            Self::Building => "BUILDING",
            Self::Furniture => "FURNITURE",
            Self::Automobile => "AUTOMOBILE",
            Self::Machinery => "MACHINERY",
        }
    }

    /// The market-segment code to match on, or `None` for the unfiltered sentinel.
    pub fn segment_code(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            other => Some(other.as_str()),
        }
    }
}

impl FromStr for SegmentFilter {
    type Err = DashboardError;

    fn from_str(value: &str) -> DashboardResult<Self> {
        Self::ALL_OPTIONS
            .into_iter()
            .find(|option| option.as_str() == value)
            .ok_or_else(|| DashboardError::InvalidFilter(format!("unknown market segment {:?}", value)))
    }
}

impl fmt::Display for SegmentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AggregateRow {
    pub segment: String,
    pub count: u64,
}

/// Normalized output of one aggregate query, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueryResult {
    filter: SegmentFilter,
    rows: Vec<AggregateRow>,
    total: u64,
    cardinality: usize,
    fetched_at: DateTime<Utc>,
}

impl QueryResult {
    /// Sorts rows by count descending; ties keep their incoming order.
    pub fn from_rows(filter: SegmentFilter, mut rows: Vec<AggregateRow>, fetched_at: DateTime<Utc>) -> Self {
        rows.sort_by(|left, right| right.count.cmp(&left.count));
        let total = rows.iter().map(|row| row.count).sum();
        let cardinality = rows.len();
        Self {
            filter,
            rows,
            total,
            cardinality,
            fetched_at,
        }
    }

    pub fn filter(&self) -> SegmentFilter {
        self.filter
    }

    pub fn rows(&self) -> &[AggregateRow] {
        &self.rows
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn chart_series(&self) -> Vec<(&str, u64)> {
        self.rows
            .iter()
            .map(|row| (row.segment.as_str(), row.count))
            .collect()
    }
}
