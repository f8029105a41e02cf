use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ToleranceKind;
use crate::error::ReconError;

/// Metric that carries position quantities on both sides.
pub const UNITS: &str = "units";
pub const PRICE: &str = "price";
pub const ACB: &str = "acb";

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    Equity,
    FixedIncome,
    PrivateEquity,
    Cash,
    Other,
}

impl InstrumentType {
    /// Unknown labels fall into `Other` rather than failing the feed.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "equity" => Self::Equity,
            "fixed_income" => Self::FixedIncome,
            "private_equity" => Self::PrivateEquity,
            "cash" => Self::Cash,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equity => write!(f, "equity"),
            Self::FixedIncome => write!(f, "fixed_income"),
            Self::PrivateEquity => write!(f, "private_equity"),
            Self::Cash => write!(f, "cash"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Which source a table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    D1g1t,
    Custodian,
}

impl Side {
    /// Column prefix used by both sources, e.g. `d1g1t_units`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::D1g1t => "d1g1t",
            Self::Custodian => "custodian",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Alignment key. Unique within each source table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PositionKey {
    pub client_id: String,
    pub instrument_id: String,
    pub as_of_date: NaiveDate,
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.client_id, self.instrument_id, self.as_of_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRow {
    pub client_id: String,
    pub firm_id: String,
    pub custodian_id: String,
    pub instrument_id: String,
    pub instrument_type: InstrumentType,
    pub as_of_date: NaiveDate,
    /// Metric name (unprefixed) → value; `None` is a null cell.
    pub metrics: BTreeMap<String, Option<Decimal>>,
}

impl PositionRow {
    pub fn key(&self) -> PositionKey {
        PositionKey {
            client_id: self.client_id.clone(),
            instrument_id: self.instrument_id.clone(),
            as_of_date: self.as_of_date,
        }
    }

    pub fn metric(&self, name: &str) -> Option<Decimal> {
        self.metrics.get(name).copied().flatten()
    }

    pub fn set_metric(&mut self, name: &str, value: Option<Decimal>) {
        self.metrics.insert(name.to_string(), value);
    }
}

/// One side's positions.
///
/// Rows are unique by [`PositionKey`] when built with [`PositionTable::new`].
/// Custodian feeds arrive as [`PositionTable::lots`], which may repeat a key
/// until a firm hook aggregates them; the engine calls
/// [`PositionTable::check_unique`] before alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionTable {
    side: Side,
    metric_columns: BTreeSet<String>,
    rows: Vec<PositionRow>,
}

impl PositionTable {
    pub fn new(
        side: Side,
        metric_columns: impl IntoIterator<Item = String>,
        rows: Vec<PositionRow>,
    ) -> Result<Self, ReconError> {
        Self::lots(side, metric_columns, rows).check_unique()
    }

    /// Table whose rows may share a key, e.g. one row per tax lot.
    pub fn lots(
        side: Side,
        metric_columns: impl IntoIterator<Item = String>,
        rows: Vec<PositionRow>,
    ) -> Self {
        Self {
            side,
            metric_columns: metric_columns.into_iter().collect(),
            rows,
        }
    }

    /// Fails on the first key that appears twice.
    pub fn check_unique(self) -> Result<Self, ReconError> {
        let mut seen = HashSet::with_capacity(self.rows.len());
        for row in &self.rows {
            let key = row.key();
            if !seen.insert(key.clone()) {
                return Err(ReconError::DuplicatePosition {
                    side: self.side,
                    key,
                });
            }
        }
        Ok(self)
    }

    pub fn empty(side: Side) -> Self {
        Self::lots(side, std::iter::empty(), Vec::new())
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn metric_columns(&self) -> &BTreeSet<String> {
        &self.metric_columns
    }

    pub fn has_metric(&self, name: &str) -> bool {
        self.metric_columns.contains(name)
    }

    pub fn rows(&self) -> &[PositionRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<PositionRow> {
        self.rows
    }

    /// Apply `f` to every row in place. Keys may change; uniqueness is not
    /// re-checked here.
    pub fn map_rows(mut self, f: impl FnMut(&mut PositionRow)) -> Self {
        self.rows.iter_mut().for_each(f);
        self
    }

    pub fn retain(mut self, f: impl FnMut(&PositionRow) -> bool) -> Self {
        self.rows.retain(f);
        self
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Outcome of comparing one metric on one aligned row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDelta {
    pub metric: String,
    pub d1g1t_value: Option<Decimal>,
    pub custodian_value: Option<Decimal>,
    /// `|d1g1t - custodian|`; absent when either side is null.
    pub delta: Option<Decimal>,
    /// `d1g1t - custodian`.
    pub difference: Option<Decimal>,
    pub tolerance: Decimal,
    pub tolerance_kind: ToleranceKind,
    pub within_tolerance: bool,
    /// Set when a firm rule forgives this break.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub waived: bool,
}

impl MetricDelta {
    pub fn is_break(&self) -> bool {
        !self.within_tolerance && !self.waived
    }
}

/// A key present on both sides, with every compared metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparedRow {
    pub key: PositionKey,
    pub custodian_id: String,
    pub instrument_type: InstrumentType,
    pub comparisons: Vec<MetricDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ComparedRow {
    pub fn breaks(&self) -> impl Iterator<Item = &MetricDelta> {
        self.comparisons.iter().filter(|c| c.is_break())
    }

    pub fn has_breaks(&self) -> bool {
        self.breaks().next().is_some()
    }

    pub fn comparison(&self, metric: &str) -> Option<&MetricDelta> {
        self.comparisons.iter().find(|c| c.metric == metric)
    }

    /// Forgive breaks on `metric`. Returns true if anything changed.
    pub fn waive(&mut self, metric: &str) -> bool {
        let mut changed = false;
        for c in self.comparisons.iter_mut().filter(|c| c.metric == metric) {
            if c.is_break() {
                c.waived = true;
                changed = true;
            }
        }
        changed
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

/// Break count for one metric of one custodian ("Total" across custodians).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakSummary {
    pub custodian_id: String,
    pub metric: String,
    pub breaks: usize,
    pub total: usize,
    /// Share of compared rows without a break, rounded to 4 places.
    pub reconciled_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconSummary {
    pub matched: usize,
    pub mismatched: usize,
    pub unmatched_d1g1t: usize,
    pub unmatched_custodian: usize,
    /// Mismatches removed by firm post-processing.
    pub suppressed: usize,
    /// Aligned rows with no units on either side.
    pub dead_positions: usize,
    pub breaks: Vec<BreakSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconMeta {
    pub firm_id: String,
    pub client_id: String,
    pub as_of_date: NaiveDate,
    pub custodians: Vec<String>,
    pub adapter: String,
    pub engine_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconResult {
    pub meta: ReconMeta,
    pub summary: ReconSummary,
    pub matched: Vec<ComparedRow>,
    pub mismatched: Vec<ComparedRow>,
    pub unmatched_d1g1t: Vec<PositionRow>,
    pub unmatched_custodian: Vec<PositionRow>,
}

impl ReconResult {
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty()
            && self.unmatched_d1g1t.is_empty()
            && self.unmatched_custodian.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
