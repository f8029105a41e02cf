//! Firm adapters: per-firm hooks applied around the comparison.
//!
//! Each hook is a pure `table -> table` transform. Hooks receive their input
//! by value, so nothing a hook does can leak into another custodian's table
//! or into shared configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::aggregate::aggregate_positions;
use crate::config::{AdapterConfig, PrivateEquityPolicy};
use crate::model::{ComparedRow, InstrumentType, PositionTable, UNITS};

/// Error type a hook may return. The engine wraps it as
/// [`ReconError::FirmSpecificLogic`](crate::ReconError::FirmSpecificLogic).
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

pub trait FirmAdapter: Send + Sync + fmt::Debug {
    /// Short label recorded in the result metadata.
    fn name(&self) -> &str;

    /// Transform the d1g1t table once per run.
    fn apply_firm_specific_d1g1t_logic(
        &self,
        table: PositionTable,
    ) -> Result<PositionTable, HookError> {
        Ok(table)
    }

    /// Transform one custodian's table.
    fn apply_firm_specific_custodian_logic(
        &self,
        _custodian_id: &str,
        table: PositionTable,
    ) -> Result<PositionTable, HookError> {
        Ok(table)
    }

    /// Filter or annotate the combined mismatched set. Must not add rows.
    fn apply_recon_post_processing_logic(
        &self,
        mismatched: Vec<ComparedRow>,
    ) -> Result<Vec<ComparedRow>, HookError> {
        Ok(mismatched)
    }
}

/// Build the adapter a firm's configuration asks for.
pub fn build_adapter(config: &AdapterConfig) -> Arc<dyn FirmAdapter> {
    match config {
        AdapterConfig::Identity => Arc::new(IdentityAdapter),
        AdapterConfig::Pcr { private_equity } => Arc::new(PcrAdapter::new(*private_equity)),
        AdapterConfig::InstrumentRemoval { instruments } => {
            Arc::new(InstrumentRemovalAdapter::new(instruments.iter().cloned()))
        }
        AdapterConfig::MetricWaiver {
            instruments,
            metrics,
        } => Arc::new(MetricWaiverAdapter::new(
            instruments.iter().cloned(),
            metrics.iter().cloned(),
        )),
        AdapterConfig::CustodianAggregation {
            custodians,
            instrument_aliases,
        } => Arc::new(CustodianAggregationAdapter::new(
            custodians.iter().cloned(),
            instrument_aliases.clone(),
        )),
        AdapterConfig::CashThreshold {
            threshold,
            fill_zero_metrics,
        } => Arc::new(CashThresholdAdapter::new(
            *threshold,
            fill_zero_metrics.iter().cloned(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Firms with no custom logic.
#[derive(Debug, Default)]
pub struct IdentityAdapter;

impl FirmAdapter for IdentityAdapter {
    fn name(&self) -> &str {
        "identity"
    }
}

// ---------------------------------------------------------------------------
// Pcr
// ---------------------------------------------------------------------------

/// Private-equity unit handling.
///
/// d1g1t tracks private-equity commitments rather than units, so the d1g1t
/// side is zeroed. Under `zero_d1g1t` a custodian still reporting units
/// surfaces as a break; `zero_both` zeroes the custodian side too; `ignore`
/// leaves values alone and waives unit breaks after comparison.
#[derive(Debug)]
pub struct PcrAdapter {
    policy: PrivateEquityPolicy,
}

impl PcrAdapter {
    pub fn new(policy: PrivateEquityPolicy) -> Self {
        Self { policy }
    }

    fn zero_private_equity_units(table: PositionTable) -> Result<PositionTable, HookError> {
        Ok(table.map_rows(|row| {
            if row.instrument_type == InstrumentType::PrivateEquity {
                row.set_metric(UNITS, Some(Decimal::ZERO));
            }
        }))
    }
}

impl FirmAdapter for PcrAdapter {
    fn name(&self) -> &str {
        "pcr"
    }

    fn apply_firm_specific_d1g1t_logic(
        &self,
        table: PositionTable,
    ) -> Result<PositionTable, HookError> {
        match self.policy {
            PrivateEquityPolicy::ZeroD1g1t | PrivateEquityPolicy::ZeroBoth => {
                Self::zero_private_equity_units(table)
            }
            PrivateEquityPolicy::Ignore => Ok(table),
        }
    }

    fn apply_firm_specific_custodian_logic(
        &self,
        _custodian_id: &str,
        table: PositionTable,
    ) -> Result<PositionTable, HookError> {
        match self.policy {
            PrivateEquityPolicy::ZeroBoth => Self::zero_private_equity_units(table),
            PrivateEquityPolicy::ZeroD1g1t | PrivateEquityPolicy::Ignore => Ok(table),
        }
    }

    fn apply_recon_post_processing_logic(
        &self,
        mut mismatched: Vec<ComparedRow>,
    ) -> Result<Vec<ComparedRow>, HookError> {
        if self.policy == PrivateEquityPolicy::Ignore {
            for row in mismatched
                .iter_mut()
                .filter(|r| r.instrument_type == InstrumentType::PrivateEquity)
            {
                row.waive(UNITS);
            }
            mismatched.retain(ComparedRow::has_breaks);
        }
        Ok(mismatched)
    }
}

// ---------------------------------------------------------------------------
// Instrument removal
// ---------------------------------------------------------------------------

/// Drops mismatches on instruments the firm reconciles elsewhere.
#[derive(Debug)]
pub struct InstrumentRemovalAdapter {
    instruments: BTreeSet<String>,
}

impl InstrumentRemovalAdapter {
    pub fn new(instruments: impl IntoIterator<Item = String>) -> Self {
        Self {
            instruments: instruments.into_iter().collect(),
        }
    }
}

impl FirmAdapter for InstrumentRemovalAdapter {
    fn name(&self) -> &str {
        "instrument_removal"
    }

    fn apply_recon_post_processing_logic(
        &self,
        mut mismatched: Vec<ComparedRow>,
    ) -> Result<Vec<ComparedRow>, HookError> {
        mismatched.retain(|r| !self.instruments.contains(&r.key.instrument_id));
        Ok(mismatched)
    }
}

// ---------------------------------------------------------------------------
// Metric waiver
// ---------------------------------------------------------------------------

/// Waives breaks on selected metrics for selected instruments.
#[derive(Debug)]
pub struct MetricWaiverAdapter {
    instruments: BTreeSet<String>,
    metrics: Vec<String>,
}

impl MetricWaiverAdapter {
    pub fn new(
        instruments: impl IntoIterator<Item = String>,
        metrics: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            instruments: instruments.into_iter().collect(),
            metrics: metrics.into_iter().collect(),
        }
    }
}

impl FirmAdapter for MetricWaiverAdapter {
    fn name(&self) -> &str {
        "metric_waiver"
    }

    fn apply_recon_post_processing_logic(
        &self,
        mut mismatched: Vec<ComparedRow>,
    ) -> Result<Vec<ComparedRow>, HookError> {
        for row in mismatched
            .iter_mut()
            .filter(|r| self.instruments.contains(&r.key.instrument_id))
        {
            for metric in &self.metrics {
                row.waive(metric);
            }
        }
        mismatched.retain(ComparedRow::has_breaks);
        Ok(mismatched)
    }
}

// ---------------------------------------------------------------------------
// Custodian aggregation
// ---------------------------------------------------------------------------

/// Custodians that report one row per lot: rename aliased instruments,
/// then collapse rows sharing a key. Quantities and values are summed;
/// per-unit figures such as price are not.
#[derive(Debug)]
pub struct CustodianAggregationAdapter {
    custodians: BTreeSet<String>,
    instrument_aliases: BTreeMap<String, String>,
}

impl CustodianAggregationAdapter {
    pub fn new(
        custodians: impl IntoIterator<Item = String>,
        instrument_aliases: BTreeMap<String, String>,
    ) -> Self {
        Self {
            custodians: custodians.into_iter().collect(),
            instrument_aliases,
        }
    }
}

impl FirmAdapter for CustodianAggregationAdapter {
    fn name(&self) -> &str {
        "custodian_aggregation"
    }

    fn apply_firm_specific_custodian_logic(
        &self,
        custodian_id: &str,
        table: PositionTable,
    ) -> Result<PositionTable, HookError> {
        if !self.custodians.contains(custodian_id) {
            return Ok(table);
        }

        let side = table.side();
        let columns = table.metric_columns().clone();
        let mut rows = table.into_rows();
        for row in &mut rows {
            if let Some(canonical) = self.instrument_aliases.get(&row.instrument_id) {
                row.instrument_id = canonical.clone();
            }
        }
        let before = rows.len();
        let rows = aggregate_positions(rows)?;
        log::debug!(
            "custodian '{custodian_id}': aggregated {before} rows into {}",
            rows.len()
        );
        Ok(PositionTable::new(side, columns, rows)?)
    }
}

// ---------------------------------------------------------------------------
// Cash threshold
// ---------------------------------------------------------------------------

/// Cleans d1g1t identifiers and forgives small cash differences.
#[derive(Debug)]
pub struct CashThresholdAdapter {
    threshold: Decimal,
    fill_zero_metrics: Vec<String>,
}

impl CashThresholdAdapter {
    pub fn new(threshold: Decimal, fill_zero_metrics: impl IntoIterator<Item = String>) -> Self {
        Self {
            threshold,
            fill_zero_metrics: fill_zero_metrics.into_iter().collect(),
        }
    }

    /// A cash balance missing on one side counts as zero.
    fn within_cash_threshold(&self, row: &ComparedRow) -> bool {
        row.instrument_type == InstrumentType::Cash
            && row.breaks().all(|b| {
                let d1g1t = b.d1g1t_value.unwrap_or(Decimal::ZERO);
                let custodian = b.custodian_value.unwrap_or(Decimal::ZERO);
                d1g1t
                    .checked_sub(custodian)
                    .is_some_and(|diff| diff.abs() <= self.threshold)
            })
    }
}

impl FirmAdapter for CashThresholdAdapter {
    fn name(&self) -> &str {
        "cash_threshold"
    }

    /// Trims client and instrument ids. Rows whose trimmed key repeats an
    /// earlier row are dropped; the first one wins.
    fn apply_firm_specific_d1g1t_logic(
        &self,
        table: PositionTable,
    ) -> Result<PositionTable, HookError> {
        let side = table.side();
        let mut columns = table.metric_columns().clone();
        columns.extend(self.fill_zero_metrics.iter().cloned());

        let mut seen = BTreeSet::new();
        let mut rows = Vec::with_capacity(table.len());
        for mut row in table.into_rows() {
            row.client_id = row.client_id.trim().to_string();
            row.instrument_id = row.instrument_id.trim().to_string();
            if !seen.insert(row.key()) {
                log::warn!("dropping duplicate d1g1t position {}", row.key());
                continue;
            }
            for metric in &self.fill_zero_metrics {
                if row.metric(metric).is_none() {
                    row.set_metric(metric, Some(Decimal::ZERO));
                }
            }
            rows.push(row);
        }
        Ok(PositionTable::new(side, columns, rows)?)
    }

    fn apply_recon_post_processing_logic(
        &self,
        mut mismatched: Vec<ComparedRow>,
    ) -> Result<Vec<ComparedRow>, HookError> {
        mismatched.retain(|r| !self.within_cash_threshold(r));
        Ok(mismatched)
    }
}
