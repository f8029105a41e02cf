use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::adapter::{FirmAdapter, HookError};
use crate::classify::{compare_row, is_dead_position};
use crate::config::FirmsConfig;
use crate::error::{Hook, ReconError, RunContext, RunError};
use crate::evidence::break_summary;
use crate::loader::{CustodianFeedLoader, D1g1tSource, FeedSource};
use crate::matcher::align;
use crate::metrics::{MetricRule, MetricValidator};
use crate::model::{
    ComparedRow, PositionKey, PositionRow, PositionTable, ReconMeta, ReconResult, ReconSummary,
    Side,
};
use crate::registry::FirmRegistry;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parameters of one reconciliation run, as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub firm_id: String,
    pub client_id: String,
    pub as_of_date: NaiveDate,
    pub custodian_ids: Vec<String>,
}

impl RunRequest {
    /// Build a request from untyped input; a malformed date is an input error.
    pub fn parse(
        firm_id: &str,
        client_id: &str,
        as_of_date: &str,
        custodian_ids: Vec<String>,
    ) -> Result<Self, ReconError> {
        let date = NaiveDate::parse_from_str(as_of_date.trim(), DATE_FORMAT).map_err(|_| {
            ReconError::input(format!("as_of_date '{as_of_date}' is not a YYYY-MM-DD date"))
        })?;
        Ok(Self {
            firm_id: firm_id.to_string(),
            client_id: client_id.to_string(),
            as_of_date: date,
            custodian_ids,
        })
    }
}

/// One custodian's transformed table and the metrics it is compared on.
struct CustodianBatch {
    custodian_id: String,
    table: PositionTable,
    rules: Vec<MetricRule>,
    note: Option<String>,
}

/// Runs reconciliations against shared, read-only configuration.
///
/// Holds no per-run state: concurrent `reconcile` calls are independent.
pub struct ReconEngine {
    config: Arc<FirmsConfig>,
    registry: Arc<FirmRegistry>,
    d1g1t: Arc<dyn D1g1tSource>,
    loader: CustodianFeedLoader,
}

impl ReconEngine {
    pub fn new(
        config: Arc<FirmsConfig>,
        registry: Arc<FirmRegistry>,
        d1g1t: Arc<dyn D1g1tSource>,
        feeds: Arc<dyn FeedSource>,
    ) -> Self {
        let loader = CustodianFeedLoader::new(Arc::clone(&config), feeds);
        Self {
            config,
            registry,
            d1g1t,
            loader,
        }
    }

    /// Engine whose registry is built from `config`.
    pub fn from_config(
        config: FirmsConfig,
        d1g1t: Arc<dyn D1g1tSource>,
        feeds: Arc<dyn FeedSource>,
    ) -> Self {
        let registry = Arc::new(FirmRegistry::from_config(&config));
        Self::new(Arc::new(config), registry, d1g1t, feeds)
    }

    pub fn run(&self, request: &RunRequest) -> Result<ReconResult, RunError> {
        self.reconcile(
            &request.firm_id,
            &request.client_id,
            request.as_of_date,
            &request.custodian_ids,
        )
    }

    /// Reconcile a client's d1g1t positions against the given custodians.
    ///
    /// All-or-nothing: any failure aborts the run and no partial result is
    /// returned.
    pub fn reconcile(
        &self,
        firm_id: &str,
        client_id: &str,
        as_of_date: NaiveDate,
        custodian_ids: &[String],
    ) -> Result<ReconResult, RunError> {
        let ctx = RunContext::new(firm_id, client_id, as_of_date);
        let at = |ctx: &RunContext| {
            let ctx = ctx.clone();
            move |error: ReconError| RunError::new(ctx, error)
        };

        validate_inputs(client_id, custodian_ids).map_err(at(&ctx))?;
        log::info!(
            "reconciling firm '{firm_id}' client '{client_id}' as of {as_of_date} against {}",
            custodian_ids.join(", ")
        );

        let adapter = self.registry.resolve(firm_id).map_err(at(&ctx))?;
        let validator = MetricValidator::for_firm(&self.config, firm_id).map_err(at(&ctx))?;

        let d1g1t = self
            .d1g1t
            .load(firm_id, client_id, as_of_date)
            .map_err(at(&ctx))?;
        if d1g1t.is_empty() {
            return Err(at(&ctx)(ReconError::ClientDataNotFound {
                client_id: client_id.to_string(),
                as_of_date,
            }));
        }
        log::debug!("loaded {} d1g1t positions", d1g1t.len());

        let d1g1t = adapter
            .apply_firm_specific_d1g1t_logic(d1g1t)
            .map_err(|source| ReconError::FirmSpecificLogic {
                firm_id: firm_id.to_string(),
                hook: Hook::D1g1t,
                custodian_id: None,
                source,
            })
            .map_err(at(&ctx))?
            .check_unique()
            .map_err(at(&ctx))?;

        let mut batches = Vec::with_capacity(custodian_ids.len());
        for custodian_id in custodian_ids {
            let ctx = ctx.for_custodian(custodian_id);
            let batch = self
                .load_custodian(
                    adapter.as_ref(),
                    &validator,
                    firm_id,
                    custodian_id,
                    client_id,
                    as_of_date,
                    &d1g1t,
                )
                .map_err(at(&ctx))?;
            batches.push(batch);
        }

        let meta = ReconMeta {
            firm_id: firm_id.to_string(),
            client_id: client_id.to_string(),
            as_of_date,
            custodians: custodian_ids.to_vec(),
            adapter: adapter.name().to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let result = self
            .compare(meta, adapter.as_ref(), d1g1t, &batches, validator.epsilon())
            .map_err(at(&ctx))?;

        log::info!(
            "firm '{firm_id}' client '{client_id}': {} matched, {} mismatched, \
             {} d1g1t-only, {} custodian-only, {} suppressed",
            result.summary.matched,
            result.summary.mismatched,
            result.summary.unmatched_d1g1t,
            result.summary.unmatched_custodian,
            result.summary.suppressed,
        );
        Ok(result)
    }

    /// Load, transform and check one custodian.
    #[allow(clippy::too_many_arguments)]
    fn load_custodian(
        &self,
        adapter: &dyn FirmAdapter,
        validator: &MetricValidator<'_>,
        firm_id: &str,
        custodian_id: &str,
        client_id: &str,
        as_of_date: NaiveDate,
        d1g1t: &PositionTable,
    ) -> Result<CustodianBatch, ReconError> {
        let table = self.loader.load(firm_id, custodian_id, client_id, as_of_date)?;
        log::debug!("custodian '{custodian_id}': loaded {} positions", table.len());

        let logic_error = |source: HookError| ReconError::FirmSpecificLogic {
            firm_id: firm_id.to_string(),
            hook: Hook::Custodian,
            custodian_id: Some(custodian_id.to_string()),
            source,
        };
        let table = adapter
            .apply_firm_specific_custodian_logic(custodian_id, table)
            .map_err(logic_error)?;
        // Lots the hook left sharing a key are a data error from here on.
        let table = table
            .map_rows(|row| row.custodian_id = custodian_id.to_string())
            .check_unique()?;

        let rules = validator.resolve_metrics(custodian_id)?;
        let check = validator.check_columns(custodian_id, rules, d1g1t, &table)?;
        let note = (!check.skipped.is_empty())
            .then(|| format!("not compared, column missing: {}", check.skipped.join(", ")));

        Ok(CustodianBatch {
            custodian_id: custodian_id.to_string(),
            table,
            rules: check.compared,
            note,
        })
    }

    /// Align, compare and post-process every custodian in one pass.
    fn compare(
        &self,
        meta: ReconMeta,
        adapter: &dyn FirmAdapter,
        d1g1t: PositionTable,
        batches: &[CustodianBatch],
        epsilon: Decimal,
    ) -> Result<ReconResult, ReconError> {
        let in_run: HashSet<&str> = batches.iter().map(|b| b.custodian_id.as_str()).collect();
        let by_custodian: HashMap<&str, &CustodianBatch> =
            batches.iter().map(|b| (b.custodian_id.as_str(), b)).collect();

        let custodian_rows: Vec<PositionRow> = batches
            .iter()
            .flat_map(|b| b.table.rows().iter().cloned())
            .collect();
        let columns = batches
            .iter()
            .flat_map(|b| b.table.metric_columns().iter().cloned());
        let combined = PositionTable::new(Side::Custodian, columns, custodian_rows)?;

        let before = d1g1t.len();
        let d1g1t = d1g1t.retain(|row| {
            row.custodian_id.is_empty() || in_run.contains(row.custodian_id.as_str())
        });
        if d1g1t.len() < before {
            log::debug!(
                "{} d1g1t positions belong to custodians outside this run",
                before - d1g1t.len()
            );
        }

        let alignment = align(d1g1t.rows(), combined.rows());

        let mut matched = Vec::new();
        let mut mismatched = Vec::new();
        let mut dead_positions = 0;
        for (left, right) in &alignment.paired {
            let Some(batch) = by_custodian.get(right.custodian_id.as_str()) else {
                continue;
            };
            let mut row = compare_row(left, right, &batch.rules, epsilon);
            if is_dead_position(&row) {
                dead_positions += 1;
                continue;
            }
            row.note = batch.note.clone();
            if row.has_breaks() {
                mismatched.push(row);
            } else {
                matched.push(row);
            }
        }

        let before = mismatched.len();
        let allowed: BTreeSet<(PositionKey, String)> = mismatched
            .iter()
            .map(|r| (r.key.clone(), r.custodian_id.clone()))
            .collect();
        let mut mismatched = adapter
            .apply_recon_post_processing_logic(mismatched)
            .map_err(|source| ReconError::FirmSpecificLogic {
                firm_id: meta.firm_id.clone(),
                hook: Hook::PostProcessing,
                custodian_id: None,
                source,
            })?;
        check_post_processing(&meta.firm_id, &allowed, &mismatched)?;
        let suppressed = before - mismatched.len();
        if suppressed > 0 {
            log::debug!("post-processing suppressed {suppressed} mismatches");
        }

        let by_key = |a: &ComparedRow, b: &ComparedRow| {
            (&a.key, &a.custodian_id).cmp(&(&b.key, &b.custodian_id))
        };
        matched.sort_by(by_key);
        mismatched.sort_by(by_key);

        let summary = ReconSummary {
            matched: matched.len(),
            mismatched: mismatched.len(),
            unmatched_d1g1t: alignment.d1g1t_only.len(),
            unmatched_custodian: alignment.custodian_only.len(),
            suppressed,
            dead_positions,
            breaks: break_summary(&meta.custodians, &matched, &mismatched),
        };

        Ok(ReconResult {
            meta,
            summary,
            matched,
            mismatched,
            unmatched_d1g1t: alignment.d1g1t_only,
            unmatched_custodian: alignment.custodian_only,
        })
    }
}

fn validate_inputs(client_id: &str, custodian_ids: &[String]) -> Result<(), ReconError> {
    if client_id.trim().is_empty() {
        return Err(ReconError::input("client_id must not be empty"));
    }
    if custodian_ids.is_empty() {
        return Err(ReconError::input("custodian list must not be empty"));
    }
    let mut seen = HashSet::new();
    for custodian_id in custodian_ids {
        if custodian_id.trim().is_empty() {
            return Err(ReconError::input("custodian id must not be empty"));
        }
        if !seen.insert(custodian_id.as_str()) {
            return Err(ReconError::input(format!(
                "custodian '{custodian_id}' listed more than once"
            )));
        }
    }
    Ok(())
}

/// Post-processing may only drop or annotate mismatches.
fn check_post_processing(
    firm_id: &str,
    allowed: &BTreeSet<(PositionKey, String)>,
    rows: &[ComparedRow],
) -> Result<(), ReconError> {
    let mut seen = BTreeSet::new();
    for row in rows {
        let id = (row.key.clone(), row.custodian_id.clone());
        let reason = if !allowed.contains(&id) {
            "introduced"
        } else if !seen.insert(id) {
            "duplicated"
        } else {
            continue;
        };
        return Err(ReconError::FirmSpecificLogic {
            firm_id: firm_id.to_string(),
            hook: Hook::PostProcessing,
            custodian_id: Some(row.custodian_id.clone()),
            source: format!("post-processing {reason} position {}", row.key).into(),
        });
    }
    Ok(())
}
