use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::model::{BreakSummary, ComparedRow};

/// Custodian label of the cross-custodian rows.
pub const TOTAL: &str = "Total";

/// Per-custodian, per-metric break counts over every compared row.
///
/// Custodians keep the run's order; metrics within a custodian are sorted.
/// A [`TOTAL`] row per metric follows when more than one custodian ran.
pub fn break_summary(
    custodians: &[String],
    matched: &[ComparedRow],
    mismatched: &[ComparedRow],
) -> Vec<BreakSummary> {
    // custodian -> metric -> (breaks, total)
    let mut counts: BTreeMap<&str, BTreeMap<&str, (usize, usize)>> = BTreeMap::new();
    let mut totals: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

    for row in matched.iter().chain(mismatched) {
        for c in &row.comparisons {
            let broke = usize::from(c.is_break());
            let entry = counts
                .entry(row.custodian_id.as_str())
                .or_default()
                .entry(c.metric.as_str())
                .or_default();
            entry.0 += broke;
            entry.1 += 1;
            let total = totals.entry(c.metric.as_str()).or_default();
            total.0 += broke;
            total.1 += 1;
        }
    }

    let mut out = Vec::new();
    for custodian in custodians {
        let Some(metrics) = counts.get(custodian.as_str()) else {
            continue;
        };
        for (metric, (breaks, total)) in metrics {
            out.push(row(custodian, metric, *breaks, *total));
        }
    }
    if custodians.len() > 1 {
        for (metric, (breaks, total)) in &totals {
            out.push(row(TOTAL, metric, *breaks, *total));
        }
    }
    out
}

fn row(custodian_id: &str, metric: &str, breaks: usize, total: usize) -> BreakSummary {
    BreakSummary {
        custodian_id: custodian_id.to_string(),
        metric: metric.to_string(),
        breaks,
        total,
        reconciled_pct: reconciled_pct(breaks, total),
    }
}

fn reconciled_pct(breaks: usize, total: usize) -> Decimal {
    if total == 0 {
        return Decimal::ONE_HUNDRED;
    }
    let clean = Decimal::from(total - breaks);
    (clean * Decimal::ONE_HUNDRED / Decimal::from(total)).round_dp(4)
}
