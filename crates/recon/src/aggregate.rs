use std::collections::BTreeMap;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::model::{PositionKey, PositionRow, ACB, UNITS};

/// Metrics that add up across lots. Everything else (price, rates) is a
/// per-unit figure and is taken from the first lot that reports it.
pub const ADDITIVE_METRICS: &[&str] = &[UNITS, ACB, "mv", "market_value", "book_value"];

#[derive(Debug, Error, PartialEq)]
#[error("sum of '{metric}' overflows for position {key}")]
pub struct AggregateError {
    pub key: PositionKey,
    pub metric: String,
}

pub fn is_additive(metric: &str) -> bool {
    ADDITIVE_METRICS.contains(&metric)
}

/// Collapse rows sharing a position key into one.
///
/// Additive metrics are summed; a metric that is null on every row of the
/// group stays null. Per-unit metrics keep the first non-null value, and a
/// lot that disagrees is logged. Identity fields come from the first row.
pub fn aggregate_positions(rows: Vec<PositionRow>) -> Result<Vec<PositionRow>, AggregateError> {
    let mut groups: BTreeMap<PositionKey, PositionRow> = BTreeMap::new();

    for row in rows {
        let key = row.key();
        match groups.get_mut(&key) {
            Some(acc) => merge_lot(&key, acc, row.metrics)?,
            None => {
                groups.insert(key, row);
            }
        }
    }

    Ok(groups.into_values().collect())
}

fn merge_lot(
    key: &PositionKey,
    acc: &mut PositionRow,
    metrics: BTreeMap<String, Option<Decimal>>,
) -> Result<(), AggregateError> {
    for (name, value) in metrics {
        let slot = acc.metrics.entry(name.clone()).or_insert(None);
        if is_additive(&name) {
            *slot = sum(*slot, value).ok_or_else(|| AggregateError {
                key: key.clone(),
                metric: name.clone(),
            })?;
            continue;
        }
        match (*slot, value) {
            (None, v) => *slot = v,
            (Some(kept), Some(other)) if kept != other => {
                log::warn!(
                    "{key}: lots disagree on '{name}' ({kept} vs {other}); keeping {kept}"
                );
            }
            _ => {}
        }
    }
    Ok(())
}

/// `None` on overflow; `Some(None)` when both sides are null.
fn sum(a: Option<Decimal>, b: Option<Decimal>) -> Option<Option<Decimal>> {
    match (a, b) {
        (Some(a), Some(b)) => a.checked_add(b).map(Some),
        (a, None) => Some(a),
        (None, b) => Some(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstrumentType, PRICE};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn row(instrument: &str, units: Option<Decimal>, price: Option<Decimal>) -> PositionRow {
        PositionRow {
            client_id: "C1".into(),
            firm_id: "claret".into(),
            custodian_id: "nbin".into(),
            instrument_id: instrument.into(),
            instrument_type: InstrumentType::Equity,
            as_of_date: NaiveDate::from_ymd_opt(2024, 3, 28).unwrap(),
            metrics: BTreeMap::from([(UNITS.to_string(), units), (PRICE.to_string(), price)]),
        }
    }

    #[test]
    fn units_summed_price_kept() {
        let rows = vec![
            row("AAPL", Some(dec!(60)), Some(dec!(171.48))),
            row("MSFT", Some(dec!(5)), None),
            row("AAPL", Some(dec!(40)), Some(dec!(171.48))),
        ];
        let out = aggregate_positions(rows).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].instrument_id, "AAPL");
        assert_eq!(out[0].metric(UNITS), Some(dec!(100)));
        assert_eq!(out[0].metric(PRICE), Some(dec!(171.48)));
        assert_eq!(out[1].metric(UNITS), Some(dec!(5)));
    }

    #[test]
    fn price_taken_from_first_reporting_lot() {
        let rows = vec![
            row("AAPL", Some(dec!(1)), None),
            row("AAPL", Some(dec!(2)), Some(dec!(10))),
            row("AAPL", Some(dec!(3)), Some(dec!(11))),
        ];
        let out = aggregate_positions(rows).unwrap();
        assert_eq!(out[0].metric(UNITS), Some(dec!(6)));
        assert_eq!(out[0].metric(PRICE), Some(dec!(10)));
    }

    #[test]
    fn nulls_only_stay_null() {
        let rows = vec![row("AAPL", Some(dec!(1)), None), row("AAPL", None, None)];
        let out = aggregate_positions(rows).unwrap();
        assert_eq!(out[0].metric(UNITS), Some(dec!(1)));
        assert_eq!(out[0].metric(PRICE), None);
    }

    #[test]
    fn overflow_is_an_error() {
        let rows = vec![row("AAPL", Some(Decimal::MAX), None), row("AAPL", Some(dec!(1)), None)];
        let err = aggregate_positions(rows).unwrap_err();
        assert_eq!(err.metric, UNITS);
        assert_eq!(err.key.instrument_id, "AAPL");
    }
}
