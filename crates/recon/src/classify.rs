use rust_decimal::Decimal;

use crate::metrics::MetricRule;
use crate::model::{ComparedRow, InstrumentType, MetricDelta, PositionRow, ACB, PRICE, UNITS};

/// Custodian unit counts below this are treated as a closed position.
const DEAD_UNITS: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

/// Compare one metric. Both-null is within tolerance, null against a value
/// never is. A difference too large to represent is reported without a
/// delta and outside tolerance.
pub fn compare_metric(
    rule: &MetricRule,
    d1g1t_value: Option<Decimal>,
    custodian_value: Option<Decimal>,
    epsilon: Decimal,
) -> MetricDelta {
    let (delta, difference, within_tolerance) = match (d1g1t_value, custodian_value) {
        (Some(d), Some(c)) => match d.checked_sub(c) {
            Some(diff) => (
                Some(diff.abs()),
                Some(diff),
                rule.tolerance.accepts(d, c, epsilon),
            ),
            None => (None, None, false),
        },
        (None, None) => (None, None, true),
        _ => (None, None, false),
    };
    MetricDelta {
        metric: rule.name.clone(),
        d1g1t_value,
        custodian_value,
        delta,
        difference,
        tolerance: rule.tolerance.value,
        tolerance_kind: rule.tolerance.kind,
        within_tolerance,
        waived: false,
    }
}

/// Compare an aligned pair on every rule.
///
/// Cash rows skip `price` and `acb`. When the custodian holds no units the
/// price break is waived, since a closed position carries no price.
pub fn compare_row(
    d1g1t: &PositionRow,
    custodian: &PositionRow,
    rules: &[MetricRule],
    epsilon: Decimal,
) -> ComparedRow {
    let is_cash = d1g1t.instrument_type == InstrumentType::Cash;
    let comparisons = rules
        .iter()
        .filter(|r| !(is_cash && (r.name == PRICE || r.name == ACB)))
        .map(|r| compare_metric(r, d1g1t.metric(&r.name), custodian.metric(&r.name), epsilon))
        .collect();

    let mut row = ComparedRow {
        key: d1g1t.key(),
        custodian_id: custodian.custodian_id.clone(),
        instrument_type: d1g1t.instrument_type,
        comparisons,
        note: None,
    };

    if row.comparison(UNITS).is_some() && row.comparison(PRICE).is_some() {
        let closed = custodian
            .metric(UNITS)
            .map_or(true, |units| units.abs() < DEAD_UNITS);
        if closed {
            row.waive(PRICE);
        }
    }

    row
}

/// Units compared and null on both sides, with nothing else breaking.
pub fn is_dead_position(row: &ComparedRow) -> bool {
    row.comparison(UNITS)
        .is_some_and(|c| c.d1g1t_value.is_none() && c.custodian_value.is_none())
        && !row.has_breaks()
}
