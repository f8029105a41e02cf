use std::collections::BTreeMap;

use crate::model::{PositionKey, PositionRow};

/// Full outer join of two position sets on [`PositionKey`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Alignment {
    /// `(d1g1t, custodian)` pairs, in key order.
    pub paired: Vec<(PositionRow, PositionRow)>,
    pub d1g1t_only: Vec<PositionRow>,
    pub custodian_only: Vec<PositionRow>,
}

/// Align by exact key. Both inputs must already be unique by key, which
/// [`PositionTable`](crate::model::PositionTable) guarantees.
pub fn align(d1g1t: &[PositionRow], custodian: &[PositionRow]) -> Alignment {
    let d1g1t_map: BTreeMap<PositionKey, &PositionRow> =
        d1g1t.iter().map(|r| (r.key(), r)).collect();
    let custodian_map: BTreeMap<PositionKey, &PositionRow> =
        custodian.iter().map(|r| (r.key(), r)).collect();

    let mut paired = Vec::new();
    let mut d1g1t_only = Vec::new();
    let mut custodian_only = Vec::new();

    for (key, left) in &d1g1t_map {
        match custodian_map.get(key) {
            Some(right) => paired.push(((*left).clone(), (*right).clone())),
            None => d1g1t_only.push((*left).clone()),
        }
    }

    for (key, right) in &custodian_map {
        if !d1g1t_map.contains_key(key) {
            custodian_only.push((*right).clone());
        }
    }

    Alignment {
        paired,
        d1g1t_only,
        custodian_only,
    }
}
