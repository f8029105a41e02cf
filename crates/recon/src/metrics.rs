//! Metric resolution: which metrics a custodian is compared on, and how
//! tightly.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::config::{
    parse_threshold_settings, FirmConfig, FirmsConfig, ThresholdSetting, ToleranceKind,
};
use crate::error::ReconError;
use crate::model::{PositionTable, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerance {
    pub value: Decimal,
    pub kind: ToleranceKind,
}

impl Tolerance {
    pub fn absolute(value: Decimal) -> Self {
        Self {
            value,
            kind: ToleranceKind::Absolute,
        }
    }

    pub fn relative(value: Decimal) -> Self {
        Self {
            value,
            kind: ToleranceKind::Relative,
        }
    }

    /// `|d - c| <= t`, or `|d - c| / max(|c|, epsilon) <= t` when relative.
    /// A difference or ratio too large to represent is outside any tolerance.
    pub fn accepts(&self, d1g1t: Decimal, custodian: Decimal, epsilon: Decimal) -> bool {
        let Some(diff) = d1g1t.checked_sub(custodian).map(|d| d.abs()) else {
            return false;
        };
        match self.kind {
            ToleranceKind::Absolute => diff <= self.value,
            ToleranceKind::Relative => {
                let base = custodian.abs().max(epsilon);
                diff.checked_div(base).is_some_and(|ratio| ratio <= self.value)
            }
        }
    }
}

/// One metric to compare for a custodian.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRule {
    pub name: String,
    pub tolerance: Tolerance,
    pub required: bool,
}

/// Metrics that survived the column check, plus optional ones skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnCheck {
    pub compared: Vec<MetricRule>,
    pub skipped: Vec<String>,
}

/// Resolves metric rules for one firm's custodians.
#[derive(Debug)]
pub struct MetricValidator<'a> {
    config: &'a FirmsConfig,
    firm: &'a FirmConfig,
    overrides: BTreeMap<String, ThresholdSetting>,
}

impl<'a> MetricValidator<'a> {
    pub fn for_firm(config: &'a FirmsConfig, firm_id: &str) -> Result<Self, ReconError> {
        let firm = config
            .firm(firm_id)
            .ok_or_else(|| ReconError::FirmNotConfigured {
                firm_id: firm_id.to_string(),
            })?;
        let overrides = match &firm.threshold_settings {
            Some(settings) => parse_threshold_settings(settings)?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            config,
            firm,
            overrides,
        })
    }

    /// Denominator floor for relative comparisons.
    pub fn epsilon(&self) -> Decimal {
        self.config.defaults.relative_epsilon
    }

    /// Ordered metric rules for `custodian_id`: configured metrics first,
    /// then the firm's extra client metrics as optional.
    pub fn resolve_metrics(&self, custodian_id: &str) -> Result<Vec<MetricRule>, ReconError> {
        let custodian = self
            .config
            .custodian(custodian_id)
            .filter(|c| !c.metrics.is_empty())
            .ok_or_else(|| ReconError::CustodianMetric {
                custodian_id: custodian_id.to_string(),
                metric: None,
            })?;

        let defaults = &self.config.defaults;
        let mut rules: Vec<MetricRule> = custodian
            .metrics
            .iter()
            .map(|m| MetricRule {
                name: m.name.clone(),
                tolerance: self.tolerance_for(
                    &m.name,
                    Tolerance {
                        value: m.tolerance.unwrap_or(defaults.tolerance),
                        kind: m.tolerance_kind.unwrap_or(defaults.tolerance_kind),
                    },
                ),
                required: m.required,
            })
            .collect();

        for name in &self.firm.client_metrics {
            if rules.iter().any(|r| &r.name == name) {
                continue;
            }
            rules.push(MetricRule {
                name: name.clone(),
                tolerance: self.tolerance_for(
                    name,
                    Tolerance {
                        value: defaults.tolerance,
                        kind: defaults.tolerance_kind,
                    },
                ),
                required: false,
            });
        }

        for name in self.overrides.keys() {
            if !rules.iter().any(|r| &r.name == name) {
                log::debug!("threshold override for '{name}' matches no metric of '{custodian_id}'");
            }
        }

        Ok(rules)
    }

    fn tolerance_for(&self, metric: &str, configured: Tolerance) -> Tolerance {
        match self.overrides.get(metric) {
            Some(setting) => Tolerance {
                value: setting.threshold,
                kind: setting.kind,
            },
            None => configured,
        }
    }

    /// Check that every required metric is a column of both tables.
    /// Optional metrics absent from either side are skipped.
    pub fn check_columns(
        &self,
        custodian_id: &str,
        rules: Vec<MetricRule>,
        d1g1t: &PositionTable,
        custodian: &PositionTable,
    ) -> Result<ColumnCheck, ReconError> {
        let mut compared = Vec::with_capacity(rules.len());
        let mut skipped = Vec::new();

        for rule in rules {
            let missing_on = [(Side::D1g1t, d1g1t), (Side::Custodian, custodian)]
                .into_iter()
                .find(|(_, table)| !table.has_metric(&rule.name))
                .map(|(side, _)| side);

            match missing_on {
                None => compared.push(rule),
                Some(side) if rule.required => {
                    return Err(ReconError::MissingMetric {
                        custodian_id: custodian_id.to_string(),
                        metric: rule.name,
                        side,
                    });
                }
                Some(side) => {
                    log::warn!(
                        "custodian '{custodian_id}': optional metric '{}' not in {side} table, skipped",
                        rule.name
                    );
                    skipped.push(rule.name);
                }
            }
        }

        Ok(ColumnCheck { compared, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PRICE, UNITS};
    use rust_decimal_macros::dec;

    const CONFIG: &str = r#"
[defaults]
tolerance = 0.05

[custodians.nbin]
feed = "positions"

[[custodians.nbin.metrics]]
name = "units"
tolerance = 0

[[custodians.nbin.metrics]]
name = "price"
tolerance_kind = "relative"
required = false

[custodians.bmo]
feed = "holdings"

[firms.pcr]
custodians = ["nbin", "bmo"]
client_metrics = ["mv", "units"]

[firms.virgo]
custodians = ["nbin"]
threshold_settings = "units,relative,0.001"
"#;

    fn config() -> FirmsConfig {
        FirmsConfig::from_toml(CONFIG).unwrap()
    }

    fn columns(side: Side, names: &[&str]) -> PositionTable {
        PositionTable::new(side, names.iter().map(|n| n.to_string()), Vec::new()).unwrap()
    }

    #[test]
    fn absolute_tolerance() {
        let eps = dec!(0.000000001);
        assert!(Tolerance::absolute(dec!(1)).accepts(dec!(100), dec!(100.5), eps));
        assert!(!Tolerance::absolute(dec!(0.1)).accepts(dec!(100), dec!(100.5), eps));
        assert!(Tolerance::absolute(dec!(0.5)).accepts(dec!(100), dec!(100.5), eps));
        assert!(Tolerance::absolute(dec!(0)).accepts(dec!(10), dec!(10.0), eps));
        assert!(!Tolerance::absolute(dec!(0)).accepts(dec!(10), dec!(10.0001), eps));
    }

    #[test]
    fn overflowing_difference_is_rejected() {
        let eps = dec!(0.000000001);
        let huge = dec!(70000000000000000000000000000);
        assert!(!Tolerance::absolute(Decimal::MAX).accepts(huge, -huge, eps));
        assert!(!Tolerance::relative(Decimal::MAX).accepts(huge, -huge, eps));
    }

    #[test]
    fn relative_tolerance() {
        let eps = dec!(0.000000001);
        assert!(Tolerance::relative(dec!(0.01)).accepts(dec!(101), dec!(100), eps));
        assert!(!Tolerance::relative(dec!(0.01)).accepts(dec!(102), dec!(100), eps));
        assert!(Tolerance::relative(dec!(0.01)).accepts(dec!(-101), dec!(-100), eps));
        // custodian zero: ratio against epsilon
        assert!(!Tolerance::relative(dec!(0.01)).accepts(dec!(0.001), dec!(0), eps));
        assert!(Tolerance::relative(dec!(0.01)).accepts(dec!(0), dec!(0), eps));
        // ratio overflows Decimal
        let big = dec!(10000000000000000000000000);
        assert!(!Tolerance::relative(dec!(1)).accepts(big, dec!(0), eps));
    }

    #[test]
    fn resolve_applies_defaults_and_client_metrics() {
        let config = config();
        let validator = MetricValidator::for_firm(&config, "pcr").unwrap();
        let rules = validator.resolve_metrics("nbin").unwrap();
        let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, [UNITS, PRICE, "mv"]);

        assert_eq!(rules[0].tolerance, Tolerance::absolute(dec!(0)));
        assert!(rules[0].required);
        assert_eq!(rules[1].tolerance, Tolerance::relative(dec!(0.05)));
        assert!(!rules[1].required);
        assert_eq!(rules[2].tolerance, Tolerance::absolute(dec!(0.05)));
        assert!(!rules[2].required);
    }

    #[test]
    fn threshold_settings_override() {
        let config = config();
        let validator = MetricValidator::for_firm(&config, "virgo").unwrap();
        let rules = validator.resolve_metrics("nbin").unwrap();
        assert_eq!(rules[0].tolerance, Tolerance::relative(dec!(0.001)));
        assert_eq!(rules[1].tolerance, Tolerance::relative(dec!(0.05)));
    }

    #[test]
    fn unconfigured_custodian_metrics() {
        let config = config();
        let validator = MetricValidator::for_firm(&config, "pcr").unwrap();
        for custodian in ["bmo", "td"] {
            match validator.resolve_metrics(custodian) {
                Err(ReconError::CustodianMetric { custodian_id, metric }) => {
                    assert_eq!(custodian_id, custodian);
                    assert_eq!(metric, None);
                }
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn missing_required_column() {
        let config = config();
        let validator = MetricValidator::for_firm(&config, "pcr").unwrap();
        let rules = validator.resolve_metrics("nbin").unwrap();
        let err = validator
            .check_columns(
                "nbin",
                rules,
                &columns(Side::D1g1t, &[UNITS, PRICE]),
                &columns(Side::Custodian, &[PRICE]),
            )
            .unwrap_err();
        match err {
            ReconError::MissingMetric {
                custodian_id,
                metric,
                side,
            } => {
                assert_eq!(custodian_id, "nbin");
                assert_eq!(metric, UNITS);
                assert_eq!(side, Side::Custodian);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn optional_columns_skipped() {
        let config = config();
        let validator = MetricValidator::for_firm(&config, "pcr").unwrap();
        let rules = validator.resolve_metrics("nbin").unwrap();
        let check = validator
            .check_columns(
                "nbin",
                rules,
                &columns(Side::D1g1t, &[UNITS, PRICE, "mv"]),
                &columns(Side::Custodian, &[UNITS, "mv"]),
            )
            .unwrap();
        let compared: Vec<_> = check.compared.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(compared, [UNITS, "mv"]);
        assert_eq!(check.skipped, [PRICE]);
    }
}
