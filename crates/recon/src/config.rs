use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Firm and custodian setup. Loaded once at startup and never mutated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirmsConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub custodians: BTreeMap<String, CustodianConfig>,
    #[serde(default)]
    pub firms: BTreeMap<String, FirmConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,
    #[serde(default)]
    pub tolerance_kind: ToleranceKind,
    /// Floor for the denominator of relative comparisons.
    #[serde(default = "default_epsilon")]
    pub relative_epsilon: Decimal,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            tolerance_kind: ToleranceKind::Absolute,
            relative_epsilon: default_epsilon(),
        }
    }
}

fn default_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

fn default_epsilon() -> Decimal {
    Decimal::new(1, 9)
}

// ---------------------------------------------------------------------------
// Custodians + metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustodianConfig {
    /// Feed name, or a full `custodian|feed|region` descriptor.
    #[serde(default)]
    pub feed: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    pub name: String,
    #[serde(default)]
    pub tolerance: Option<Decimal>,
    #[serde(default)]
    pub tolerance_kind: Option<ToleranceKind>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceKind {
    #[default]
    Absolute,
    Relative,
}

impl FromStr for ToleranceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "absolute" => Ok(Self::Absolute),
            "relative" => Ok(Self::Relative),
            other => Err(format!("unknown tolerance kind '{other}'")),
        }
    }
}

impl std::fmt::Display for ToleranceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absolute => write!(f, "absolute"),
            Self::Relative => write!(f, "relative"),
        }
    }
}

/// Where a custodian's positions come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDescriptor {
    pub custodian: String,
    pub feed: String,
    pub region: Option<String>,
}

impl FeedDescriptor {
    /// Parse `custodian|feed|region`. Whitespace around parts is ignored.
    pub fn parse(value: &str) -> Result<Self, ReconError> {
        let parts: Vec<&str> = value.split('|').map(str::trim).collect();
        match parts.as_slice() {
            [custodian, feed, region] if !custodian.is_empty() && !feed.is_empty() => Ok(Self {
                custodian: custodian.to_string(),
                feed: feed.to_string(),
                region: (!region.is_empty()).then(|| region.to_string()),
            }),
            _ => Err(ReconError::config(format!(
                "feed descriptor '{value}' must be of the form custodian|feed|region"
            ))),
        }
    }
}

impl CustodianConfig {
    /// Resolve this custodian's feed. `None` when no feed is set up.
    pub fn feed_descriptor(&self, custodian_id: &str) -> Result<Option<FeedDescriptor>, ReconError> {
        let Some(feed) = self.feed.as_deref() else {
            return Ok(None);
        };
        if feed.contains('|') {
            let descriptor = FeedDescriptor::parse(feed)?;
            if descriptor.custodian != custodian_id {
                return Err(ReconError::config(format!(
                    "custodian '{custodian_id}': feed descriptor names custodian '{}'",
                    descriptor.custodian
                )));
            }
            return Ok(Some(descriptor));
        }
        Ok(Some(FeedDescriptor {
            custodian: custodian_id.to_string(),
            feed: feed.to_string(),
            region: self.region.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Firms + adapters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirmConfig {
    pub custodians: Vec<String>,
    #[serde(default)]
    pub adapter: AdapterConfig,
    /// Extra optional metrics compared for every custodian of this firm.
    #[serde(default)]
    pub client_metrics: Vec<String>,
    /// Per-metric overrides: `metric,kind,threshold|metric,kind,threshold`.
    #[serde(default)]
    pub threshold_settings: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterConfig {
    #[default]
    Identity,
    Pcr {
        #[serde(default)]
        private_equity: PrivateEquityPolicy,
    },
    InstrumentRemoval {
        instruments: Vec<String>,
    },
    MetricWaiver {
        instruments: Vec<String>,
        metrics: Vec<String>,
    },
    CustodianAggregation {
        custodians: Vec<String>,
        #[serde(default)]
        instrument_aliases: BTreeMap<String, String>,
    },
    CashThreshold {
        threshold: Decimal,
        #[serde(default)]
        fill_zero_metrics: Vec<String>,
    },
}

impl AdapterConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Pcr { .. } => "pcr",
            Self::InstrumentRemoval { .. } => "instrument_removal",
            Self::MetricWaiver { .. } => "metric_waiver",
            Self::CustodianAggregation { .. } => "custodian_aggregation",
            Self::CashThreshold { .. } => "cash_threshold",
        }
    }
}

/// How private-equity unit counts are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivateEquityPolicy {
    /// Force d1g1t units to zero; custodian units stay, so non-zero
    /// custodian holdings surface as breaks.
    #[default]
    ZeroD1g1t,
    /// Force units to zero on both sides.
    ZeroBoth,
    /// Leave values alone and forgive unit breaks after comparison.
    Ignore,
}

/// One entry of a firm's threshold override string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdSetting {
    pub kind: ToleranceKind,
    pub threshold: Decimal,
}

/// Parse `metric,kind,threshold|...`. An empty string means no overrides.
pub fn parse_threshold_settings(
    settings: &str,
) -> Result<BTreeMap<String, ThresholdSetting>, ReconError> {
    let mut out = BTreeMap::new();
    if settings.trim().is_empty() {
        return Ok(out);
    }
    for entry in settings.split('|') {
        let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
        let [metric, kind, threshold] = parts.as_slice() else {
            return Err(threshold_format_error(entry));
        };
        let kind: ToleranceKind = kind.parse().map_err(|_| threshold_format_error(entry))?;
        let threshold = Decimal::from_str(threshold)
            .or_else(|_| Decimal::from_scientific(threshold))
            .map_err(|_| threshold_format_error(entry))?;
        if metric.is_empty() || threshold.is_sign_negative() {
            return Err(threshold_format_error(entry));
        }
        out.insert(metric.to_string(), ThresholdSetting { kind, threshold });
    }
    Ok(out)
}

fn threshold_format_error(entry: &str) -> ReconError {
    ReconError::config(format!(
        "threshold setting '{}' is incorrect; expected metric,threshold_type,threshold|...",
        entry.trim()
    ))
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl FirmsConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: FirmsConfig =
            toml::from_str(input).map_err(|e| ReconError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ReconError> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| ReconError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&input)
    }

    pub fn firm(&self, firm_id: &str) -> Option<&FirmConfig> {
        self.firms.get(firm_id)
    }

    pub fn custodian(&self, custodian_id: &str) -> Option<&CustodianConfig> {
        self.custodians.get(custodian_id)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.defaults.tolerance.is_sign_negative() {
            return Err(ReconError::config("defaults.tolerance must not be negative"));
        }
        if self.defaults.relative_epsilon <= Decimal::ZERO {
            return Err(ReconError::config("defaults.relative_epsilon must be positive"));
        }

        for (custodian_id, custodian) in &self.custodians {
            custodian.feed_descriptor(custodian_id)?;

            let mut names = BTreeSet::new();
            for metric in &custodian.metrics {
                if metric.name.trim().is_empty() {
                    return Err(ReconError::config(format!(
                        "custodian '{custodian_id}': metric name must not be empty"
                    )));
                }
                if !names.insert(metric.name.as_str()) {
                    return Err(ReconError::config(format!(
                        "custodian '{custodian_id}': metric '{}' configured twice",
                        metric.name
                    )));
                }
                if metric.tolerance.is_some_and(|t| t.is_sign_negative()) {
                    return Err(ReconError::config(format!(
                        "custodian '{custodian_id}': metric '{}' has a negative tolerance",
                        metric.name
                    )));
                }
            }
        }

        for (firm_id, firm) in &self.firms {
            if firm.custodians.is_empty() {
                return Err(ReconError::config(format!("firm '{firm_id}': no custodians listed")));
            }
            for custodian_id in &firm.custodians {
                if !self.custodians.contains_key(custodian_id) {
                    return Err(ReconError::config(format!(
                        "firm '{firm_id}': custodian '{custodian_id}' is not configured"
                    )));
                }
            }
            if let Some(settings) = &firm.threshold_settings {
                parse_threshold_settings(settings)?;
            }
            validate_adapter(firm_id, &firm.adapter)?;
        }

        Ok(())
    }
}

fn validate_adapter(firm_id: &str, adapter: &AdapterConfig) -> Result<(), ReconError> {
    let fail = |msg: &str| ReconError::config(format!("firm '{firm_id}' adapter: {msg}"));
    match adapter {
        AdapterConfig::InstrumentRemoval { instruments } if instruments.is_empty() => {
            Err(fail("instrument_removal needs at least one instrument"))
        }
        AdapterConfig::MetricWaiver { instruments, metrics }
            if instruments.is_empty() || metrics.is_empty() =>
        {
            Err(fail("metric_waiver needs instruments and metrics"))
        }
        AdapterConfig::CustodianAggregation { custodians, .. } if custodians.is_empty() => {
            Err(fail("custodian_aggregation needs at least one custodian"))
        }
        AdapterConfig::CashThreshold { threshold, .. } if threshold.is_sign_negative() => {
            Err(fail("cash_threshold must not be negative"))
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const VALID: &str = r#"
[defaults]
tolerance = 0.01

[custodians.nbin]
feed = "positions"
region = "ca"

[[custodians.nbin.metrics]]
name = "units"
tolerance = 0
required = true

[[custodians.nbin.metrics]]
name = "price"
tolerance = 0.01
tolerance_kind = "relative"
required = false

[custodians.bmo]
feed = "bmo|holdings|ca"

[firms.pcr]
custodians = ["nbin", "bmo"]
client_metrics = ["mv"]
threshold_settings = "units,absolute,0.5|price,relative,0.02"

[firms.pcr.adapter]
kind = "pcr"
private_equity = "zero_both"

[firms.claret]
custodians = ["nbin"]
"#;

    #[test]
    fn parse_valid() {
        let config = FirmsConfig::from_toml(VALID).unwrap();
        assert_eq!(config.firms.len(), 2);
        assert_eq!(config.defaults.tolerance, dec!(0.01));
        assert_eq!(config.defaults.relative_epsilon, dec!(0.000000001));

        let nbin = config.custodian("nbin").unwrap();
        assert_eq!(nbin.metrics.len(), 2);
        assert_eq!(nbin.metrics[0].tolerance, Some(dec!(0)));
        assert!(nbin.metrics[0].required);
        assert_eq!(nbin.metrics[1].tolerance_kind, Some(ToleranceKind::Relative));
        assert!(!nbin.metrics[1].required);

        let pcr = config.firm("pcr").unwrap();
        assert_eq!(
            pcr.adapter,
            AdapterConfig::Pcr {
                private_equity: PrivateEquityPolicy::ZeroBoth
            }
        );
        assert_eq!(config.firm("claret").unwrap().adapter, AdapterConfig::Identity);
    }

    #[test]
    fn feed_descriptors() {
        let config = FirmsConfig::from_toml(VALID).unwrap();
        let nbin = config.custodian("nbin").unwrap().feed_descriptor("nbin").unwrap().unwrap();
        assert_eq!(nbin.feed, "positions");
        assert_eq!(nbin.region.as_deref(), Some("ca"));

        let bmo = config.custodian("bmo").unwrap().feed_descriptor("bmo").unwrap().unwrap();
        assert_eq!(bmo.feed, "holdings");
        assert_eq!(bmo.region.as_deref(), Some("ca"));
    }

    #[test]
    fn descriptor_must_name_its_custodian() {
        let input = r#"
[custodians.td]
feed = "rbc|positions|ca"
"#;
        let err = FirmsConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("names custodian 'rbc'"));
    }

    #[test]
    fn threshold_settings_parse() {
        let parsed = parse_threshold_settings("units,absolute,0.5 | price, relative, 0.02").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed["units"],
            ThresholdSetting {
                kind: ToleranceKind::Absolute,
                threshold: dec!(0.5)
            }
        );
        assert_eq!(parsed["price"].kind, ToleranceKind::Relative);
        assert!(parse_threshold_settings("").unwrap().is_empty());
    }

    #[test]
    fn threshold_settings_reject_malformed() {
        for bad in ["units,absolute", "units,percent,1", "units,absolute,abc", "units,absolute,-1"] {
            let err = parse_threshold_settings(bad).unwrap_err();
            assert!(err.to_string().contains("threshold setting"), "{bad}");
        }
    }

    #[test]
    fn reject_unknown_custodian_reference() {
        let input = r#"
[custodians.nbin]
feed = "positions"

[firms.pcr]
custodians = ["nbin", "td"]
"#;
        let err = FirmsConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("custodian 'td' is not configured"));
    }

    #[test]
    fn reject_duplicate_metric() {
        let input = r#"
[[custodians.nbin.metrics]]
name = "units"

[[custodians.nbin.metrics]]
name = "units"
"#;
        let err = FirmsConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn reject_unknown_adapter_kind() {
        let input = r#"
[custodians.nbin]
feed = "positions"

[firms.pcr]
custodians = ["nbin"]

[firms.pcr.adapter]
kind = "reflection"
"#;
        assert!(FirmsConfig::from_toml(input).is_err());
    }

    #[test]
    fn reject_empty_waiver() {
        let input = r#"
[custodians.nbin]
feed = "positions"

[firms.access]
custodians = ["nbin"]

[firms.access.adapter]
kind = "metric_waiver"
instruments = ["X"]
metrics = []
"#;
        let err = FirmsConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("metric_waiver"));
    }
}
