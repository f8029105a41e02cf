//! Failure taxonomy shared by every reconciliation component.

use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

use crate::adapter::HookError;
use crate::model::{PositionKey, Side};

/// Which firm adapter hook raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    D1g1t,
    Custodian,
    PostProcessing,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::D1g1t => write!(f, "apply_firm_specific_d1g1t_logic"),
            Self::Custodian => write!(f, "apply_firm_specific_custodian_logic"),
            Self::PostProcessing => write!(f, "apply_recon_post_processing_logic"),
        }
    }
}

/// Coarse grouping of [`ReconError`] kinds. None of them is retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Firm or custodian setup is wrong.
    Configuration,
    /// Upstream data is missing or malformed.
    Data,
    /// Caller-supplied parameters are wrong.
    Input,
    /// A firm adapter misbehaved.
    Logic,
}

#[derive(Debug, Error)]
pub enum ReconError {
    #[error("firm '{firm_id}' is not configured")]
    FirmNotConfigured { firm_id: String },

    #[error("custodian '{custodian_id}' feed for firm '{firm_id}': {reason}")]
    CustodianFeed {
        firm_id: String,
        custodian_id: String,
        reason: String,
    },

    #[error("{}", custodian_metric_message(.custodian_id, .metric))]
    CustodianMetric {
        custodian_id: String,
        metric: Option<String>,
    },

    #[error("no d1g1t data for client '{client_id}' as of {as_of_date}")]
    ClientDataNotFound {
        client_id: String,
        as_of_date: NaiveDate,
    },

    /// d1g1t data exists but cannot be read as a positions table.
    #[error("d1g1t data for client '{client_id}' is invalid: {reason}")]
    D1g1tData { client_id: String, reason: String },

    #[error("invalid input: {reason}")]
    InputValidation { reason: String },

    #[error("{}", firm_logic_message(.firm_id, .hook, .custodian_id, .source))]
    FirmSpecificLogic {
        firm_id: String,
        hook: Hook,
        custodian_id: Option<String>,
        #[source]
        source: HookError,
    },

    #[error("metric '{metric}' required for custodian '{custodian_id}' is missing from the {side} table")]
    MissingMetric {
        custodian_id: String,
        metric: String,
        side: Side,
    },

    #[error("duplicate position {key} in {side} table")]
    DuplicatePosition { side: Side, key: PositionKey },

    #[error("config error: {reason}")]
    Config { reason: String },
}

fn custodian_metric_message(custodian_id: &str, metric: &Option<String>) -> String {
    match metric {
        Some(metric) => {
            format!("custodian '{custodian_id}': metric '{metric}' is not configured correctly")
        }
        None => format!("custodian '{custodian_id}' metrics are not configured"),
    }
}

fn firm_logic_message(
    firm_id: &str,
    hook: &Hook,
    custodian_id: &Option<String>,
    source: &HookError,
) -> String {
    match custodian_id {
        Some(custodian_id) => format!(
            "firm '{firm_id}' {hook} failed for custodian '{custodian_id}': {source}"
        ),
        None => format!("firm '{firm_id}' {hook} failed: {source}"),
    }
}

impl ReconError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::FirmNotConfigured { .. }
            | Self::CustodianFeed { .. }
            | Self::CustodianMetric { .. }
            | Self::Config { .. } => ErrorClass::Configuration,
            Self::ClientDataNotFound { .. }
            | Self::D1g1tData { .. }
            | Self::MissingMetric { .. }
            | Self::DuplicatePosition { .. } => ErrorClass::Data,
            Self::InputValidation { .. } => ErrorClass::Input,
            Self::FirmSpecificLogic { .. } => ErrorClass::Logic,
        }
    }

    pub(crate) fn input(reason: impl Into<String>) -> Self {
        Self::InputValidation {
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Identifies the run (and, once known, the custodian) a failure belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunContext {
    pub firm_id: Option<String>,
    pub client_id: Option<String>,
    pub as_of_date: Option<NaiveDate>,
    pub custodian_id: Option<String>,
}

impl RunContext {
    pub fn new(firm_id: &str, client_id: &str, as_of_date: NaiveDate) -> Self {
        Self {
            firm_id: Some(firm_id.to_string()),
            client_id: Some(client_id.to_string()),
            as_of_date: Some(as_of_date),
            custodian_id: None,
        }
    }

    pub fn for_custodian(&self, custodian_id: &str) -> Self {
        Self {
            custodian_id: Some(custodian_id.to_string()),
            ..self.clone()
        }
    }
}

impl fmt::Display for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(firm) = &self.firm_id {
            parts.push(format!("firm={firm}"));
        }
        if let Some(client) = &self.client_id {
            parts.push(format!("client={client}"));
        }
        if let Some(date) = &self.as_of_date {
            parts.push(format!("date={date}"));
        }
        if let Some(custodian) = &self.custodian_id {
            parts.push(format!("custodian={custodian}"));
        }
        write!(f, "[{}]", parts.join(" "))
    }
}

/// A [`ReconError`] annotated with the run it aborted.
#[derive(Debug, Error)]
#[error("{context} {error}")]
pub struct RunError {
    pub context: RunContext,
    #[source]
    pub error: ReconError,
}

impl RunError {
    pub fn new(context: RunContext, error: ReconError) -> Self {
        Self { context, error }
    }

    pub fn kind(&self) -> &ReconError {
        &self.error
    }

    pub fn class(&self) -> ErrorClass {
        self.error.class()
    }

    pub fn into_inner(self) -> ReconError {
        self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 28).unwrap()
    }

    #[test]
    fn classes_follow_taxonomy() {
        let err = ReconError::FirmNotConfigured { firm_id: "x".into() };
        assert_eq!(err.class(), ErrorClass::Configuration);
        let err = ReconError::MissingMetric {
            custodian_id: "nbin".into(),
            metric: "units".into(),
            side: Side::Custodian,
        };
        assert_eq!(err.class(), ErrorClass::Data);
        assert_eq!(ReconError::input("empty").class(), ErrorClass::Input);
    }

    #[test]
    fn firm_logic_preserves_cause() {
        let err = ReconError::FirmSpecificLogic {
            firm_id: "pcr".into(),
            hook: Hook::Custodian,
            custodian_id: Some("nbin".into()),
            source: "lookup file missing".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("apply_firm_specific_custodian_logic"));
        assert!(msg.contains("'nbin'"));
        assert_eq!(err.source().unwrap().to_string(), "lookup file missing");
        assert_eq!(err.class(), ErrorClass::Logic);
    }

    #[test]
    fn custodian_metric_message_variants() {
        let all = ReconError::CustodianMetric {
            custodian_id: "bmo".into(),
            metric: None,
        };
        assert_eq!(all.to_string(), "custodian 'bmo' metrics are not configured");
        let one = ReconError::CustodianMetric {
            custodian_id: "bmo".into(),
            metric: Some("price".into()),
        };
        assert!(one.to_string().contains("'price'"));
    }

    #[test]
    fn run_error_display_includes_context() {
        let ctx = RunContext::new("pcr", "C1", date()).for_custodian("nbin");
        let err = RunError::new(ctx, ReconError::input("custodian list is empty"));
        assert_eq!(
            err.to_string(),
            "[firm=pcr client=C1 date=2024-03-28 custodian=nbin] invalid input: custodian list is empty"
        );
        assert!(matches!(err.kind(), ReconError::InputValidation { .. }));
    }
}
