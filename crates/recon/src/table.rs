//! Raw tabular input and its conversion into [`PositionTable`]s.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::error::ReconError;
use crate::model::{InstrumentType, PositionKey, PositionRow, PositionTable, Side};

pub const CLIENT_ID: &str = "client_id";
pub const FIRM_ID: &str = "firm_id";
pub const CUSTODIAN_ID: &str = "custodian_id";
pub const INSTRUMENT_ID: &str = "instrument_id";
pub const INSTRUMENT_TYPE: &str = "instrument_type";
pub const AS_OF_DATE: &str = "as_of_date";

const REQUIRED_COLUMNS: [&str; 4] = [CLIENT_ID, INSTRUMENT_ID, INSTRUMENT_TYPE, AS_OF_DATE];
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("missing column '{0}'")]
    MissingColumn(String),
    #[error("row {row}: cannot parse date '{value}'")]
    Date { row: usize, value: String },
    #[error("row {row}: cannot parse '{column}' value '{value}'")]
    Number {
        row: usize,
        column: String,
        value: String,
    },
    #[error("duplicate position {0}")]
    Duplicate(PositionKey),
    #[error("{0}")]
    Invalid(String),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

/// Untyped header + records, as handed over by a data-access collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl RawTable {
    pub fn from_csv(data: &str) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(data.as_bytes());

        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut records = Vec::new();
        for record in reader.records() {
            records.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, records })
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Type the records. Empty metric cells become nulls; `firm_id` and
    /// `custodian_id` fall back to the given defaults when absent or blank.
    pub fn to_positions(
        &self,
        side: Side,
        firm_id: &str,
        custodian_id: &str,
    ) -> Result<PositionTable, TableError> {
        self.to_lots(side, firm_id, custodian_id)?
            .check_unique()
            .map_err(|e| match e {
                ReconError::DuplicatePosition { key, .. } => TableError::Duplicate(key),
                other => TableError::Invalid(other.to_string()),
            })
    }

    /// Like [`RawTable::to_positions`], but rows may repeat a key.
    pub fn to_lots(
        &self,
        side: Side,
        firm_id: &str,
        custodian_id: &str,
    ) -> Result<PositionTable, TableError> {
        let idx = |name: &str| {
            self.index(name)
                .ok_or_else(|| TableError::MissingColumn(name.to_string()))
        };
        let client_idx = idx(CLIENT_ID)?;
        let instrument_idx = idx(INSTRUMENT_ID)?;
        let type_idx = idx(INSTRUMENT_TYPE)?;
        let date_idx = idx(AS_OF_DATE)?;
        let firm_idx = self.index(FIRM_ID);
        let custodian_idx = self.index(CUSTODIAN_ID);

        let identity: BTreeSet<&str> = REQUIRED_COLUMNS
            .iter()
            .chain([FIRM_ID, CUSTODIAN_ID].iter())
            .copied()
            .collect();
        let metric_columns: Vec<(usize, String)> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !identity.contains(h.as_str()))
            .map(|(i, h)| (i, metric_name(side, h)))
            .collect();

        let mut rows = Vec::with_capacity(self.records.len());
        for (n, record) in self.records.iter().enumerate() {
            let row_no = n + 1;
            let cell = |i: usize| record.get(i).map(|v| v.trim()).unwrap_or("");
            let or_default = |i: Option<usize>, default: &str| {
                i.map(cell)
                    .filter(|v| !v.is_empty())
                    .unwrap_or(default)
                    .to_string()
            };

            let date_str = cell(date_idx);
            let as_of_date =
                NaiveDate::parse_from_str(date_str, DATE_FORMAT).map_err(|_| TableError::Date {
                    row: row_no,
                    value: date_str.to_string(),
                })?;

            let mut metrics = BTreeMap::new();
            for (i, name) in &metric_columns {
                let raw = cell(*i);
                let value = if raw.is_empty() {
                    None
                } else {
                    Some(parse_decimal(raw).ok_or_else(|| TableError::Number {
                        row: row_no,
                        column: self.headers[*i].clone(),
                        value: raw.to_string(),
                    })?)
                };
                metrics.insert(name.clone(), value);
            }

            rows.push(PositionRow {
                client_id: record.get(client_idx).cloned().unwrap_or_default(),
                firm_id: or_default(firm_idx, firm_id),
                custodian_id: or_default(custodian_idx, custodian_id),
                instrument_id: record.get(instrument_idx).cloned().unwrap_or_default(),
                instrument_type: InstrumentType::parse(cell(type_idx)),
                as_of_date,
                metrics,
            });
        }

        let names = metric_columns.into_iter().map(|(_, name)| name);
        Ok(PositionTable::lots(side, names, rows))
    }
}

/// Strip the side's prefix: `d1g1t_units` on the d1g1t side is `units`.
fn metric_name(side: Side, header: &str) -> String {
    header
        .strip_prefix(side.prefix())
        .and_then(|rest| rest.strip_prefix('_'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(header)
        .to_string()
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned = raw.replace(',', "");
    cleaned
        .parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(&cleaned).ok())
}
