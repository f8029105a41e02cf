//! Data-access seams: where d1g1t positions and custodian feeds come from.
//!
//! The engine only sees the [`D1g1tSource`] and [`FeedSource`] traits.
//! Directory-backed sources read CSV files; in-memory sources back tests
//! and embedders that already hold the data.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::adapter::HookError;
use crate::config::{FeedDescriptor, FirmsConfig};
use crate::error::ReconError;
use crate::model::{PositionTable, Side};
use crate::table::RawTable;

/// Failure reported by a [`FeedSource`].
pub type SourceError = HookError;

/// Canonical d1g1t positions. An empty table means no data for the client.
pub trait D1g1tSource: Send + Sync {
    fn load(
        &self,
        firm_id: &str,
        client_id: &str,
        as_of_date: NaiveDate,
    ) -> Result<PositionTable, ReconError>;
}

/// Raw custodian positions for one feed.
pub trait FeedSource: Send + Sync {
    fn fetch(
        &self,
        feed: &FeedDescriptor,
        client_id: &str,
        as_of_date: NaiveDate,
    ) -> Result<RawTable, SourceError>;
}

// ---------------------------------------------------------------------------
// Custodian feed loader
// ---------------------------------------------------------------------------

/// Resolves a custodian's feed for a firm and types its rows.
///
/// Firm-specific logic is not applied here; the same loader serves every
/// firm using a custodian.
pub struct CustodianFeedLoader {
    config: Arc<FirmsConfig>,
    source: Arc<dyn FeedSource>,
}

impl CustodianFeedLoader {
    pub fn new(config: Arc<FirmsConfig>, source: Arc<dyn FeedSource>) -> Self {
        Self { config, source }
    }

    pub fn load(
        &self,
        firm_id: &str,
        custodian_id: &str,
        client_id: &str,
        as_of_date: NaiveDate,
    ) -> Result<PositionTable, ReconError> {
        let feed_error = |reason: String| ReconError::CustodianFeed {
            firm_id: firm_id.to_string(),
            custodian_id: custodian_id.to_string(),
            reason,
        };

        let firm = self
            .config
            .firm(firm_id)
            .ok_or_else(|| ReconError::FirmNotConfigured {
                firm_id: firm_id.to_string(),
            })?;
        if !firm.custodians.iter().any(|c| c == custodian_id) {
            return Err(feed_error("custodian is not set up for this firm".into()));
        }
        let descriptor = self
            .config
            .custodian(custodian_id)
            .ok_or_else(|| feed_error("custodian is not configured".into()))?
            .feed_descriptor(custodian_id)
            .map_err(|e| feed_error(e.to_string()))?
            .ok_or_else(|| feed_error("no feed configured".into()))?;

        log::debug!(
            "fetching feed '{}' for custodian '{custodian_id}' client '{client_id}' {as_of_date}",
            descriptor.feed
        );
        let raw = self
            .source
            .fetch(&descriptor, client_id, as_of_date)
            .map_err(|e| feed_error(format!("fetch failed: {e}")))?;

        // Lots sharing a key are kept; firm hooks may aggregate them.
        let table = raw
            .to_lots(Side::Custodian, firm_id, custodian_id)
            .map_err(|e| feed_error(format!("invalid feed table: {e}")))?;

        let table = table.retain(|row| row.client_id == client_id && row.as_of_date == as_of_date);
        let firm_id = firm_id.to_string();
        let custodian_id = custodian_id.to_string();
        Ok(table.map_rows(|row| {
            row.firm_id = firm_id.clone();
            row.custodian_id = custodian_id.clone();
        }))
    }
}

// ---------------------------------------------------------------------------
// Directory sources
// ---------------------------------------------------------------------------

/// Reads `{root}/d1g1t/{firm}/{date}.csv`.
#[derive(Debug, Clone)]
pub struct DirectoryD1g1tSource {
    root: PathBuf,
}

impl DirectoryD1g1tSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, firm_id: &str, as_of_date: NaiveDate) -> PathBuf {
        self.root
            .join("d1g1t")
            .join(firm_id)
            .join(format!("{as_of_date}.csv"))
    }
}

impl D1g1tSource for DirectoryD1g1tSource {
    fn load(
        &self,
        firm_id: &str,
        client_id: &str,
        as_of_date: NaiveDate,
    ) -> Result<PositionTable, ReconError> {
        let path = self.path(firm_id, as_of_date);
        if !path.exists() {
            log::debug!("no d1g1t file at {}", path.display());
            return Ok(PositionTable::empty(Side::D1g1t));
        }
        let invalid = |reason: String| ReconError::D1g1tData {
            client_id: client_id.to_string(),
            reason,
        };
        let data = read_file(&path).map_err(|e| invalid(e.to_string()))?;
        let table = RawTable::from_csv(&data)
            .and_then(|raw| raw.to_positions(Side::D1g1t, firm_id, ""))
            .map_err(|e| invalid(format!("{}: {e}", path.display())))?;
        Ok(table.retain(|row| row.client_id == client_id && row.as_of_date == as_of_date))
    }
}

/// Reads `{root}/{custodian}/{feed}/{date}.csv`.
#[derive(Debug, Clone)]
pub struct DirectoryFeedSource {
    root: PathBuf,
}

impl DirectoryFeedSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, feed: &FeedDescriptor, as_of_date: NaiveDate) -> PathBuf {
        self.root
            .join(&feed.custodian)
            .join(&feed.feed)
            .join(format!("{as_of_date}.csv"))
    }
}

impl FeedSource for DirectoryFeedSource {
    fn fetch(
        &self,
        feed: &FeedDescriptor,
        _client_id: &str,
        as_of_date: NaiveDate,
    ) -> Result<RawTable, SourceError> {
        let path = self.path(feed, as_of_date);
        let data = read_file(&path)?;
        Ok(RawTable::from_csv(&data)?)
    }
}

fn read_file(path: &Path) -> Result<String, std::io::Error> {
    std::fs::read_to_string(path).map_err(|e| {
        std::io::Error::new(e.kind(), format!("cannot read {}: {e}", path.display()))
    })
}

// ---------------------------------------------------------------------------
// In-memory sources
// ---------------------------------------------------------------------------

/// d1g1t tables keyed by firm; rows are filtered by client and date on load.
#[derive(Debug, Clone, Default)]
pub struct MemoryD1g1tSource {
    tables: HashMap<String, PositionTable>,
}

impl MemoryD1g1tSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, firm_id: &str, table: PositionTable) {
        self.tables.insert(firm_id.to_string(), table);
    }
}

impl D1g1tSource for MemoryD1g1tSource {
    fn load(
        &self,
        firm_id: &str,
        client_id: &str,
        as_of_date: NaiveDate,
    ) -> Result<PositionTable, ReconError> {
        Ok(match self.tables.get(firm_id) {
            Some(table) => table
                .clone()
                .retain(|row| row.client_id == client_id && row.as_of_date == as_of_date),
            None => PositionTable::empty(Side::D1g1t),
        })
    }
}

/// Raw feed tables keyed by `(custodian, feed)`.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeedSource {
    tables: HashMap<(String, String), RawTable>,
}

impl MemoryFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, custodian: &str, feed: &str, table: RawTable) {
        self.tables
            .insert((custodian.to_string(), feed.to_string()), table);
    }
}

impl FeedSource for MemoryFeedSource {
    fn fetch(
        &self,
        feed: &FeedDescriptor,
        _client_id: &str,
        _as_of_date: NaiveDate,
    ) -> Result<RawTable, SourceError> {
        self.tables
            .get(&(feed.custodian.clone(), feed.feed.clone()))
            .cloned()
            .ok_or_else(|| format!("feed '{}' has no data", feed.feed).into())
    }
}
