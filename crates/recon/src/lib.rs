//! `custodia-recon`: firm-pluggable custodian position reconciliation engine.
//!
//! Pure engine crate: collaborators hand in d1g1t positions and custodian
//! feeds, the engine returns a typed, classified result. No CLI concerns.

pub mod adapter;
pub mod aggregate;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod loader;
pub mod matcher;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod table;

pub use adapter::{FirmAdapter, HookError};
pub use config::FirmsConfig;
pub use engine::{ReconEngine, RunRequest};
pub use error::{ReconError, RunContext, RunError};
pub use model::{ComparedRow, PositionRow, PositionTable, ReconResult};
pub use registry::FirmRegistry;
