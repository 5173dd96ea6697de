//! Infrastructure layer: ledger storage, the stock ledger engine, payment
//! reconciliation, audit trail and configuration.

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;

pub use config::{ConfigError, LedgerConfig};
pub use engine::{LedgerEngine, OrderRef, RequestContext};
pub use error::{ErrorEnvelope, ErrorKind, LedgerError};

#[cfg(test)]
mod integration_tests;
