//! Process-wide tracing setup shared by the ledger binaries.

/// Subscriber installation (JSON output, `RUST_LOG` filtering).
pub mod tracing;

pub use crate::tracing::{init, init_with_default};
