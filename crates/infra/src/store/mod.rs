//! Ledger Storage boundary.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{LedgerStore, LedgerTx, MovementPage, MovementRow, Pagination, StoreError};
