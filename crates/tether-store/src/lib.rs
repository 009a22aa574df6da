//! # tether-store
//!
//! Engines behind the `HistoryStore` trait:
//!
//! - **SqliteStore**: durable history in a single SQLite file (WAL mode).
//! - **MemoryStore**: process-local history for tests and dry runs.

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::SqliteStore;
