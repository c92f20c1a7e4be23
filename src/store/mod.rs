//! Persistence layer — accounts, recipient pool and activity log.

#[cfg(test)]
mod contention;
pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryStore;
pub use traits::{AccountEdit, AccountStore, ActivityLog, RecipientPool};
