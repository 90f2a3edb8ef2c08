// Revledger Kernel
//
// Batch-versioning and commit protocol for an append-only,
// content-hashed ledger of JSON documents.

pub mod buffer;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod record;
pub mod retry;
pub mod revision;
pub mod schema;
pub mod session;
pub mod store;

pub use error::LedgerError;
pub use session::{CommitReport, LedgerSession, TableCommit};
