//! Monitoring core for a Solana account-watcher.
//!
//! Split into a library so the storage-layer components (the watch
//! registry, the notification ledger) can be exercised by `#[sqlx::test]`
//! integration tests in `tests/` in addition to the inline pure-function
//! unit tests each module carries. `src/main.rs` is a thin binary shell
//! over this library.

pub mod classifier;
pub mod config;
pub mod credentials;
pub mod error;
pub mod ledger;
pub mod rate_controller;
pub mod registry;
pub mod router;
pub mod rpc;
pub mod scheduler;
pub mod supervisor;
