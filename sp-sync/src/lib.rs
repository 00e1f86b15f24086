#![warn(missing_docs)]
//! Silent payments scan engine
//!
//! Entrypoints: [`crate::scan_loop::ScanLoop`] for a long running wallet and
//! [`crate::sync::Syncer`] for single sync passes.

pub mod client;
pub mod error;
pub(crate) mod hashes;
pub mod keys;
pub mod persist;
pub mod primitives;
pub mod scan;
pub mod scan_loop;
pub mod sync;
pub mod traits;
pub mod wallet;

pub use sp_status::UtxoState;
