#![forbid(unsafe_code)]
//! Lifecycle state of an owned silent-payment output.
pub mod utxo_state;

pub use utxo_state::{UnknownState, UtxoState};
