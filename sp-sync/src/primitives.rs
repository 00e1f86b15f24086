//! Module for primitive structs associated with the scan engine

use bitcoin::{
    secp256k1::{PublicKey, SecretKey},
    OutPoint, Txid, XOnlyPublicKey,
};
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use sp_status::UtxoState;

use crate::keys::Label;

/// 8-byte short hash of an outpoint, matched against spent-outpoint filters
pub type OutpointHash = [u8; 8];

/// An x-only output key in its on-chain byte form, `scriptPubKey[2..34]`
pub type OutputKeyBytes = [u8; 32];

/// Maps a derived candidate output key back to the tweak that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct TweakCandidate {
    /// ECDH tweak published by the indexer
    tweak: PublicKey,
    /// Label index the candidate was derived with, `None` for the plain output
    label: Option<u32>,
}

impl TweakCandidate {
    /// Creates new TweakCandidate from parts
    pub fn from_parts(tweak: PublicKey, label: Option<u32>) -> Self {
        Self { tweak, label }
    }
}

/// An output that passed exact verification.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct FoundOutput {
    #[getset(get_copy = "pub")]
    outpoint: OutPoint,
    #[getset(get_copy = "pub")]
    output_key: XOnlyPublicKey,
    /// `t_k`, or `t_k + label tweak` for labelled outputs
    #[getset(get = "pub")]
    tweak: SecretKey,
    #[getset(get = "pub")]
    label: Option<Label>,
}

impl FoundOutput {
    /// Creates new FoundOutput from parts
    pub fn from_parts(
        outpoint: OutPoint,
        output_key: XOnlyPublicKey,
        tweak: SecretKey,
        label: Option<Label>,
    ) -> Self {
        Self {
            outpoint,
            output_key,
            tweak,
            label,
        }
    }
}

/// A discovered output belonging to the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, Serialize, Deserialize)]
pub struct OwnedUtxo {
    #[getset(get_copy = "pub")]
    txid: Txid,
    #[getset(get_copy = "pub")]
    vout: u32,
    /// Satoshis
    #[getset(get_copy = "pub")]
    amount: u64,
    /// Added to the spend secret this gives the output's signing key.
    #[getset(get = "pub")]
    priv_key_tweak: SecretKey,
    #[getset(get_copy = "pub")]
    output_key: XOnlyPublicKey,
    #[getset(get = "pub")]
    label: Option<Label>,
    /// Block time of inclusion
    #[getset(get_copy = "pub")]
    timestamp: u64,
    #[getset(get_copy = "pub")]
    state: UtxoState,
}

impl OwnedUtxo {
    /// Creates new OwnedUtxo from a verified output and the indexer's view of it
    pub fn from_parts(found: FoundOutput, amount: u64, timestamp: u64, state: UtxoState) -> Self {
        let outpoint = found.outpoint();
        Self {
            txid: outpoint.txid,
            vout: outpoint.vout,
            amount,
            priv_key_tweak: found.tweak,
            output_key: found.output_key,
            label: found.label,
            timestamp,
            state,
        }
    }

    /// Deduplication key
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    /// Moves to `next` unless the output is already spent. Returns whether the state changed.
    pub fn transition(&mut self, next: UtxoState) -> bool {
        if self.state == next || !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }
}
