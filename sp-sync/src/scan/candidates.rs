//! Derives the output keys a tweak could have paid the wallet.

use std::collections::HashMap;

use bitcoin::{
    key::Parity,
    secp256k1::{self, PublicKey, Scalar, Secp256k1, SecretKey, Signing, Verification},
};
use rayon::prelude::*;

use crate::{
    hashes,
    keys::{Label, ScanKeys},
    primitives::{OutputKeyBytes, TweakCandidate},
};

/// `tweak · b_scan`
pub(crate) fn ecdh_shared_secret<C: Verification>(
    secp: &Secp256k1<C>,
    tweak: &PublicKey,
    scan_secret: &SecretKey,
) -> Result<PublicKey, secp256k1::Error> {
    tweak.mul_tweak(secp, &Scalar::from(*scan_secret))
}

/// `P_k = B_spend + t_k·G`, returned with `t_k`.
pub(crate) fn output_pubkey<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    spend_pubkey: &PublicKey,
    ecdh_shared_secret: &PublicKey,
    k: u32,
) -> Result<(PublicKey, SecretKey), secp256k1::Error> {
    let t_k = hashes::shared_secret_tweak(ecdh_shared_secret, k)?;
    let p_k = spend_pubkey.combine(&t_k.public_key(secp))?;
    Ok((p_k, t_k))
}

/// Candidate x-only keys for output index `k = 0` of a transaction with `tweak`.
///
/// The unlabelled key comes first. Each label adds `P_even + L` and `P_even - L`, where
/// `P_even` is the even lift of the unlabelled x-only key, so that either parity of the
/// labelled output is covered.
pub fn derive_candidates<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    keys: &ScanKeys,
    labels: &[Label],
    tweak: &PublicKey,
) -> Result<Vec<(OutputKeyBytes, TweakCandidate)>, secp256k1::Error> {
    let shared_secret = ecdh_shared_secret(secp, tweak, keys.scan_secret())?;
    let (p_0, _) = output_pubkey(secp, &keys.spend_pubkey(), &shared_secret, 0)?;
    let (base, _) = p_0.x_only_public_key();

    let mut candidates = Vec::with_capacity(1 + 2 * labels.len());
    candidates.push((base.serialize(), TweakCandidate::from_parts(*tweak, None)));

    let p_even = base.public_key(Parity::Even);
    for label in labels {
        let label_pubkey = label.pubkey();
        for point in [
            p_even.combine(&label_pubkey)?,
            p_even.combine(&label_pubkey.negate(secp))?,
        ] {
            let (x_only, _) = point.x_only_public_key();
            candidates.push((
                x_only.serialize(),
                TweakCandidate::from_parts(*tweak, Some(label.m())),
            ));
        }
    }

    Ok(candidates)
}

/// Candidates of every tweak in a block. A tweak whose derivation fails is dropped on its
/// own and logged.
pub fn candidate_map<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    keys: &ScanKeys,
    labels: &[Label],
    tweaks: &[PublicKey],
) -> HashMap<OutputKeyBytes, TweakCandidate> {
    tweaks
        .par_iter()
        .filter_map(
            |tweak| match derive_candidates(secp, keys, labels, tweak) {
                Ok(candidates) => Some(candidates),
                Err(e) => {
                    tracing::warn!(%tweak, error = %e, "Dropping tweak, candidate derivation failed.");
                    None
                }
            },
        )
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;
    use proptest::prelude::*;

    fn secret(bytes: [u8; 32]) -> Option<SecretKey> {
        SecretKey::from_slice(&bytes).ok()
    }

    // what a sender computes for recipient label `m`: `B_spend + L_m + t_0·G`
    fn sender_output(
        secp: &Secp256k1<secp256k1::All>,
        keys: &ScanKeys,
        label: Option<&Label>,
        sender_secret: &SecretKey,
    ) -> OutputKeyBytes {
        let shared_secret = keys
            .scan_pubkey()
            .mul_tweak(secp, &Scalar::from(*sender_secret))
            .unwrap();
        let t_0 = hashes::shared_secret_tweak(&shared_secret, 0).unwrap();
        let mut spend = keys.spend_pubkey();
        if let Some(label) = label {
            spend = spend.combine(&label.pubkey()).unwrap();
        }
        let output = spend.combine(&t_0.public_key(secp)).unwrap();
        output.x_only_public_key().0.serialize()
    }

    #[test]
    fn one_plain_and_two_per_label() {
        let secp = Secp256k1::new();
        let keys = ScanKeys::new(
            &secp,
            secret([3; 32]).unwrap(),
            secret([4; 32]).unwrap().public_key(&secp),
        );
        let labels: Vec<_> = (0..3)
            .map(|m| Label::new(&secp, &keys, m, Network::Regtest).unwrap())
            .collect();
        let tweak = secret([5; 32]).unwrap().public_key(&secp);

        let candidates = derive_candidates(&secp, &keys, &labels, &tweak).unwrap();
        assert_eq!(candidates.len(), 7);
        assert_eq!(candidates[0].1.label(), None);
        assert!(candidates.iter().all(|(_, c)| c.tweak() == tweak));
    }

    #[test]
    fn tweak_map_drops_nothing_for_valid_tweaks() {
        let secp = Secp256k1::new();
        let keys = ScanKeys::new(
            &secp,
            secret([3; 32]).unwrap(),
            secret([4; 32]).unwrap().public_key(&secp),
        );
        let tweaks: Vec<_> = (1u8..=4)
            .map(|i| secret([i; 32]).unwrap().public_key(&secp))
            .collect();

        assert_eq!(candidate_map(&secp, &keys, &[], &tweaks).len(), 4);
    }

    proptest! {
        #[test]
        fn labelled_output_is_a_candidate_for_either_parity(
            scan in any::<[u8; 32]>(),
            spend in any::<[u8; 32]>(),
            sender in any::<[u8; 32]>(),
            m in 0u32..1000,
        ) {
            let secp = Secp256k1::new();
            let (Some(scan), Some(spend), Some(sender)) = (secret(scan), secret(spend), secret(sender)) else {
                return Ok(());
            };
            let keys = ScanKeys::new(&secp, scan, spend.public_key(&secp));
            let label = Label::new(&secp, &keys, m, Network::Bitcoin).unwrap();
            // the indexer publishes `A·input_hash`; with a single key and hash folded in, `a·G`
            let tweak = sender.public_key(&secp);

            let candidates: Vec<_> = derive_candidates(&secp, &keys, std::slice::from_ref(&label), &tweak)
                .unwrap()
                .into_iter()
                .map(|(key, _)| key)
                .collect();

            prop_assert_eq!(candidates[0], sender_output(&secp, &keys, None, &sender));
            prop_assert!(candidates.contains(&sender_output(&secp, &keys, Some(&label), &sender)));
        }
    }
}
