//! Exact verification of a transaction's outputs against one tweak.

use std::collections::BTreeMap;

use bitcoin::{
    key::Parity,
    secp256k1::{self, PublicKey, Scalar, Secp256k1, Signing, Verification},
    OutPoint, XOnlyPublicKey,
};

use crate::{
    keys::{Label, ScanKeys},
    primitives::FoundOutput,
    scan::candidates::{ecdh_shared_secret, output_pubkey},
};

/// Scans all taproot outputs of one transaction.
///
/// Output index `k` is incremented for as long as some output matches `P_k`, either plainly
/// or through a label found by looking up `±output - P_k` in `labels`.
pub fn scan_transaction<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    keys: &ScanKeys,
    labels: &BTreeMap<PublicKey, Label>,
    tweak: &PublicKey,
    outputs: &[(OutPoint, XOnlyPublicKey)],
) -> Result<Vec<FoundOutput>, secp256k1::Error> {
    let shared_secret = ecdh_shared_secret(secp, tweak, keys.scan_secret())?;
    let mut outputs_to_check = outputs.to_vec();
    let mut found = Vec::new();
    let mut k = 0u32;

    loop {
        #[allow(non_snake_case)]
        let (P_k, t_k) = output_pubkey(secp, &keys.spend_pubkey(), &shared_secret, k)?;
        #[allow(non_snake_case)]
        let neg_P_k = P_k.negate(secp);
        let (p_k_x_only, _) = P_k.x_only_public_key();

        let found_before = found.len();
        outputs_to_check.retain(|(outpoint, output_key)| {
            if *output_key == p_k_x_only {
                found.push(FoundOutput::from_parts(*outpoint, *output_key, t_k, None));
                return false;
            }

            for parity in [Parity::Even, Parity::Odd] {
                let Ok(label_pubkey) = output_key.public_key(parity).combine(&neg_P_k) else {
                    continue;
                };
                let Some(label) = labels.get(&label_pubkey) else {
                    continue;
                };
                match t_k.add_tweak(&Scalar::from(*label.tweak())) {
                    Ok(tweak) => {
                        found.push(FoundOutput::from_parts(
                            *outpoint,
                            *output_key,
                            tweak,
                            Some(label.clone()),
                        ));
                        return false;
                    }
                    Err(e) => {
                        tracing::warn!(%outpoint, error = %e, "Label tweak addition failed.");
                    }
                }
            }

            true
        });

        if found.len() == found_before {
            break;
        }
        k += 1;
    }

    Ok(found)
}
