//! BIP-352 tagged hashes.

use bitcoin::{
    hashes::{sha256t_hash_newtype, Hash, HashEngine},
    secp256k1::{self, PublicKey, SecretKey},
};

sha256t_hash_newtype! {
    pub(crate) struct LabelTag = hash_str("BIP0352/Label");

    /// BIP0352-tagged hash with tag \"Label\".
    ///
    /// This is used for computing the label tweak.
    #[hash_newtype(forward)]
    pub(crate) struct LabelHash(_);

    pub(crate) struct SharedSecretTag = hash_str("BIP0352/SharedSecret");

    /// BIP0352-tagged hash with tag \"SharedSecret\".
    ///
    /// This hash type is for computing the output tweak `t_k`.
    #[hash_newtype(forward)]
    pub(crate) struct SharedSecretHash(_);
}

/// `hash_BIP0352/Label(ser256(b_scan) || ser32(m))`
pub(crate) fn label_tweak(scan_secret: &SecretKey, m: u32) -> Result<SecretKey, secp256k1::Error> {
    let mut eng = LabelHash::engine();
    eng.input(&scan_secret.secret_bytes());
    eng.input(&m.to_be_bytes());
    let hash = LabelHash::from_engine(eng);
    SecretKey::from_slice(&hash.to_byte_array())
}

/// `t_k = hash_BIP0352/SharedSecret(serP(ecdh_shared_secret) || ser32(k))`
pub(crate) fn shared_secret_tweak(
    ecdh_shared_secret: &PublicKey,
    k: u32,
) -> Result<SecretKey, secp256k1::Error> {
    let mut eng = SharedSecretHash::engine();
    eng.input(&ecdh_shared_secret.serialize());
    eng.input(&k.to_be_bytes());
    let hash = SharedSecretHash::from_engine(eng);
    SecretKey::from_slice(&hash.to_byte_array())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::sha256;

    fn tagged(tag: &str, data: &[u8]) -> [u8; 32] {
        let tag_hash = sha256::Hash::hash(tag.as_bytes()).to_byte_array();
        let mut eng = sha256::Hash::engine();
        eng.input(&tag_hash);
        eng.input(&tag_hash);
        eng.input(data);
        sha256::Hash::from_engine(eng).to_byte_array()
    }

    #[test]
    fn label_tweak_is_tagged_sha256() {
        let scan_secret = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let mut data = [7u8; 32].to_vec();
        data.extend_from_slice(&3u32.to_be_bytes());
        assert_eq!(
            label_tweak(&scan_secret, 3).unwrap().secret_bytes(),
            tagged("BIP0352/Label", &data)
        );
    }

    #[test]
    fn shared_secret_tweak_is_tagged_sha256() {
        let secp = secp256k1::Secp256k1::new();
        let point = SecretKey::from_slice(&[9u8; 32]).unwrap().public_key(&secp);
        let mut data = point.serialize().to_vec();
        data.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(
            shared_secret_tweak(&point, 0).unwrap().secret_bytes(),
            tagged("BIP0352/SharedSecret", &data)
        );
    }
}
