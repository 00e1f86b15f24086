//! Membership tests against BIP-158 style Golomb-coded set filters.

use std::borrow::Borrow;

use bitcoin::{
    bip158::{GcsFilterReader, GcsFilterWriter},
    hashes::Hash,
    BlockHash,
};

use crate::{client::FilterData, scan::error::FilterError};

/// Golomb-Rice parameter of the indexer's filters
pub const FILTER_P: u8 = 19;
/// False positive rate parameter of the indexer's filters
pub const FILTER_M: u64 = 784_931;

/// SipHash keys: the first 16 bytes of the block hash in internal byte order, as two
/// little-endian words.
pub fn filter_keys(block_hash: &BlockHash) -> (u64, u64) {
    let bytes = block_hash.to_byte_array();
    let mut k0 = [0u8; 8];
    let mut k1 = [0u8; 8];
    k0.copy_from_slice(&bytes[0..8]);
    k1.copy_from_slice(&bytes[8..16]);
    (u64::from_le_bytes(k0), u64::from_le_bytes(k1))
}

/// Whether any needle may be in the filter. No needles never match.
pub fn match_filter<I>(filter: &FilterData, needles: I) -> Result<bool, FilterError>
where
    I: IntoIterator,
    I::Item: Borrow<[u8]>,
{
    let needles: Vec<I::Item> = needles.into_iter().collect();
    if needles.is_empty() {
        return Ok(false);
    }

    let (k0, k1) = filter_keys(&filter.block_hash);
    let reader = GcsFilterReader::new(k0, k1, FILTER_M, FILTER_P);
    let mut data = filter.data.as_slice();
    Ok(reader.match_any(
        &mut data,
        needles.iter().map(|needle| Borrow::<[u8]>::borrow(needle)),
    )?)
}

/// Builds a filter with the indexer's parameters.
pub fn build_filter<I>(block_hash: &BlockHash, elements: I) -> Result<Vec<u8>, bitcoin::io::Error>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let (k0, k1) = filter_keys(block_hash);
    let mut out = Vec::new();
    {
        let mut writer = GcsFilterWriter::new(&mut out, k0, k1, FILTER_M, FILTER_P);
        for element in elements {
            writer.add_element(element.as_ref());
        }
        writer.finish()?;
    }
    Ok(out)
}
