//! Byte layout of a container: region offsets, block addressing, and the
//! key region encoding.

use pqvol_core::VolumeId;
use pqvol_crypto::{NONCE_SIZE, TAG_SIZE};

pub const HEADER_SIZE: usize = 2048;

pub const KEY_REGION_OFFSET: u64 = HEADER_SIZE as u64;
pub const KEY_REGION_SIZE: usize = 4096;

pub const DATA_REGION_OFFSET: u64 = KEY_REGION_OFFSET + KEY_REGION_SIZE as u64;

/// Plaintext bytes per block.
pub const BLOCK_SIZE: usize = 4096;

/// On-disk size of one block: nonce, ciphertext, tag.
pub const SEALED_BLOCK_SIZE: usize = NONCE_SIZE + BLOCK_SIZE + TAG_SIZE;

const KEY_REGION_LEN_PREFIX: usize = 4;

/// Largest wrapped key blob the key region can hold.
pub const MAX_WRAPPED_KEY_LEN: usize = KEY_REGION_SIZE - KEY_REGION_LEN_PREFIX;

pub fn block_count(volume_size: u64) -> u64 {
    volume_size.div_ceil(BLOCK_SIZE as u64)
}

/// Total file length for a volume of `volume_size` data bytes, or `None` if it
/// would overflow.
pub fn container_len(volume_size: u64) -> Option<u64> {
    block_count(volume_size)
        .checked_mul(SEALED_BLOCK_SIZE as u64)?
        .checked_add(DATA_REGION_OFFSET)
}

pub fn block_offset(index: u64) -> u64 {
    DATA_REGION_OFFSET + index * SEALED_BLOCK_SIZE as u64
}

/// AAD binding a block to its volume and position.
pub fn block_aad(volume_id: &VolumeId, index: u64) -> [u8; 24] {
    let mut aad = [0u8; 24];
    aad[..16].copy_from_slice(volume_id.as_bytes());
    aad[16..].copy_from_slice(&index.to_be_bytes());
    aad
}

/// The part of one block touched by a byte-range operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// Block index in the data region
    pub index: u64,
    /// Offset of the range within the block's plaintext
    pub start: usize,
    /// Bytes of this block covered by the range
    pub len: usize,
    /// Offset of this piece within the caller's buffer
    pub buf_offset: usize,
}

impl BlockSpan {
    pub fn is_full_block(&self) -> bool {
        self.start == 0 && self.len == BLOCK_SIZE
    }
}

/// Split `[offset, offset + length)` into per-block pieces. Callers bounds-check
/// the range first.
pub fn spans(offset: u64, length: usize) -> impl Iterator<Item = BlockSpan> {
    let mut pos = offset;
    let mut done = 0usize;
    std::iter::from_fn(move || {
        if done >= length {
            return None;
        }
        let index = pos / BLOCK_SIZE as u64;
        let start = (pos % BLOCK_SIZE as u64) as usize;
        let len = (BLOCK_SIZE - start).min(length - done);
        let span = BlockSpan {
            index,
            start,
            len,
            buf_offset: done,
        };
        pos += len as u64;
        done += len;
        Some(span)
    })
}

/// Encode a wrapped key blob into a full key region, or `None` if it does not
/// fit.
pub fn encode_key_region(blob: &[u8]) -> Option<Vec<u8>> {
    if blob.len() > MAX_WRAPPED_KEY_LEN {
        return None;
    }
    let mut region = vec![0u8; KEY_REGION_SIZE];
    region[..KEY_REGION_LEN_PREFIX].copy_from_slice(&(blob.len() as u32).to_be_bytes());
    region[KEY_REGION_LEN_PREFIX..KEY_REGION_LEN_PREFIX + blob.len()].copy_from_slice(blob);
    Some(region)
}

/// Extract the wrapped key blob from a key region. `None` on a bad length.
pub fn decode_key_region(region: &[u8]) -> Option<&[u8]> {
    let prefix = region.first_chunk::<KEY_REGION_LEN_PREFIX>()?;
    let len = u32::from_be_bytes(*prefix) as usize;
    if len == 0 || len > MAX_WRAPPED_KEY_LEN {
        return None;
    }
    region.get(KEY_REGION_LEN_PREFIX..KEY_REGION_LEN_PREFIX + len)
}
