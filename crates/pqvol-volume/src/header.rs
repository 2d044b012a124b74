//! Fixed 2048-byte volume header
//!
//! ```text
//! off   size  field
//! 0     8     magic "PQVOLHDR"
//! 8     2     version
//! 10    2     header size (2048)
//! 12    4     flags (0)
//! 16    16    volume id
//! 32    8     volume size (bytes)
//! 40    4     block size (4096)
//! 44    2     KEM id (1 = ML-KEM-1024)
//! 46    2     KDF id (1 = Argon2id v1.3)
//! 48    4     KDF memory cost (KiB)
//! 52    4     KDF time cost
//! 56    4     KDF parallelism
//! 60    4     reserved
//! 64    32    salt
//! 96    8     created (unix seconds)
//! 104   8     modified (unix seconds)
//! 112   1568  KEM ciphertext
//! 1680  72    wrapped volume secret: nonce 24 || ciphertext 32 || tag 16
//! 1752  32    key check
//! 1784  128   label (UTF-8, zero padded)
//! 1912  104   reserved
//! 2016  32    BLAKE3(bytes[0..2016])
//! ```
//!
//! Parsing is structural only and never touches key material.

use pqvol_core::VolumeId;
use pqvol_crypto::{
    Hash, KdfParams, KemCiphertext, DIGEST_SIZE, KEM_CIPHERTEXT_SIZE, KEY_SIZE, NONCE_SIZE,
    SALT_SIZE, TAG_SIZE,
};
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::error::FormatError;
use crate::layout::{self, BLOCK_SIZE, HEADER_SIZE};

pub const MAGIC: [u8; 8] = *b"PQVOLHDR";
pub const VERSION: u16 = 1;

pub const KEM_ML_KEM_1024: u16 = 1;
pub const KDF_ARGON2ID: u16 = 1;

pub const LABEL_SIZE: usize = 128;

/// KDF cost ceilings accepted when parsing. Keeps a hostile header from
/// demanding unbounded memory or time before the password check.
pub const MAX_KDF_MEMORY_KIB: u32 = 4 * 1024 * 1024;
pub const MAX_KDF_TIME_COST: u32 = 100;
pub const MAX_KDF_PARALLELISM: u32 = 64;

const OFF_VERSION: usize = 8;
const OFF_HEADER_SIZE: usize = 10;
const OFF_FLAGS: usize = 12;
const OFF_VOLUME_ID: usize = 16;
const OFF_VOLUME_SIZE: usize = 32;
const OFF_BLOCK_SIZE: usize = 40;
const OFF_KEM_ID: usize = 44;
const OFF_KDF_ID: usize = 46;
const OFF_KDF_MEMORY: usize = 48;
const OFF_KDF_TIME: usize = 52;
const OFF_KDF_PARALLELISM: usize = 56;
const OFF_SALT: usize = 64;
const OFF_CREATED: usize = 96;
const OFF_MODIFIED: usize = 104;
const OFF_KEM_CIPHERTEXT: usize = 112;
const OFF_WRAPPED_KEY: usize = OFF_KEM_CIPHERTEXT + KEM_CIPHERTEXT_SIZE;
const OFF_KEY_CHECK: usize = OFF_WRAPPED_KEY + WrappedVolumeSecret::SIZE;
const OFF_LABEL: usize = OFF_KEY_CHECK + KEY_SIZE;
const OFF_HASH: usize = HEADER_SIZE - DIGEST_SIZE;

const _: () = assert!(OFF_WRAPPED_KEY == 1680);
const _: () = assert!(OFF_LABEL + LABEL_SIZE <= OFF_HASH);

/// Volume secret sealed under the password key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedVolumeSecret {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: [u8; KEY_SIZE],
    pub tag: [u8; TAG_SIZE],
}

impl WrappedVolumeSecret {
    pub const SIZE: usize = NONCE_SIZE + KEY_SIZE + TAG_SIZE;

    fn empty() -> Self {
        Self {
            nonce: [0u8; NONCE_SIZE],
            ciphertext: [0u8; KEY_SIZE],
            tag: [0u8; TAG_SIZE],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHeader {
    pub volume_id: VolumeId,
    pub volume_size: u64,
    pub kdf_params: KdfParams,
    pub salt: [u8; SALT_SIZE],
    pub created: u64,
    pub modified: u64,
    pub kem_ciphertext: KemCiphertext,
    pub wrapped_secret: WrappedVolumeSecret,
    pub key_check: [u8; KEY_SIZE],
    pub label: String,
}

/// Secret-free description of a container, as shown by `inspect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    pub volume_id: VolumeId,
    pub version: u16,
    pub volume_size: u64,
    pub block_size: u32,
    pub kem: &'static str,
    pub kdf: &'static str,
    pub kdf_params: KdfParams,
    pub created: u64,
    pub modified: u64,
    pub label: String,
}

impl VolumeHeader {
    /// A header for a fresh volume. The wrapped secret and key check are
    /// filled in once the key hierarchy exists.
    pub fn new(
        volume_id: VolumeId,
        volume_size: u64,
        kdf_params: KdfParams,
        salt: [u8; SALT_SIZE],
        kem_ciphertext: KemCiphertext,
        label: String,
        now: u64,
    ) -> Self {
        Self {
            volume_id,
            volume_size,
            kdf_params,
            salt,
            created: now,
            modified: now,
            kem_ciphertext,
            wrapped_secret: WrappedVolumeSecret::empty(),
            key_check: [0u8; KEY_SIZE],
            label,
        }
    }

    /// Header bytes bound as AAD into the wrapped volume secret: everything
    /// before it (KDF parameters, salt, KEM ciphertext) followed by the
    /// label field. The key check is covered by its own verification.
    pub fn wrapped_key_aad(&self) -> Vec<u8> {
        let fields = self.encode_fields();
        let mut aad = Vec::with_capacity(OFF_WRAPPED_KEY + LABEL_SIZE);
        aad.extend_from_slice(&fields[..OFF_WRAPPED_KEY]);
        aad.extend_from_slice(&fields[OFF_LABEL..OFF_LABEL + LABEL_SIZE]);
        aad
    }

    pub fn to_bytes(&self, hash: &dyn Hash) -> [u8; HEADER_SIZE] {
        let mut buf = self.encode_fields();
        let digest = hash.digest(&buf[..OFF_HASH]);
        buf[OFF_HASH..].copy_from_slice(&digest);
        buf
    }

    fn encode_fields(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..8].copy_from_slice(&MAGIC);
        put(&mut buf, OFF_VERSION, &VERSION.to_be_bytes());
        put(&mut buf, OFF_HEADER_SIZE, &(HEADER_SIZE as u16).to_be_bytes());
        put(&mut buf, OFF_FLAGS, &0u32.to_be_bytes());
        put(&mut buf, OFF_VOLUME_ID, self.volume_id.as_bytes());
        put(&mut buf, OFF_VOLUME_SIZE, &self.volume_size.to_be_bytes());
        put(&mut buf, OFF_BLOCK_SIZE, &(BLOCK_SIZE as u32).to_be_bytes());
        put(&mut buf, OFF_KEM_ID, &KEM_ML_KEM_1024.to_be_bytes());
        put(&mut buf, OFF_KDF_ID, &KDF_ARGON2ID.to_be_bytes());
        put(&mut buf, OFF_KDF_MEMORY, &self.kdf_params.memory_cost_kib.to_be_bytes());
        put(&mut buf, OFF_KDF_TIME, &self.kdf_params.time_cost.to_be_bytes());
        put(&mut buf, OFF_KDF_PARALLELISM, &self.kdf_params.parallelism.to_be_bytes());
        put(&mut buf, OFF_SALT, &self.salt);
        put(&mut buf, OFF_CREATED, &self.created.to_be_bytes());
        put(&mut buf, OFF_MODIFIED, &self.modified.to_be_bytes());
        put(&mut buf, OFF_KEM_CIPHERTEXT, self.kem_ciphertext.as_bytes());
        put(&mut buf, OFF_WRAPPED_KEY, &self.wrapped_secret.nonce);
        put(&mut buf, OFF_WRAPPED_KEY + NONCE_SIZE, &self.wrapped_secret.ciphertext);
        put(
            &mut buf,
            OFF_WRAPPED_KEY + NONCE_SIZE + KEY_SIZE,
            &self.wrapped_secret.tag,
        );
        put(&mut buf, OFF_KEY_CHECK, &self.key_check);
        let label = self.label.as_bytes();
        let label_len = label.len().min(LABEL_SIZE);
        put(&mut buf, OFF_LABEL, &label[..label_len]);
        buf
    }

    /// Validate and decode a header. Checks run in a fixed order: length,
    /// magic, version, hash, then field decoding.
    pub fn parse(bytes: &[u8], hash: &dyn Hash) -> Result<Self, FormatError> {
        let buf: &[u8; HEADER_SIZE] =
            bytes
                .first_chunk::<HEADER_SIZE>()
                .ok_or(FormatError::Truncated {
                    expected: HEADER_SIZE as u64,
                    actual: bytes.len() as u64,
                })?;

        if buf[..8] != MAGIC {
            return Err(FormatError::BadMagic);
        }

        let version = u16::from_be_bytes(take(buf, OFF_VERSION));
        if version != VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let digest = hash.digest(&buf[..OFF_HASH]);
        if !bool::from(digest[..].ct_eq(&buf[OFF_HASH..])) {
            return Err(FormatError::HeaderHashMismatch);
        }

        let header_size = u16::from_be_bytes(take(buf, OFF_HEADER_SIZE));
        if header_size as usize != HEADER_SIZE {
            return Err(FormatError::Malformed(format!("header size {header_size}")));
        }
        let flags = u32::from_be_bytes(take(buf, OFF_FLAGS));
        if flags != 0 {
            return Err(FormatError::Malformed(format!("unknown flags {flags:#x}")));
        }
        let block_size = u32::from_be_bytes(take(buf, OFF_BLOCK_SIZE));
        if block_size as usize != BLOCK_SIZE {
            return Err(FormatError::Malformed(format!("block size {block_size}")));
        }

        let kem_id = u16::from_be_bytes(take(buf, OFF_KEM_ID));
        if kem_id != KEM_ML_KEM_1024 {
            return Err(FormatError::UnsupportedAlgorithm {
                field: "KEM",
                id: kem_id,
            });
        }
        let kdf_id = u16::from_be_bytes(take(buf, OFF_KDF_ID));
        if kdf_id != KDF_ARGON2ID {
            return Err(FormatError::UnsupportedAlgorithm {
                field: "KDF",
                id: kdf_id,
            });
        }

        let kdf_params = KdfParams::new(
            u32::from_be_bytes(take(buf, OFF_KDF_MEMORY)),
            u32::from_be_bytes(take(buf, OFF_KDF_TIME)),
            u32::from_be_bytes(take(buf, OFF_KDF_PARALLELISM)),
        );
        check_kdf_range(&kdf_params)?;

        let volume_size = u64::from_be_bytes(take(buf, OFF_VOLUME_SIZE));
        if volume_size == 0 || layout::container_len(volume_size).is_none() {
            return Err(FormatError::Malformed(format!("volume size {volume_size}")));
        }

        let label_bytes: [u8; LABEL_SIZE] = take(buf, OFF_LABEL);
        let label_end = label_bytes
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        let label = std::str::from_utf8(&label_bytes[..label_end])
            .map_err(|_| FormatError::Malformed("label is not UTF-8".into()))?
            .to_string();

        Ok(Self {
            volume_id: VolumeId::from_bytes(take(buf, OFF_VOLUME_ID)),
            volume_size,
            kdf_params,
            salt: take(buf, OFF_SALT),
            created: u64::from_be_bytes(take(buf, OFF_CREATED)),
            modified: u64::from_be_bytes(take(buf, OFF_MODIFIED)),
            kem_ciphertext: KemCiphertext::from_bytes(take(buf, OFF_KEM_CIPHERTEXT)),
            wrapped_secret: WrappedVolumeSecret {
                nonce: take(buf, OFF_WRAPPED_KEY),
                ciphertext: take(buf, OFF_WRAPPED_KEY + NONCE_SIZE),
                tag: take(buf, OFF_WRAPPED_KEY + NONCE_SIZE + KEY_SIZE),
            },
            key_check: take(buf, OFF_KEY_CHECK),
            label,
        })
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            volume_id: self.volume_id,
            version: VERSION,
            volume_size: self.volume_size,
            block_size: BLOCK_SIZE as u32,
            kem: "ML-KEM-1024",
            kdf: "Argon2id",
            kdf_params: self.kdf_params,
            created: self.created,
            modified: self.modified,
            label: self.label.clone(),
        }
    }
}

/// Cost ceilings enforced by `parse`; `create` applies them too so it never
/// writes a header that cannot be mounted.
pub(crate) fn check_kdf_range(params: &KdfParams) -> Result<(), FormatError> {
    let ok = (1..=MAX_KDF_TIME_COST).contains(&params.time_cost)
        && (1..=MAX_KDF_PARALLELISM).contains(&params.parallelism)
        && params.memory_cost_kib <= MAX_KDF_MEMORY_KIB
        && params.memory_cost_kib >= 8 * params.parallelism;
    if ok {
        Ok(())
    } else {
        Err(FormatError::Malformed(format!(
            "KDF parameters out of range ({params})"
        )))
    }
}

fn put(buf: &mut [u8; HEADER_SIZE], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn take<const N: usize>(buf: &[u8; HEADER_SIZE], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}
