//! On-disk tampering: every modified byte must surface as a typed error,
//! and structural damage must be caught before the password is used.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pqvol_core::VolumeState;
use pqvol_crypto::testing::{fast_primitives, FastKdf};
use pqvol_crypto::{
    profile, Blake3Hash, CryptoResult, Hash, Kdf, KdfParams, PasswordKey, Primitives, SALT_SIZE,
};
use pqvol_keywrap::{KeyHandle, SoftwareKeyWrap};
use pqvol_volume::layout::{DATA_REGION_OFFSET, HEADER_SIZE, KEY_REGION_OFFSET};
use pqvol_volume::{AuthFailure, CreateOptions, FormatError, VolumeError, VolumeManager};
use secrecy::SecretString;

const OFF_KEM_CIPHERTEXT: u64 = 112;
const OFF_WRAPPED_SECRET: u64 = 1680;
const OFF_LABEL: u64 = 1784;
const OFF_HASH: usize = HEADER_SIZE - 32;

/// Counts derivations so tests can assert the KDF never ran.
#[derive(Default)]
struct CountingKdf {
    calls: AtomicUsize,
}

impl Kdf for CountingKdf {
    fn algorithm(&self) -> &'static str {
        "Argon2id (counting)"
    }

    fn derive(
        &self,
        password: &SecretString,
        salt: &[u8; SALT_SIZE],
        params: &KdfParams,
    ) -> CryptoResult<PasswordKey> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FastKdf.derive(password, salt, params)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    path: PathBuf,
    mgr: VolumeManager,
    kdf: Arc<CountingKdf>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tamper.pqv");
        let kdf = Arc::new(CountingKdf::default());
        let mgr = VolumeManager::new(Arc::new(SoftwareKeyWrap::ephemeral(KeyHandle::new(
            "tamper",
        ))))
        .with_primitives(Primitives {
            kdf: kdf.clone(),
            ..fast_primitives()
        });
        let options = CreateOptions {
            label: "holiday".into(),
            ..Default::default()
        };
        mgr.create(&path, &pw(), &profile::LOW, 3 * 4096, &options)
            .unwrap();
        kdf.calls.store(0, Ordering::SeqCst);
        Self {
            _dir: dir,
            path,
            mgr,
            kdf,
        }
    }

    fn kdf_calls(&self) -> usize {
        self.kdf.calls.load(Ordering::SeqCst)
    }

    fn mount(&self) -> Result<pqvol_volume::MountHandle, VolumeError> {
        self.mgr.mount(&self.path, &pw())
    }
}

fn pw() -> SecretString {
    SecretString::from("tamper-pw")
}

fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0x01;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
}

/// Recompute the header digest so the edit gets past the structural check.
fn rehash_header(path: &Path) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header).unwrap();
    let digest = Blake3Hash.digest(&header[..OFF_HASH]);
    file.seek(SeekFrom::Start(OFF_HASH as u64)).unwrap();
    file.write_all(&digest).unwrap();
}

#[test]
fn wrapped_secret_flip_fails_header_hash() {
    let fx = Fixture::new();
    flip_byte(&fx.path, OFF_WRAPPED_SECRET + 30);

    let err = fx.mount().unwrap_err();
    assert!(matches!(
        err,
        VolumeError::Format(FormatError::HeaderHashMismatch)
    ));
    assert_eq!(fx.kdf_calls(), 0);
}

#[test]
fn wrapped_secret_flip_with_valid_hash_fails_authentication() {
    let fx = Fixture::new();
    flip_byte(&fx.path, OFF_WRAPPED_SECRET + 30);
    rehash_header(&fx.path);

    let err = fx.mount().unwrap_err();
    assert!(matches!(
        err,
        VolumeError::Authentication(AuthFailure::WrongPassword)
    ));
    assert_eq!(fx.kdf_calls(), 1);
}

#[test]
fn kem_ciphertext_flip_with_valid_hash_fails_authentication() {
    let fx = Fixture::new();
    flip_byte(&fx.path, OFF_KEM_CIPHERTEXT + 500);
    rehash_header(&fx.path);

    let err = fx.mount().unwrap_err();
    assert!(matches!(err, VolumeError::Authentication(_)));
}

#[test]
fn kdf_params_edit_with_valid_hash_fails_authentication() {
    let fx = Fixture::new();
    // Time cost lives at 52..56; bump the low byte from 3 to 2
    flip_byte(&fx.path, 55);
    rehash_header(&fx.path);

    let err = fx.mount().unwrap_err();
    assert!(matches!(err, VolumeError::Authentication(_)));
}

#[test]
fn label_edit_with_valid_hash_fails_authentication() {
    let fx = Fixture::new();
    // "holiday" -> "ioliday"
    flip_byte(&fx.path, OFF_LABEL);
    rehash_header(&fx.path);

    assert_eq!(fx.mgr.inspect(&fx.path).unwrap().label, "ioliday");
    let err = fx.mount().unwrap_err();
    assert!(matches!(
        err,
        VolumeError::Authentication(AuthFailure::WrongPassword)
    ));
}

#[test]
fn key_region_flip_fails_authentication() {
    let fx = Fixture::new();
    flip_byte(&fx.path, KEY_REGION_OFFSET + 4 + 100);

    let err = fx.mount().unwrap_err();
    assert!(matches!(
        err,
        VolumeError::Authentication(AuthFailure::WrongPassword)
    ));
}

#[test]
fn data_block_flip_faults_session() {
    let fx = Fixture::new();
    // Ciphertext of block 1
    flip_byte(&fx.path, DATA_REGION_OFFSET + 4136 + 24 + 17);

    let mut handle = fx.mount().unwrap();
    // Block 0 is untouched
    assert_eq!(
        fx.mgr.read_block(&mut handle, 0, 16).unwrap(),
        vec![0u8; 16]
    );

    let err = fx.mgr.read_block(&mut handle, 4096, 16).unwrap_err();
    assert!(matches!(
        err,
        VolumeError::Authentication(AuthFailure::TamperDetected)
    ));
    assert_eq!(handle.state(), VolumeState::Faulted);

    let err = fx.mgr.read_block(&mut handle, 0, 16).unwrap_err();
    assert!(matches!(
        err,
        VolumeError::InvalidState(VolumeState::Faulted)
    ));
    let err = fx.mgr.write_block(&mut handle, 0, 1, b"x").unwrap_err();
    assert!(matches!(err, VolumeError::InvalidState(_)));

    fx.mgr.unmount(&mut handle).unwrap();
    assert_eq!(handle.state(), VolumeState::Closed);
}

#[test]
fn partial_write_over_tampered_block_is_refused() {
    let fx = Fixture::new();
    flip_byte(&fx.path, DATA_REGION_OFFSET + 24);

    let mut handle = fx.mount().unwrap();
    let err = fx.mgr.write_block(&mut handle, 10, 3, b"abc").unwrap_err();
    assert!(matches!(
        err,
        VolumeError::Authentication(AuthFailure::TamperDetected)
    ));
    assert_eq!(handle.state(), VolumeState::Faulted);
}

#[test]
fn block_tag_flip_detected() {
    let fx = Fixture::new();
    // Last byte of block 2's tag
    flip_byte(&fx.path, DATA_REGION_OFFSET + 3 * 4136 - 1);

    let mut handle = fx.mount().unwrap();
    let err = fx.mgr.read_block(&mut handle, 2 * 4096, 1).unwrap_err();
    assert!(matches!(
        err,
        VolumeError::Authentication(AuthFailure::TamperDetected)
    ));
}

#[test]
fn swapped_blocks_detected() {
    let fx = Fixture::new();
    let mut handle = fx.mount().unwrap();
    fx.mgr.write_block(&mut handle, 0, 3, b"one").unwrap();
    fx.mgr.write_block(&mut handle, 4096, 3, b"two").unwrap();
    fx.mgr.unmount(&mut handle).unwrap();

    let mut bytes = std::fs::read(&fx.path).unwrap();
    let a = DATA_REGION_OFFSET as usize;
    let b = a + 4136;
    let first: Vec<u8> = bytes[a..b].to_vec();
    bytes.copy_within(b..b + 4136, a);
    bytes[b..b + 4136].copy_from_slice(&first);
    std::fs::write(&fx.path, &bytes).unwrap();

    let mut handle = fx.mount().unwrap();
    let err = fx.mgr.read_block(&mut handle, 0, 3).unwrap_err();
    assert!(matches!(
        err,
        VolumeError::Authentication(AuthFailure::TamperDetected)
    ));
}

#[test]
fn bad_magic_rejected_before_kdf() {
    let fx = Fixture::new();
    flip_byte(&fx.path, 0);

    let err = fx.mount().unwrap_err();
    assert!(matches!(err, VolumeError::Format(FormatError::BadMagic)));
    assert_eq!(fx.kdf_calls(), 0);
}

#[test]
fn truncated_container_rejected_before_kdf() {
    let fx = Fixture::new();
    let file = OpenOptions::new().write(true).open(&fx.path).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - 100).unwrap();
    drop(file);

    let err = fx.mount().unwrap_err();
    assert!(matches!(
        err,
        VolumeError::Format(FormatError::Truncated { .. })
    ));
    assert_eq!(fx.kdf_calls(), 0);
}

#[test]
fn header_only_fragment_is_truncated() {
    let fx = Fixture::new();
    let file = OpenOptions::new().write(true).open(&fx.path).unwrap();
    file.set_len(1000).unwrap();
    drop(file);

    let err = fx.mgr.inspect(&fx.path).unwrap_err();
    assert!(matches!(
        err,
        VolumeError::Format(FormatError::Truncated { .. })
    ));
    assert!(!err.is_retryable());
}

#[test]
fn random_file_is_not_a_volume() {
    let fx = Fixture::new();
    let other = fx.path.with_file_name("random.bin");
    std::fs::write(&other, vec![0xA5u8; 16_384]).unwrap();

    let err = fx.mgr.mount(&other, &pw()).unwrap_err();
    assert!(matches!(err, VolumeError::Format(FormatError::BadMagic)));
    assert_eq!(fx.kdf_calls(), 0);
}
