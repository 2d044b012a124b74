//! Volume lifecycle: create, mount, block I/O, unmount, password change.
//!
//! Mount order is fixed: lock, header structure, container length, then the
//! KDF. A foreign, corrupted or already-mounted container is therefore
//! rejected before any password work. Every failure after the password is
//! used collapses to `WrongPassword`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use pqvol_core::{VolumeId, VolumeState};
use pqvol_crypto::{
    derive_key_check, derive_master_key, generate_salt, verify_key_check, Aead, CryptoError,
    KdfParams, KemSecretKey, MasterKey, NonceSource, PasswordKey, Primitives, ProfileCatalog,
    VolumeSecret, KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
use pqvol_keywrap::{KeyWrap, KeyWrapError, WrappedKey};
use secrecy::SecretString;
use zeroize::Zeroizing;

use crate::error::{AuthFailure, FormatError, ResourceError, VolumeError, VolumeResult};
use crate::header::{self, VolumeHeader, VolumeInfo, WrappedVolumeSecret, LABEL_SIZE};
use crate::layout::{
    self, block_aad, block_offset, BLOCK_SIZE, HEADER_SIZE, KEY_REGION_OFFSET, KEY_REGION_SIZE,
    SEALED_BLOCK_SIZE,
};
use crate::storage::{FsBackend, Storage, StorageBackend};

/// Blocks sealed per write while initialising the data region.
const INIT_BATCH_BLOCKS: u64 = 64;

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Replace an existing file at the path (never a mounted container)
    pub overwrite: bool,
    /// Free-form label stored in the header, at most 128 bytes of UTF-8
    pub label: String,
    /// Personal iterations multiplier applied to the KDF time cost
    pub pim: Option<u32>,
}

pub struct VolumeManager {
    keywrap: Arc<dyn KeyWrap>,
    primitives: Primitives,
    storage: Arc<dyn StorageBackend>,
}

impl VolumeManager {
    pub fn new(keywrap: Arc<dyn KeyWrap>) -> Self {
        Self {
            keywrap,
            primitives: Primitives::default(),
            storage: Arc::new(FsBackend),
        }
    }

    pub fn with_primitives(mut self, primitives: Primitives) -> Self {
        self.primitives = primitives;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = storage;
        self
    }

    /// Create a new container of `size` data bytes at `path`.
    pub fn create(
        &self,
        path: &Path,
        password: &SecretString,
        params: &KdfParams,
        size: u64,
        options: &CreateOptions,
    ) -> VolumeResult<VolumeId> {
        let params = &effective_params(params, options.pim)?;
        if size == 0 {
            return Err(VolumeError::InvalidArgument("volume size must be non-zero".into()));
        }
        let total_len = layout::container_len(size)
            .ok_or_else(|| VolumeError::InvalidArgument(format!("volume size {size} too large")))?;
        if options.label.len() > LABEL_SIZE || options.label.contains('\0') {
            return Err(VolumeError::InvalidArgument(format!(
                "label must be at most {LABEL_SIZE} bytes without NUL"
            )));
        }

        let mut storage = self.storage.create(path, total_len, options.overwrite)?;

        match self.initialise(storage.as_mut(), password, params, size, &options.label) {
            Ok(volume_id) => {
                tracing::info!(
                    path = %path.display(),
                    volume_id = %volume_id,
                    size,
                    kdf = %params,
                    "created volume"
                );
                Ok(volume_id)
            }
            Err(e) => {
                drop(storage);
                if let Err(rm) = self.storage.remove(path) {
                    tracing::warn!(path = %path.display(), error = %rm, "failed to remove partial container");
                }
                Err(e)
            }
        }
    }

    fn initialise(
        &self,
        storage: &mut dyn Storage,
        password: &SecretString,
        params: &KdfParams,
        size: u64,
        label: &str,
    ) -> VolumeResult<VolumeId> {
        let p = &self.primitives;
        let volume_id = VolumeId::new_random();
        let salt = generate_salt();
        let volume_secret = VolumeSecret::generate();

        let keypair = p.kem.generate_keypair()?;
        let password_key = p.kdf.derive(password, &salt, params)?;
        let (kem_ciphertext, shared) = p.kem.encapsulate(&keypair.public_key)?;

        let master = derive_master_key(&shared, &volume_secret, volume_id.as_bytes())?;
        drop(shared);

        let wrapped_sk = self.keywrap.wrap_key(keypair.secret_key.as_bytes())?;
        drop(keypair);
        let key_region = layout::encode_key_region(wrapped_sk.as_bytes()).ok_or_else(|| {
            KeyWrapError::Unavailable(format!(
                "wrapped key of {} bytes does not fit the key region",
                wrapped_sk.len()
            ))
        })?;

        let mut header = VolumeHeader::new(
            volume_id,
            size,
            *params,
            salt,
            kem_ciphertext,
            label.to_string(),
            unix_now(),
        );
        header.key_check = derive_key_check(&master, volume_id.as_bytes())?;
        header.wrapped_secret =
            seal_volume_secret(p.aead.as_ref(), &password_key, &volume_secret, &header)?;
        drop(password_key);
        drop(volume_secret);

        storage.write_at(KEY_REGION_OFFSET, &key_region)?;
        self.seal_data_region(storage, &master, &volume_id, size)?;
        // Header last: a container without a valid header is never mountable
        storage.write_at(0, &header.to_bytes(p.hash.as_ref()))?;
        storage.flush()?;

        Ok(volume_id)
    }

    fn seal_data_region(
        &self,
        storage: &mut dyn Storage,
        master: &MasterKey,
        volume_id: &VolumeId,
        size: u64,
    ) -> VolumeResult<()> {
        let zeros = [0u8; BLOCK_SIZE];
        let mut nonces = NonceSource::new();
        let blocks = layout::block_count(size);
        let mut batch = Vec::with_capacity(INIT_BATCH_BLOCKS as usize * SEALED_BLOCK_SIZE);

        let mut first = 0u64;
        while first < blocks {
            let last = (first + INIT_BATCH_BLOCKS).min(blocks);
            batch.clear();
            for index in first..last {
                let nonce = nonces.next_nonce();
                let sealed = self.primitives.aead.seal(
                    master.as_bytes(),
                    &nonce,
                    &block_aad(volume_id, index),
                    &zeros,
                )?;
                batch.extend_from_slice(&nonce);
                batch.extend_from_slice(&sealed.ciphertext);
                batch.extend_from_slice(&sealed.tag);
            }
            storage.write_at(block_offset(first), &batch)?;
            first = last;
        }
        tracing::debug!(volume_id = %volume_id, blocks, "sealed data region");
        Ok(())
    }

    /// Mount a container. Blocks for the duration of the KDF.
    pub fn mount(&self, path: &Path, password: &SecretString) -> VolumeResult<MountHandle> {
        tracing::debug!(path = %path.display(), state = %VolumeState::Mounting, "mounting volume");
        let mut storage = self.storage.open(path)?;
        let header = self.read_header(storage.as_mut())?;

        let master = self.unlock(storage.as_mut(), &header, password)?;

        tracing::info!(
            path = %path.display(),
            volume_id = %header.volume_id,
            "mounted volume"
        );
        Ok(MountHandle {
            path: path.to_path_buf(),
            volume_id: header.volume_id,
            volume_size: header.volume_size,
            state: VolumeState::Mounted,
            aead: Arc::clone(&self.primitives.aead),
            storage: Some(storage),
            keys: Some(SessionKeys {
                master,
                nonces: NonceSource::new(),
            }),
        })
    }

    /// Structural checks only: header parse and container length.
    fn read_header(&self, storage: &mut dyn Storage) -> VolumeResult<VolumeHeader> {
        let file_len = storage.len()?;
        let mut buf = vec![0u8; (file_len.min(HEADER_SIZE as u64)) as usize];
        storage.read_at(0, &mut buf)?;
        let header = VolumeHeader::parse(&buf, self.primitives.hash.as_ref())?;

        // container_len cannot overflow: parse rejected such sizes
        let expected = layout::container_len(header.volume_size).unwrap_or(u64::MAX);
        if file_len < expected {
            return Err(FormatError::Truncated {
                expected,
                actual: file_len,
            }
            .into());
        }
        if file_len > expected {
            return Err(FormatError::Malformed(format!(
                "container is {file_len} bytes, expected {expected}"
            ))
            .into());
        }
        Ok(header)
    }

    /// Run the credential chain. Any failure past the KDF is `WrongPassword`.
    fn unlock(
        &self,
        storage: &mut dyn Storage,
        header: &VolumeHeader,
        password: &SecretString,
    ) -> VolumeResult<MasterKey> {
        let p = &self.primitives;
        let password_key = p.kdf.derive(password, &header.salt, &header.kdf_params)?;
        let volume_secret = open_volume_secret(p.aead.as_ref(), &password_key, header)
            .ok_or_else(VolumeError::wrong_password)?;
        drop(password_key);

        let mut region = Zeroizing::new(vec![0u8; KEY_REGION_SIZE]);
        storage.read_at(KEY_REGION_OFFSET, &mut region)?;
        let blob = layout::decode_key_region(&region).ok_or_else(VolumeError::wrong_password)?;

        let sk_bytes = self
            .keywrap
            .unwrap_key(&WrappedKey::from_bytes(blob.to_vec()))
            .map_err(|_| VolumeError::wrong_password())?;
        let secret_key =
            KemSecretKey::from_bytes(sk_bytes).map_err(|_| VolumeError::wrong_password())?;
        let shared = p
            .kem
            .decapsulate(&secret_key, &header.kem_ciphertext)
            .map_err(|_| VolumeError::wrong_password())?;
        drop(secret_key);

        let master = derive_master_key(&shared, &volume_secret, header.volume_id.as_bytes())?;
        if !verify_key_check(&master, header.volume_id.as_bytes(), &header.key_check)? {
            return Err(VolumeError::wrong_password());
        }
        Ok(master)
    }

    /// Zeroize the session keys, flush, release the lock.
    pub fn unmount(&self, handle: &mut MountHandle) -> VolumeResult<()> {
        handle.close()
    }

    pub fn read_block(
        &self,
        handle: &mut MountHandle,
        offset: u64,
        length: usize,
    ) -> VolumeResult<Vec<u8>> {
        handle.read(offset, length)
    }

    pub fn write_block(
        &self,
        handle: &mut MountHandle,
        offset: u64,
        length: usize,
        data: &[u8],
    ) -> VolumeResult<()> {
        if data.len() != length {
            return Err(VolumeError::InvalidArgument(format!(
                "data is {} bytes, length is {length}",
                data.len()
            )));
        }
        handle.write(offset, data)
    }

    /// Re-seal the volume secret under a new password (and optionally new KDF
    /// parameters). KEM keys, key region and data are untouched, and so is
    /// the master key.
    ///
    /// A `pim` multiplies the time cost of `params`, or of the current
    /// parameters when `params` is `None`.
    pub fn change_password(
        &self,
        path: &Path,
        old_password: &SecretString,
        new_password: &SecretString,
        params: Option<KdfParams>,
        pim: Option<u32>,
    ) -> VolumeResult<()> {
        let p = &self.primitives;
        let mut storage = self.storage.open(path)?;
        let mut header = self.read_header(storage.as_mut())?;
        let new_params = match (params, pim) {
            (None, None) => header.kdf_params,
            (params, pim) => effective_params(&params.unwrap_or(header.kdf_params), pim)?,
        };

        let old_key = p.kdf.derive(old_password, &header.salt, &header.kdf_params)?;
        let volume_secret = open_volume_secret(p.aead.as_ref(), &old_key, &header)
            .ok_or_else(VolumeError::wrong_password)?;
        drop(old_key);

        header.salt = generate_salt();
        header.kdf_params = new_params;
        header.modified = unix_now();

        let new_key = p.kdf.derive(new_password, &header.salt, &header.kdf_params)?;
        header.wrapped_secret =
            seal_volume_secret(p.aead.as_ref(), &new_key, &volume_secret, &header)?;
        drop(new_key);
        drop(volume_secret);

        storage.write_at(0, &header.to_bytes(p.hash.as_ref()))?;
        storage
            .flush()
            .map_err(|e| VolumeError::Resource(ResourceError::FlushError(e)))?;

        tracing::info!(
            path = %path.display(),
            volume_id = %header.volume_id,
            kdf = %header.kdf_params,
            "changed volume password"
        );
        Ok(())
    }

    /// Describe a container from its header alone. Works on mounted volumes.
    pub fn inspect(&self, path: &Path) -> VolumeResult<VolumeInfo> {
        let mut storage = self.storage.open_shared(path)?;
        Ok(self.read_header(storage.as_mut())?.info())
    }
}

impl std::fmt::Debug for VolumeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeManager")
            .field("keywrap", self.keywrap.handle())
            .field("primitives", &self.primitives)
            .finish()
    }
}

/// Apply the PIM, then hold the result to the profile floor and to the
/// ceilings `parse` enforces, so no unmountable header is ever written.
fn effective_params(params: &KdfParams, pim: Option<u32>) -> VolumeResult<KdfParams> {
    let params = match pim {
        Some(pim) => params
            .with_pim(pim)
            .map_err(|e| VolumeError::InvalidArgument(e.to_string()))?,
        None => *params,
    };
    ProfileCatalog::check_floor(&params)?;
    header::check_kdf_range(&params).map_err(|_| {
        VolumeError::InvalidArgument(format!("KDF parameters {params} exceed the supported maximum"))
    })?;
    Ok(params)
}

fn seal_volume_secret(
    aead: &dyn Aead,
    password_key: &PasswordKey,
    volume_secret: &VolumeSecret,
    header: &VolumeHeader,
) -> VolumeResult<WrappedVolumeSecret> {
    // One seal per fresh password key; a random nonce is always fresh here
    let nonce = NonceSource::new().next_nonce();
    let sealed = aead.seal(
        password_key.as_bytes(),
        &nonce,
        &header.wrapped_key_aad(),
        volume_secret.as_bytes(),
    )?;
    let ciphertext: [u8; KEY_SIZE] = sealed
        .ciphertext
        .as_slice()
        .try_into()
        .map_err(|_| VolumeError::Crypto(CryptoError::Primitive("volume secret seal")))?;
    Ok(WrappedVolumeSecret {
        nonce,
        ciphertext,
        tag: sealed.tag,
    })
}

fn open_volume_secret(
    aead: &dyn Aead,
    password_key: &PasswordKey,
    header: &VolumeHeader,
) -> Option<VolumeSecret> {
    let w = &header.wrapped_secret;
    let plain = aead
        .open(
            password_key.as_bytes(),
            &w.nonce,
            &header.wrapped_key_aad(),
            &w.ciphertext,
            &w.tag,
        )
        .ok()?;
    let bytes: [u8; KEY_SIZE] = plain.as_slice().try_into().ok()?;
    Some(VolumeSecret::from_bytes(bytes))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct SessionKeys {
    master: MasterKey,
    nonces: NonceSource,
}

/// A mounted volume. Owns the master key and the container lock; both go
/// away on `unmount` or drop.
pub struct MountHandle {
    path: PathBuf,
    volume_id: VolumeId,
    volume_size: u64,
    state: VolumeState,
    aead: Arc<dyn Aead>,
    storage: Option<Box<dyn Storage>>,
    keys: Option<SessionKeys>,
}

impl MountHandle {
    pub fn state(&self) -> VolumeState {
        self.state
    }

    pub fn volume_id(&self) -> VolumeId {
        self.volume_id
    }

    pub fn volume_size(&self) -> u64 {
        self.volume_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn close(&mut self) -> VolumeResult<()> {
        if self.state == VolumeState::Closed {
            return Err(VolumeError::NotMounted);
        }
        self.set_state(VolumeState::Unmounting);
        // Keys go first so a failed flush cannot leave them behind
        self.keys = None;

        let result = match self.storage.as_mut() {
            Some(storage) => storage.flush(),
            None => Ok(()),
        };
        self.storage = None;
        self.set_state(VolumeState::Closed);

        match result {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), volume_id = %self.volume_id, "unmounted volume");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "flush failed during unmount");
                Err(ResourceError::FlushError(e).into())
            }
        }
    }

    fn set_state(&mut self, state: VolumeState) {
        tracing::debug!(volume_id = %self.volume_id, from = %self.state, to = %state, "volume state");
        self.state = state;
    }

    /// Drop the keys and refuse further I/O until remounted.
    fn fault(&mut self) {
        self.keys = None;
        self.set_state(VolumeState::Faulted);
    }

    fn check_range(&self, offset: u64, length: usize) -> VolumeResult<()> {
        if !self.state.is_mounted() {
            return Err(VolumeError::InvalidState(self.state));
        }
        let in_bounds = offset
            .checked_add(length as u64)
            .is_some_and(|end| end <= self.volume_size);
        if !in_bounds {
            return Err(VolumeError::OutOfBounds {
                offset,
                length: length as u64,
                size: self.volume_size,
            });
        }
        Ok(())
    }

    fn read(&mut self, offset: u64, length: usize) -> VolumeResult<Vec<u8>> {
        self.check_range(offset, length)?;
        let mut out = vec![0u8; length];
        for span in layout::spans(offset, length) {
            let plain = self.open_block(span.index)?;
            out[span.buf_offset..span.buf_offset + span.len]
                .copy_from_slice(&plain[span.start..span.start + span.len]);
        }
        tracing::debug!(volume_id = %self.volume_id, offset, length, "read");
        Ok(out)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> VolumeResult<()> {
        self.check_range(offset, data.len())?;
        for span in layout::spans(offset, data.len()) {
            let piece = &data[span.buf_offset..span.buf_offset + span.len];
            let mut plain = if span.is_full_block() {
                Zeroizing::new(vec![0u8; BLOCK_SIZE])
            } else {
                self.open_block(span.index)?
            };
            plain[span.start..span.start + span.len].copy_from_slice(piece);
            self.seal_block(span.index, &plain)?;
        }
        tracing::debug!(volume_id = %self.volume_id, offset, length = data.len(), "write");
        Ok(())
    }

    fn open_block(&mut self, index: u64) -> VolumeResult<Zeroizing<Vec<u8>>> {
        let mut sealed = vec![0u8; SEALED_BLOCK_SIZE];
        let read = match self.storage.as_mut() {
            Some(storage) => storage.read_at(block_offset(index), &mut sealed),
            None => return Err(VolumeError::InvalidState(self.state)),
        };
        if let Err(e) = read {
            self.fault();
            return Err(e.into());
        }

        let Some(keys) = self.keys.as_ref() else {
            return Err(VolumeError::InvalidState(self.state));
        };
        let (nonce, rest) = sealed
            .split_first_chunk::<NONCE_SIZE>()
            .ok_or(VolumeError::InvalidState(self.state))?;
        let (ciphertext, tag) = rest
            .split_last_chunk::<TAG_SIZE>()
            .ok_or(VolumeError::InvalidState(self.state))?;

        match self.aead.open(
            keys.master.as_bytes(),
            nonce,
            &block_aad(&self.volume_id, index),
            ciphertext,
            tag,
        ) {
            Ok(plain) => Ok(plain),
            Err(_) => {
                tracing::warn!(
                    path = %self.path.display(),
                    volume_id = %self.volume_id,
                    block = index,
                    "block failed authentication, faulting session"
                );
                self.fault();
                Err(AuthFailure::TamperDetected.into())
            }
        }
    }

    fn seal_block(&mut self, index: u64, plain: &[u8]) -> VolumeResult<()> {
        let Some(keys) = self.keys.as_mut() else {
            return Err(VolumeError::InvalidState(self.state));
        };
        let nonce = keys.nonces.next_nonce();
        let sealed = self.aead.seal(
            keys.master.as_bytes(),
            &nonce,
            &block_aad(&self.volume_id, index),
            plain,
        )?;

        let mut out = Vec::with_capacity(SEALED_BLOCK_SIZE);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed.ciphertext);
        out.extend_from_slice(&sealed.tag);

        let written = match self.storage.as_mut() {
            Some(storage) => storage.write_at(block_offset(index), &out),
            None => return Err(VolumeError::InvalidState(self.state)),
        };
        if let Err(e) = written {
            self.fault();
            return Err(e.into());
        }
        Ok(())
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        self.keys = None;
        if let Some(mut storage) = self.storage.take() {
            if let Err(e) = storage.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "flush failed on drop");
            }
        }
    }
}

impl std::fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountHandle")
            .field("path", &self.path)
            .field("volume_id", &self.volume_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
