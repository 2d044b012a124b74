//! pqvol-volume: post-quantum encrypted volume containers
//!
//! Container layout (all integers big-endian):
//! ```text
//! offset 0      VolumeHeader            2048 bytes, BLAKE3-hashed
//! offset 2048   key region              4096 bytes: u32 len || wrapped KEM secret key || zero pad
//! offset 6144   data region             N sealed blocks of [nonce 24][ciphertext 4096][tag 16]
//! ```
//!
//! [`VolumeManager`] drives the lifecycle: `create`, `mount`, block I/O on a
//! [`MountHandle`], `unmount`, plus `change_password` and `inspect`.

pub mod error;
pub mod header;
pub mod layout;
pub mod manager;
pub mod storage;

pub use error::{AuthFailure, FormatError, ResourceError, VolumeError, VolumeResult};
pub use header::{VolumeHeader, VolumeInfo};
pub use manager::{CreateOptions, MountHandle, VolumeManager};
pub use storage::{FsBackend, Storage, StorageBackend};
