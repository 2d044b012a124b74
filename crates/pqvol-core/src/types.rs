use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a volume, stored in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(Uuid);

impl VolumeId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle state of a mount handle.
///
/// `Closed → Mounting → Mounted → Unmounting → Closed`, with `Faulted`
/// reachable from `Mounted` on an I/O or integrity failure. A faulted
/// handle only accepts `unmount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeState {
    Closed,
    Mounting,
    Mounted,
    Unmounting,
    Faulted,
}

impl VolumeState {
    pub fn is_mounted(self) -> bool {
        self == VolumeState::Mounted
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeState::Closed => "closed",
            VolumeState::Mounting => "mounting",
            VolumeState::Mounted => "mounted",
            VolumeState::Unmounting => "unmounting",
            VolumeState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}
