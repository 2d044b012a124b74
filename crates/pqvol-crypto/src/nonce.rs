use rand::RngCore;

use crate::NONCE_SIZE;

/// Upper bound on nonces remembered by debug builds.
pub const TRACKED_NONCES: usize = 1 << 16;

/// Issues random 192-bit nonces for one key.
///
/// XChaCha20's nonce space makes random nonces safe without a counter. Debug
/// builds additionally remember the first [`TRACKED_NONCES`] issued nonces
/// and assert on a repeat among them; later nonces are not tracked, so the
/// set stays at a few MiB for any session length.
#[derive(Debug, Default)]
pub struct NonceSource {
    #[cfg(debug_assertions)]
    issued: std::collections::HashSet<[u8; NONCE_SIZE]>,
}

impl NonceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_nonce(&mut self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        #[cfg(debug_assertions)]
        {
            if self.issued.len() < TRACKED_NONCES {
                let fresh = self.issued.insert(nonce);
                debug_assert!(fresh, "nonce issued twice under one key");
            }
        }
        nonce
    }
}
