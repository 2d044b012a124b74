use crate::DIGEST_SIZE;

/// Unkeyed digest capability used for header integrity.
pub trait Hash: Send + Sync {
    fn algorithm(&self) -> &'static str;

    fn digest(&self, data: &[u8]) -> [u8; DIGEST_SIZE];
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Hash;

impl Hash for Blake3Hash {
    fn algorithm(&self) -> &'static str {
        "BLAKE3"
    }

    fn digest(&self, data: &[u8]) -> [u8; DIGEST_SIZE] {
        *blake3::hash(data).as_bytes()
    }
}
