//! Pure hash functions taking a byte string to a `u32` digest. Selected
//! via [`HashFn`] at client construction; all are deterministic across
//! platforms.

use md5::{Digest, Md5};

const FNV1_32_OFFSET: u32 = 0x811c_9dc5;
const FNV1_32_PRIME: u32 = 0x0100_0193;

/// Which hash function a client uses to route keys onto the continuum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashFn {
    Md5,
    Fnv1_32,
    Fnv1a32,
    Crc32,
}

impl Default for HashFn {
    fn default() -> Self {
        HashFn::Md5
    }
}

impl HashFn {
    pub fn hash(&self, data: &[u8]) -> u32 {
        match self {
            HashFn::Md5 => hash_md5(data),
            HashFn::Fnv1_32 => hash_fnv1_32(data),
            HashFn::Fnv1a32 => hash_fnv1a_32(data),
            HashFn::Crc32 => hash_crc32(data),
        }
    }
}

/// The full 16-byte MD5 digest of `data`.
pub fn md5_digest(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// MD5-based 32-bit hash matching Ketama: the first 4 bytes of the
/// digest, read little-endian (i.e. the low 4 bytes of the digest,
/// byte-reversed from big-endian order).
pub fn hash_md5(data: &[u8]) -> u32 {
    let digest = md5_digest(data);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// FNV-1 32-bit hash: multiply-then-xor.
pub fn hash_fnv1_32(data: &[u8]) -> u32 {
    let mut hash = FNV1_32_OFFSET;
    for &byte in data {
        hash = hash.wrapping_mul(FNV1_32_PRIME);
        hash ^= byte as u32;
    }
    hash
}

/// FNV-1a 32-bit hash: xor-then-multiply.
pub fn hash_fnv1a_32(data: &[u8]) -> u32 {
    let mut hash = FNV1_32_OFFSET;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV1_32_PRIME);
    }
    hash
}

/// Standard IEEE CRC-32.
pub fn hash_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
