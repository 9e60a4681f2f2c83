//! Value codec: opaque payloads carry a 16-bit flags word encoding
//! (compressed? typed? chunked?). Large payloads are transparently
//! split into chunks under distinct derived keys.

use crate::error::Error;
use serde::{de::DeserializeOwned, Serialize};

pub const FLAG_COMPRESSED: u16 = 1 << 0;
pub const FLAG_STRUCTURED: u16 = 1 << 1;
pub const FLAG_RAW: u16 = 1 << 2;
pub const FLAG_INT: u16 = 1 << 3;
pub const FLAG_LONG: u16 = 1 << 4;
pub const FLAG_BOOL: u16 = 1 << 5;
pub const FLAG_CHUNKED: u16 = 1 << 12;

/// Default threshold below which a value is never chunked.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// A value that can be stored in memcached. Implemented for the
/// primitive shapes named in the flags layout (bytes, bool, int, long);
/// wrap any `Serialize` type in [`Structured`] to opt into the
/// pluggable structured-value encoding (bincode by default).
pub trait ToMemcacheValue {
    /// Returns the wire bytes and the type bits of the flags word
    /// (before compression/chunking is applied).
    fn to_memcache(&self) -> Result<(Vec<u8>, u16), Error>;
}

/// The inverse of [`ToMemcacheValue`].
pub trait FromMemcacheValue: Sized {
    fn from_memcache(bytes: &[u8], flags: u16) -> Result<Self, Error>;
}

impl ToMemcacheValue for [u8] {
    fn to_memcache(&self) -> Result<(Vec<u8>, u16), Error> {
        Ok((self.to_vec(), FLAG_RAW))
    }
}

impl ToMemcacheValue for Vec<u8> {
    fn to_memcache(&self) -> Result<(Vec<u8>, u16), Error> {
        self.as_slice().to_memcache()
    }
}

impl ToMemcacheValue for str {
    fn to_memcache(&self) -> Result<(Vec<u8>, u16), Error> {
        Ok((self.as_bytes().to_vec(), FLAG_RAW))
    }
}

impl ToMemcacheValue for String {
    fn to_memcache(&self) -> Result<(Vec<u8>, u16), Error> {
        self.as_str().to_memcache()
    }
}

impl ToMemcacheValue for bool {
    fn to_memcache(&self) -> Result<(Vec<u8>, u16), Error> {
        Ok((vec![if *self { b'1' } else { b'0' }], FLAG_BOOL))
    }
}

impl ToMemcacheValue for i32 {
    fn to_memcache(&self) -> Result<(Vec<u8>, u16), Error> {
        Ok((self.to_string().into_bytes(), FLAG_INT))
    }
}

impl ToMemcacheValue for u32 {
    fn to_memcache(&self) -> Result<(Vec<u8>, u16), Error> {
        Ok((self.to_string().into_bytes(), FLAG_INT))
    }
}

impl ToMemcacheValue for i64 {
    fn to_memcache(&self) -> Result<(Vec<u8>, u16), Error> {
        Ok((self.to_string().into_bytes(), FLAG_LONG))
    }
}

impl ToMemcacheValue for u64 {
    fn to_memcache(&self) -> Result<(Vec<u8>, u16), Error> {
        Ok((self.to_string().into_bytes(), FLAG_LONG))
    }
}

impl FromMemcacheValue for Vec<u8> {
    fn from_memcache(bytes: &[u8], _flags: u16) -> Result<Self, Error> {
        Ok(bytes.to_vec())
    }
}

impl FromMemcacheValue for String {
    fn from_memcache(bytes: &[u8], _flags: u16) -> Result<Self, Error> {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Codec(bincode::ErrorKind::Custom("invalid utf-8".into()).into()))
    }
}

impl FromMemcacheValue for bool {
    fn from_memcache(bytes: &[u8], _flags: u16) -> Result<Self, Error> {
        Ok(bytes == b"1")
    }
}

impl FromMemcacheValue for i32 {
    fn from_memcache(bytes: &[u8], _flags: u16) -> Result<Self, Error> {
        parse_ascii_int(bytes)
    }
}

impl FromMemcacheValue for i64 {
    fn from_memcache(bytes: &[u8], _flags: u16) -> Result<Self, Error> {
        parse_ascii_int(bytes)
    }
}

fn parse_ascii_int<T: std::str::FromStr>(bytes: &[u8]) -> Result<T, Error> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| Error::Codec(bincode::ErrorKind::Custom("not an integer".into()).into()))
}

/// A wrapper opting a `Serialize`/`DeserializeOwned` type into the
/// pluggable structured-value codec boundary (bincode by default). On
/// serialization failure the operation fails with `PROGRAMMING_ERR`
/// (`Error::Codec`).
pub struct Structured<T>(pub T);

impl<T: Serialize> ToMemcacheValue for Structured<T> {
    fn to_memcache(&self) -> Result<(Vec<u8>, u16), Error> {
        Ok((bincode::serialize(&self.0)?, FLAG_STRUCTURED))
    }
}

impl<T: DeserializeOwned> FromMemcacheValue for Structured<T> {
    fn from_memcache(bytes: &[u8], _flags: u16) -> Result<Self, Error> {
        Ok(Structured(bincode::deserialize(bytes)?))
    }
}

/// A Compressor implements transparent compression of encoded payload
/// bytes. A default no-op implementation is provided ([`NoCompressor`]),
/// as well as [`crate::zlib::ZlibCompressor`] behind the `zlib` feature.
pub trait Compressor: Clone + Copy + Send + Sync {
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, Error>;
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompressor;

impl Compressor for NoCompressor {
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(bytes.to_vec())
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(bytes.to_vec())
    }
}

/// The result of encoding a value for the wire: either a single blob,
/// or a chunked descriptor plus the child blobs the caller must write
/// under derived keys (`<key>/0`, `<key>/1`, ...).
pub struct EncodedValue {
    pub flags: u16,
    pub bytes: Vec<u8>,
    pub chunks: Option<Vec<Vec<u8>>>,
}

/// Encode `value`, applying compression (when `bytes.len() >=
/// comp_threshold` and `compress` is enabled, and only if it yields a
/// smaller result) and chunking (when the post-compression blob exceeds
/// `chunk_size`).
pub fn encode<V: ToMemcacheValue + ?Sized, P: Compressor>(
    value: &V,
    comp_threshold: usize,
    compress: bool,
    chunk_size: usize,
    compressor: P,
) -> Result<EncodedValue, Error> {
    let (raw, type_flags) = value.to_memcache()?;

    let (bytes, flags) = if compress && comp_threshold > 0 && raw.len() >= comp_threshold {
        let compressed = compressor.compress(&raw)?;
        if compressed.len() < raw.len() {
            (compressed, type_flags | FLAG_COMPRESSED)
        } else {
            (raw, type_flags)
        }
    } else {
        (raw, type_flags)
    };

    if bytes.len() > chunk_size {
        let chunks: Vec<Vec<u8>> = bytes.chunks(chunk_size).map(|c| c.to_vec()).collect();
        let descriptor = format!("{} {} {}", chunks.len(), bytes.len(), flags);
        Ok(EncodedValue {
            flags: FLAG_CHUNKED,
            bytes: descriptor.into_bytes(),
            chunks: Some(chunks),
        })
    } else {
        Ok(EncodedValue {
            flags,
            bytes,
            chunks: None,
        })
    }
}

/// Reassemble and decompress a stored payload. `get_child(i)` fetches
/// the i-th chunk's raw bytes when `flags` has the CHUNKED bit set; a
/// missing child yields `Ok(None)` (miss), not an error, per spec.
pub fn assemble<P: Compressor>(
    bytes: &[u8],
    flags: u16,
    compressor: P,
    mut get_child: impl FnMut(usize) -> Option<Vec<u8>>,
) -> Result<Option<(Vec<u8>, u16)>, Error> {
    if flags & FLAG_CHUNKED != 0 {
        let descriptor = std::str::from_utf8(bytes)
            .map_err(|_| Error::Codec(bincode::ErrorKind::Custom("bad descriptor".into()).into()))?;
        let mut parts = descriptor.split(' ');
        let count: usize = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad_descriptor)?;
        let total_len: usize = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad_descriptor)?;
        let inner_flags: u16 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad_descriptor)?;

        let mut out = Vec::with_capacity(total_len);
        for i in 0..count {
            match get_child(i) {
                Some(chunk) => out.extend_from_slice(&chunk),
                None => return Ok(None),
            }
        }
        decompress_if_needed(out, inner_flags, compressor).map(Some)
    } else {
        decompress_if_needed(bytes.to_vec(), flags, compressor).map(Some)
    }
}

fn bad_descriptor() -> Error {
    Error::Codec(bincode::ErrorKind::Custom("malformed chunk descriptor".into()).into())
}

fn decompress_if_needed<P: Compressor>(
    bytes: Vec<u8>,
    flags: u16,
    compressor: P,
) -> Result<(Vec<u8>, u16), Error> {
    if flags & FLAG_COMPRESSED != 0 {
        let plain = compressor.decompress(&bytes)?;
        Ok((plain, flags & !FLAG_COMPRESSED))
    } else {
        Ok((bytes, flags))
    }
}

/// Peek the child-chunk count out of a `FLAG_CHUNKED` descriptor without
/// fetching anything, so the caller knows how many derived keys to fetch
/// before calling [`assemble`].
pub fn chunk_count(descriptor: &[u8]) -> Option<usize> {
    std::str::from_utf8(descriptor)
        .ok()?
        .split(' ')
        .next()?
        .parse()
        .ok()
}

/// Names of the N derived child keys for a chunked value.
pub fn chunk_key(base: &[u8], index: usize) -> Vec<u8> {
    let mut out = base.to_vec();
    out.push(b'/');
    out.extend_from_slice(index.to_string().as_bytes());
    out
}
