//! A [`Compressor`] implementing zlib compression, used when the `zlib`
//! feature is enabled (on by default).

use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Write;

use crate::codec::Compressor;
use crate::error::Error;

/// A compressor that implements zlib compression and decompression of
/// already-encoded payload bytes. The client's `comp_threshold` and
/// ratio check decide *whether* to call this; this type only does the
/// compress/decompress work.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    compression: Compression,
}

impl ZlibCompressor {
    pub fn new(compression: Compression) -> Self {
        ZlibCompressor { compression }
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        ZlibCompressor::new(Compression::default())
    }
}

impl Compressor for ZlibCompressor {
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let mut out = vec![];
        let mut enc = ZlibEncoder::new(&mut out, self.compression);
        enc.write_all(bytes)?;
        enc.finish()?;
        Ok(out)
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let mut out = vec![];
        let mut dec = ZlibDecoder::new(&mut out);
        dec.write_all(bytes)?;
        dec.finish()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zlib_roundtrip() {
        let compressor = ZlibCompressor::new(Compression::new(9));
        let value = b"0000000000000000000000000000000000000000000000";

        let compressed = compressor.compress(value).unwrap();
        let decompressed = compressor.decompress(&compressed).unwrap();

        assert!(compressed.len() < value.len());
        assert_eq!(value.to_vec(), decompressed);
    }
}
