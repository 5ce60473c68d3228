use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::CrawlError;

/// Compress a header/body blob for storage. Raw zlib, not base64 — the
/// database columns are BLOB, not TEXT (see `meta.blob_encoding`).
pub fn compress_blob(data: &[u8]) -> Result<Vec<u8>, CrawlError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CrawlError::Other(e.into()))?;
    encoder.finish().map_err(|e| CrawlError::Other(e.into()))
}

pub fn decompress_blob(data: &[u8]) -> Result<Vec<u8>, CrawlError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CrawlError::Other(e.into()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let original = b"<html><head><title>hi</title></head></html>".repeat(10);
        let compressed = compress_blob(&original).unwrap();
        assert!(compressed.len() < original.len());
        let restored = decompress_blob(&compressed).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn empty_input_roundtrips() {
        let compressed = compress_blob(&[]).unwrap();
        let restored = decompress_blob(&compressed).unwrap();
        assert!(restored.is_empty());
    }
}
