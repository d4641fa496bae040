//! Optional zlib compression for saved metadata files.
//!
//! Framed data starts with a flag byte: [`FRAME_RAW`] followed by the data
//! as-is, or [`FRAME_ZLIB`] followed by the uncompressed size (u64 LE) and
//! the zlib stream.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::util::{Error, Result};

/// Frame flag: uncompressed payload.
pub const FRAME_RAW: u8 = 0;
/// Frame flag: zlib payload with size prefix.
pub const FRAME_ZLIB: u8 = 1;

/// Upper bound accepted for the declared uncompressed size.
const MAX_UNCOMPRESSED_SIZE: u64 = 1 << 32;

/// Frame `data`, compressing with zlib at `level` (0-9, 0 = store).
///
/// Falls back to a raw frame when compression does not save space.
pub fn compress_frame(data: &[u8], level: i32) -> Result<Vec<u8>> {
    if level > 0 && !data.is_empty() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.clamp(1, 9) as u32));
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        if compressed.len() + 8 < data.len() {
            let mut out = Vec::with_capacity(9 + compressed.len());
            out.push(FRAME_ZLIB);
            out.extend_from_slice(&(data.len() as u64).to_le_bytes());
            out.extend_from_slice(&compressed);
            return Ok(out);
        }
    }

    let mut out = Vec::with_capacity(1 + data.len());
    out.push(FRAME_RAW);
    out.extend_from_slice(data);
    Ok(out)
}

/// Undo [`compress_frame`].
pub fn decompress_frame(frame: &[u8]) -> Result<Vec<u8>> {
    let (&flag, body) = frame
        .split_first()
        .ok_or_else(|| Error::invalid("empty frame"))?;

    match flag {
        FRAME_RAW => Ok(body.to_vec()),
        FRAME_ZLIB => {
            if body.len() < 8 {
                return Err(Error::invalid("truncated compressed frame"));
            }
            let (size, stream) = body.split_at(8);
            let mut size_bytes = [0u8; 8];
            size_bytes.copy_from_slice(size);
            let size = u64::from_le_bytes(size_bytes);
            if size > MAX_UNCOMPRESSED_SIZE {
                return Err(Error::invalid(format!("declared size {size} is too large")));
            }

            // One byte past the declared size is enough to detect a mismatch.
            let mut out = Vec::with_capacity((size as usize).min(stream.len().saturating_mul(8)));
            ZlibDecoder::new(stream).take(size + 1).read_to_end(&mut out)?;
            if out.len() as u64 != size {
                return Err(Error::invalid(format!(
                    "decompressed {} bytes, expected {size}",
                    out.len()
                )));
            }
            Ok(out)
        }
        other => Err(Error::invalid(format!("unknown frame flag {other}"))),
    }
}

/// Whether a frame holds compressed data.
pub fn is_compressed(frame: &[u8]) -> bool {
    frame.first() == Some(&FRAME_ZLIB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress() {
        let original = b"Density Density Density Color Color Color ".repeat(100);
        let frame = compress_frame(&original, 6).unwrap();
        assert!(is_compressed(&frame));
        assert!(frame.len() < original.len());
        assert_eq!(decompress_frame(&frame).unwrap(), original);
    }

    #[test]
    fn test_level_zero_stores() {
        let frame = compress_frame(b"Short data", 0).unwrap();
        assert!(!is_compressed(&frame));
        assert_eq!(decompress_frame(&frame).unwrap(), b"Short data");
    }

    #[test]
    fn test_incompressible_stays_raw() {
        let frame = compress_frame(b"Hi", 9).unwrap();
        assert_eq!(frame, [FRAME_RAW, b'H', b'i']);
    }

    #[test]
    fn test_bad_frames() {
        assert!(decompress_frame(&[]).is_err());
        assert!(decompress_frame(&[7, 1, 2]).is_err());
        assert!(decompress_frame(&[FRAME_ZLIB, 1, 2]).is_err());
    }
}
