//! # Compression Tool
//!
//! Thin registry over the block compressors the stream layer can use. The
//! algorithm is addressed by name and is *not* embedded in the on-disk
//! record; readers must be configured with the same algorithm the writer
//! used.
//!
//! Supported names:
//!
//! - `"LZ4"`: `lz4_flex` raw block compression
//! - `"NO"` : identity (stored uncompressed, still in the compressed record
//!   framing)

use eyre::Result;

use crate::error::{DbError, ErrorCode};

/// Named block compression front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressTool {
    Lz4,
    No,
}

impl CompressTool {
    /// Resolves an algorithm by name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "LZ4" => Ok(CompressTool::Lz4),
            "NO" => Ok(CompressTool::No),
            other => Err(DbError::get(
                ErrorCode::UnsupportedSetting,
                format!("compression algorithm {other}"),
            )),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressTool::Lz4 => "LZ4",
            CompressTool::No => "NO",
        }
    }

    /// Compresses `buf`, returning the compressed bytes.
    pub fn compress(self, buf: &[u8]) -> Vec<u8> {
        match self {
            CompressTool::Lz4 => lz4_flex::compress(buf),
            CompressTool::No => buf.to_vec(),
        }
    }

    /// Expands `src` into `dst[off..]`; the caller knows the uncompressed
    /// length from the record header and must size `dst` accordingly.
    pub fn expand(self, src: &[u8], dst: &mut [u8], off: usize) -> Result<()> {
        match self {
            CompressTool::Lz4 => {
                let out = &mut dst[off..];
                let n = lz4_flex::decompress_into(src, out)
                    .map_err(|e| DbError::get(ErrorCode::FileCorrupted, format!("lz4: {e}")))?;
                if n != out.len() {
                    return Err(DbError::get(
                        ErrorCode::FileCorrupted,
                        format!("lz4 expanded {n} bytes, expected {}", out.len()),
                    ));
                }
                Ok(())
            }
            CompressTool::No => {
                dst[off..off + src.len()].copy_from_slice(src);
                Ok(())
            }
        }
    }
}
