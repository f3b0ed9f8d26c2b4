//! zlib compression helpers for message payloads and framed streams.
//!
//! Level semantics follow the zip convention: 0 disables compression,
//! 1..=9 select the usual speed/ratio trade-off, and -1 picks the codec
//! default.

use crate::error::{Result, WirelineError};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Clamp a user-supplied compression level into the valid -1..=9 window.
#[must_use]
pub const fn clamp_level(level: i32) -> i32 {
    if level < -1 {
        -1
    } else if level > 9 {
        9
    } else {
        level
    }
}

fn flate_level(level: i32) -> Compression {
    match clamp_level(level) {
        -1 => Compression::default(),
        n => Compression::new(n as u32),
    }
}

/// Compress a buffer with zlib at the given level.
pub fn deflate(data: &[u8], level: i32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), flate_level(level));
    encoder
        .write_all(data)
        .map_err(|e| WirelineError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| WirelineError::Compression(e.to_string()))
}

/// Decompress a zlib buffer.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| WirelineError::Compression(e.to_string()))?;
    Ok(out)
}
