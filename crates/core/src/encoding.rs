//! Wire encoding primitives
//!
//! Everything in a Shale blob is built from three encodings:
//!
//! - **varint**: little-endian base-128. 7 bits per byte, low group first,
//!   continuation flag in the high bit; the first byte with the high bit
//!   clear terminates the integer. Signed values ZigZag-encode first.
//! - **vstring**: varint byte length followed by UTF-8 bytes.
//! - **fixed-width**: little-endian `u32`/`u64`, used only in the blob
//!   header.
//!
//! Read-side failures on truncated input surface as
//! [`ShaleError::MalformedBlob`], never as a bare I/O error — a stream that
//! ends mid-integer is a framing defect, not a transport one.

use crate::error::{ShaleError, ShaleResult};
use std::io::{Read, Write};

/// Longest legal encoding of a `u64` (10 × 7 bits covers 64).
const MAX_VU64_BYTES: u32 = 10;

fn read_byte(input: &mut impl Read) -> ShaleResult<u8> {
    let mut buf = [0u8; 1];
    match input.read_exact(&mut buf) {
        Ok(()) => Ok(buf[0]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ShaleError::malformed("unexpected end of stream"))
        }
        Err(e) => Err(ShaleError::Io(e)),
    }
}

/// Read a varint-encoded `u64`.
pub fn read_vu64(input: &mut impl Read) -> ShaleResult<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for _ in 0..MAX_VU64_BYTES {
        let byte = read_byte(input)?;
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(ShaleError::malformed("varint exceeds 10 bytes"))
}

/// Read a varint-encoded `u32`.
pub fn read_vu32(input: &mut impl Read) -> ShaleResult<u32> {
    let value = read_vu64(input)?;
    u32::try_from(value).map_err(|_| ShaleError::malformed("varint exceeds u32 range"))
}

/// Read a ZigZag varint-encoded `i64`.
pub fn read_vi64(input: &mut impl Read) -> ShaleResult<i64> {
    Ok(zigzag_decode(read_vu64(input)?))
}

/// Read a varint length-prefixed UTF-8 string.
pub fn read_vstring(input: &mut impl Read) -> ShaleResult<String> {
    let len = read_vu32(input)? as usize;
    let mut bytes = vec![0u8; len];
    match input.read_exact(&mut bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ShaleError::malformed("string truncated"));
        }
        Err(e) => return Err(ShaleError::Io(e)),
    }
    String::from_utf8(bytes).map_err(|_| ShaleError::malformed("string is not valid UTF-8"))
}

/// Read a little-endian `u32`.
pub fn read_u32_le(input: &mut impl Read) -> ShaleResult<u32> {
    let mut buf = [0u8; 4];
    match input.read_exact(&mut buf) {
        Ok(()) => Ok(u32::from_le_bytes(buf)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ShaleError::malformed("unexpected end of stream"))
        }
        Err(e) => Err(ShaleError::Io(e)),
    }
}

/// Read a little-endian `u64`.
pub fn read_u64_le(input: &mut impl Read) -> ShaleResult<u64> {
    let mut buf = [0u8; 8];
    match input.read_exact(&mut buf) {
        Ok(()) => Ok(u64::from_le_bytes(buf)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ShaleError::malformed("unexpected end of stream"))
        }
        Err(e) => Err(ShaleError::Io(e)),
    }
}

/// Write a varint-encoded `u64`.
pub fn write_vu64(out: &mut impl Write, mut value: u64) -> std::io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            return out.write_all(&[byte]);
        }
        out.write_all(&[byte | 0x80])?;
    }
}

/// Write a varint-encoded `u32`.
pub fn write_vu32(out: &mut impl Write, value: u32) -> std::io::Result<()> {
    write_vu64(out, u64::from(value))
}

/// Write a ZigZag varint-encoded `i64`.
pub fn write_vi64(out: &mut impl Write, value: i64) -> std::io::Result<()> {
    write_vu64(out, zigzag_encode(value))
}

/// Write a varint length-prefixed UTF-8 string.
pub fn write_vstring(out: &mut impl Write, value: &str) -> std::io::Result<()> {
    write_vu32(out, value.len() as u32)?;
    out.write_all(value.as_bytes())
}

/// ZigZag-encode a signed integer so small magnitudes stay small.
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Deterministic ordinal hash used for set and map bucket placement.
///
/// Fibonacci multiplicative hash over the 64-bit golden ratio, folded to 32
/// bits. This is part of the wire format: producers place bucket entries
/// with the same function that readers probe with.
#[inline]
pub fn ordinal_hash(value: u32) -> u32 {
    (u64::from(value).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as u32
}
