//! Blob header framing.
//!
//! Every snapshot and delta blob opens with the same header:
//!
//! ```text
//! magic      : u32 LE   "SHLB"
//! version    : u32 LE   format version
//! origin     : u64 LE   randomized tag of the originating state (0 = snapshot)
//! dest       : u64 LE   randomized tag of the resulting state
//! tag_count  : varint
//! tags       : tag_count × (key vstring, value vstring)
//! ```
//!
//! A delta's origin tag must equal the engine's current randomized tag;
//! ingesting either blob kind replaces the engine's tag with the header's
//! destination tag. That check belongs to the blob reader — this module
//! only parses and validates the framing.

use shale_core::encoding::{read_u32_le, read_u64_le, read_vstring, read_vu32};
use shale_core::{ShaleError, ShaleResult};
use shale_memory::BlobInput;
use std::collections::BTreeMap;
use tracing::debug;

/// Magic prefix of every Shale blob ("SHLB", little-endian).
pub const BLOB_MAGIC: u32 = u32::from_le_bytes(*b"SHLB");

/// Current blob format version.
pub const BLOB_FORMAT_VERSION: u32 = 1;

/// Oldest format version this reader accepts.
pub const MIN_SUPPORTED_FORMAT_VERSION: u32 = 1;

/// Parsed blob header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    /// Blob format version.
    pub version: u32,
    /// Randomized tag of the state this blob originates from (0 for a
    /// snapshot).
    pub origin_randomized_tag: u64,
    /// Randomized tag of the state this blob produces.
    pub destination_randomized_tag: u64,
    /// Free-form key/value tags attached by the producer.
    pub tags: BTreeMap<String, String>,
}

/// Read and validate a blob header from the input's current position.
pub fn read_header(input: &mut BlobInput) -> ShaleResult<BlobHeader> {
    let magic = read_u32_le(input)?;
    if magic != BLOB_MAGIC {
        return Err(ShaleError::malformed(format!(
            "bad blob magic {magic:#010x}"
        )));
    }
    let version = read_u32_le(input)?;
    if !(MIN_SUPPORTED_FORMAT_VERSION..=BLOB_FORMAT_VERSION).contains(&version) {
        return Err(ShaleError::UnsupportedVersion {
            version,
            min: MIN_SUPPORTED_FORMAT_VERSION,
            max: BLOB_FORMAT_VERSION,
        });
    }
    let origin_randomized_tag = read_u64_le(input)?;
    let destination_randomized_tag = read_u64_le(input)?;
    let tag_count = read_vu32(input)?;
    let mut tags = BTreeMap::new();
    for _ in 0..tag_count {
        let key = read_vstring(input)?;
        let value = read_vstring(input)?;
        tags.insert(key, value);
    }
    debug!(
        version,
        origin = format_args!("{origin_randomized_tag:#018x}"),
        dest = format_args!("{destination_randomized_tag:#018x}"),
        tag_count,
        "blob header accepted"
    );
    Ok(BlobHeader {
        version,
        origin_randomized_tag,
        destination_randomized_tag,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SnapshotBuilder;
    use shale_memory::MemoryMode;
    use std::io::Write;

    fn open(bytes: &[u8]) -> (BlobInput, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        let input = BlobInput::open(file.path(), MemoryMode::SharedMemoryLazy).unwrap();
        (input, file)
    }

    #[test]
    fn test_header_roundtrip() {
        let blob = SnapshotBuilder::new()
            .destination_tag(0xDEAD_BEEF)
            .header_tag("producer", "test")
            .build();
        let (mut input, _file) = open(&blob);

        let header = read_header(&mut input).unwrap();
        assert_eq!(header.version, BLOB_FORMAT_VERSION);
        assert_eq!(header.origin_randomized_tag, 0);
        assert_eq!(header.destination_randomized_tag, 0xDEAD_BEEF);
        assert_eq!(header.tags.get("producer").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_bad_magic_is_malformed() {
        let mut blob = SnapshotBuilder::new().build();
        blob[0] = b'X';
        let (mut input, _file) = open(&blob);

        let err = read_header(&mut input).unwrap_err();
        assert!(matches!(err, ShaleError::MalformedBlob { .. }));
    }

    #[test]
    fn test_version_outside_range_is_unsupported() {
        let blob = SnapshotBuilder::new().format_version(99).build();
        let (mut input, _file) = open(&blob);

        let err = read_header(&mut input).unwrap_err();
        assert!(matches!(
            err,
            ShaleError::UnsupportedVersion {
                version: 99,
                min: 1,
                max: 1
            }
        ));
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let blob = SnapshotBuilder::new().build();
        let (mut input, _file) = open(&blob[..10]);

        let err = read_header(&mut input).unwrap_err();
        assert!(matches!(err, ShaleError::MalformedBlob { .. }));
    }
}
