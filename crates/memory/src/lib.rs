//! Memory layer for Shale
//!
//! This crate owns every byte a loaded snapshot occupies:
//! - `BlobInput`: uniform random-access + sequential view over a blob file
//! - `MemoryMode`: how payload bytes become resident (heap copy vs mmap)
//! - `SegmentRecycler`: two-generation pool of reusable segment buffers
//! - `SegmentedByteArray` / `SegmentedLongArray`: logical arrays composed of
//!   power-of-two segments that are either non-owning views into a shared
//!   mapped region or recycler-owned buffers
//!
//! Ownership rule: a segmented array co-owns the mapped region through an
//! `Arc` handle; its segments are views into that region and are cleared
//! before the handle is dropped.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod blob_input;
mod byte_array;
mod long_array;
mod mode;
mod recycler;
mod segment;

pub use blob_input::BlobInput;
pub use byte_array::SegmentedByteArray;
pub use long_array::SegmentedLongArray;
pub use mode::MemoryMode;
pub use recycler::{
    SegmentRecycler, DEFAULT_LOG2_BYTE_SEGMENT_SIZE, DEFAULT_LOG2_LONG_SEGMENT_SIZE,
};
