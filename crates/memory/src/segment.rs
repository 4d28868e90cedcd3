//! A single segment of a segmented array.

use memmap2::Mmap;
use std::sync::Arc;

/// One power-of-two-sized slice of a segmented array's backing bytes.
///
/// `Mapped` segments are non-owning views into a shared mapped region; the
/// owning handle lives on the array itself and outlives every view.
/// `Owned` segments come from the recycler pool and back the on-heap mode.
pub(crate) enum Segment {
    /// View into a shared mapped region.
    Mapped {
        region: Arc<Mmap>,
        offset: usize,
        len: usize,
    },
    /// Recycler-owned buffer.
    Owned(Box<[u8]>),
}

impl Segment {
    /// The bytes this segment addresses.
    #[inline]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            Segment::Mapped {
                region,
                offset,
                len,
            } => &region[*offset..*offset + *len],
            Segment::Owned(buf) => buf,
        }
    }
}
