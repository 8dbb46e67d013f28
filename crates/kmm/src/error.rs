//! Memory-management error type.

use core::fmt;

/// Errors produced by the physical allocator, page table walker, or VMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// No physical frames remain.
    OutOfMemory,
    /// No usable region large enough to host the frame bitmap.
    NoBitmapRegion,
    /// A frame or address argument was out of range for this allocator.
    InvalidFrame,
    /// An address was not aligned as the operation required.
    Unaligned,
    /// The virtual address has no mapping.
    NotMapped,
    /// The virtual address is already mapped.
    AlreadyMapped,
    /// No free swap slot remains.
    SwapFull,
    /// The page table entry does not describe a swapped-out page.
    NotSwapped,
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OutOfMemory => "out of physical memory",
            Self::NoBitmapRegion => "no region large enough for frame bitmap",
            Self::InvalidFrame => "invalid frame",
            Self::Unaligned => "address not page-aligned",
            Self::NotMapped => "address not mapped",
            Self::AlreadyMapped => "address already mapped",
            Self::SwapFull => "swap device full",
            Self::NotSwapped => "page table entry is not a swap entry",
        };
        f.write_str(msg)
    }
}

/// Convenience alias for `Result<T, MmError>`.
pub type Result<T> = core::result::Result<T, MmError>;
