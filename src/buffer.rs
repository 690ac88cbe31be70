//! Buffer descriptors exchanged with the codec component.
//!
//! A [`BufferHandle`] describes a block of memory that lives somewhere else
//! (mapped by the driver or by a peer element). It carries fill state,
//! timing and flags, but never owns the payload: cloning a handle copies the
//! descriptor, not the memory.
//!
//! The identity of a handle is its [`BufferId`]. The same logical buffer may
//! be referenced by different wrapper objects on either side of the
//! component, so every lookup in this crate goes by id.

use std::fmt;
use std::time::Duration;

/// Identifier of a buffer, unique within one port's pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub u32);

impl BufferId {
    /// Index of this buffer in an id-indexed table.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for BufferId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Address of the memory backing a buffer.
///
/// Physical, bus or virtual depending on the driver; the bridge only compares it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BackingAddr(pub u64);

impl fmt::Display for BackingAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Opaque token tying a handle to the producer-side wrapper responsible for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnerToken(pub u64);

/// Flags carried by a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Last buffer of the stream.
    pub eos: bool,
    /// Buffer starts at a sync point (keyframe).
    pub sync_frame: bool,
    /// Buffer holds codec configuration data, not media.
    pub codec_config: bool,
    /// Buffer holds a single interlaced field.
    pub field_interlaced: bool,
    /// Buffer ends a complete frame.
    pub end_of_frame: bool,
    /// Decode but do not present.
    pub decode_only: bool,
    /// Data is known to be corrupt.
    pub data_corrupt: bool,
}

impl BufferFlags {
    /// Flags for an end-of-stream marker.
    pub fn eos() -> Self {
        Self {
            eos: true,
            ..Self::default()
        }
    }

    /// Whether no flag is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Descriptor for a buffer exchanged with the codec component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferHandle {
    /// Identity within the port's pool.
    pub id: BufferId,
    /// Address of the backing memory (owned elsewhere).
    pub backing: BackingAddr,
    /// Allocated length in bytes.
    pub alloc_len: usize,
    /// Number of valid bytes starting at `offset`.
    pub filled_len: usize,
    /// Byte offset of the valid data.
    pub offset: usize,
    /// Presentation timestamp.
    pub pts: Option<Duration>,
    /// Buffer flags.
    pub flags: BufferFlags,
    /// Producer-side wrapper currently responsible for the buffer.
    pub owner: Option<OwnerToken>,
}

impl BufferHandle {
    /// Create an empty descriptor.
    pub fn new(id: impl Into<BufferId>, backing: BackingAddr, alloc_len: usize) -> Self {
        Self {
            id: id.into(),
            backing,
            alloc_len,
            filled_len: 0,
            offset: 0,
            pts: None,
            flags: BufferFlags::default(),
            owner: None,
        }
    }

    /// Whether the filled region fits inside the allocation.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.offset
            .checked_add(self.filled_len)
            .is_some_and(|end| end <= self.alloc_len)
    }

    /// Byte range of the valid data.
    #[inline]
    pub fn data_range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.filled_len
    }

    /// Whether this buffer carries the end-of-stream flag.
    #[inline]
    pub fn is_eos(&self) -> bool {
        self.flags.eos
    }

    /// Mark `len` bytes as filled, starting at offset 0.
    pub fn set_filled(&mut self, len: usize) {
        self.offset = 0;
        self.filled_len = len;
    }

    /// Clear fill state, timing, flags and owner before reusing the buffer.
    pub fn reset(&mut self) {
        self.filled_len = 0;
        self.offset = 0;
        self.pts = None;
        self.flags = BufferFlags::default();
        self.owner = None;
    }

    /// Copy fill state, timing and flags from a handle returned by the driver.
    ///
    /// Identity, backing address and allocation are left untouched.
    pub fn copy_fill_from(&mut self, other: &BufferHandle) {
        self.filled_len = other.filled_len;
        self.offset = other.offset;
        self.pts = other.pts;
        self.flags = other.flags;
        self.owner = other.owner;
    }
}
