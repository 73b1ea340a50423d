//! Wire format shared between the injected hook library and the profiler.
//!
//! Every type here is `#[repr(C)]` and `Pod` so it can be read and written
//! directly against a memory-mapped shared-memory region without a parsing
//! pass.

use bytemuck::{Pod, Zeroable};

/// Maximum number of return-address words carried by one event.
pub const BACKTRACE_CAPACITY: usize = 20;

/// Size in bytes of the fixed prefix of an [`Event`] (everything before the
/// backtrace array).
pub const EVENT_PREFIX_SIZE: usize = 32;

/// Size in bytes of one ring slot: prefix plus the full backtrace capacity.
pub const SLOT_SIZE: usize = EVENT_PREFIX_SIZE + BACKTRACE_CAPACITY * 8;

/// Size in bytes of the ring header that precedes the slot array.
pub const HEADER_SIZE: usize = 12;

const _: () = assert!(SLOT_SIZE == 192);
const _: () = assert!(HEADER_SIZE == 12);

/// Closed set of allocation/free discriminants carried in [`Event::kind`].
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Kind {
    Malloc = 0,
    New = 1,
    NewArray = 2,
    NewNoThrow = 3,
    Free = 4,
    Delete = 5,
    DeleteArray = 6,
    DeleteNoThrow = 7,
}

/// Raw discriminant did not correspond to a known [`Kind`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownKind(pub u32);

impl std::fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event kind discriminant {}", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl TryFrom<u32> for Kind {
    type Error = UnknownKind;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Kind::Malloc),
            1 => Ok(Kind::New),
            2 => Ok(Kind::NewArray),
            3 => Ok(Kind::NewNoThrow),
            4 => Ok(Kind::Free),
            5 => Ok(Kind::Delete),
            6 => Ok(Kind::DeleteArray),
            7 => Ok(Kind::DeleteNoThrow),
            other => Err(UnknownKind(other)),
        }
    }
}

impl From<Kind> for u32 {
    fn from(kind: Kind) -> u32 {
        kind as u32
    }
}

impl Kind {
    /// True for the four allocation-kind discriminants.
    pub fn is_allocation(self) -> bool {
        matches!(self, Kind::Malloc | Kind::New | Kind::NewArray | Kind::NewNoThrow)
    }

    /// True for the four free-kind discriminants.
    pub fn is_free(self) -> bool {
        !self.is_allocation()
    }
}

/// One wire record: a fixed 32-byte prefix followed by up to
/// [`BACKTRACE_CAPACITY`] return-address words. Occupies exactly
/// [`SLOT_SIZE`] bytes in the ring regardless of `backtrace_len`; slots
/// beyond `backtrace_len` are undefined and must not be read.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct Event {
    pub address: u64,
    pub timestamp: u64,
    pub size: u32,
    pub backtrace_len: u32,
    pub kind: u32,
    _reserved: u32,
    pub backtrace: [u64; BACKTRACE_CAPACITY],
}

const _: () = assert!(std::mem::size_of::<Event>() == SLOT_SIZE);
const _: () = assert!(std::mem::align_of::<Event>() <= 8);

impl Event {
    /// Construct a new record, clamping `backtrace` to
    /// [`BACKTRACE_CAPACITY`] entries if the caller supplied more.
    pub fn new(address: u64, timestamp: u64, size: u32, kind: Kind, backtrace: &[u64]) -> Self {
        let len = backtrace.len().min(BACKTRACE_CAPACITY);
        let mut frames = [0u64; BACKTRACE_CAPACITY];
        frames[..len].copy_from_slice(&backtrace[..len]);
        Event {
            address,
            timestamp,
            size,
            backtrace_len: len as u32,
            kind: kind as u32,
            _reserved: 0,
            backtrace: frames,
        }
    }

    /// Decode the raw `kind` discriminant. A ring consumer that gets
    /// `Err` here has found a corrupt slot and must skip it (see
    /// `RingCorruption` in the error taxonomy).
    pub fn decoded_kind(&self) -> Result<Kind, UnknownKind> {
        Kind::try_from(self.kind)
    }

    /// The valid prefix of `backtrace`, per `backtrace_len`. Empty if
    /// `backtrace_len` is out of range (corrupt slot).
    pub fn backtrace(&self) -> &[u64] {
        if self.backtrace_len as usize > BACKTRACE_CAPACITY {
            &[]
        } else {
            &self.backtrace[..self.backtrace_len as usize]
        }
    }

    /// True if `backtrace_len` is within the valid range `[0, 20]`.
    pub fn has_valid_backtrace_len(&self) -> bool {
        self.backtrace_len as usize <= BACKTRACE_CAPACITY
    }
}

/// The 12-byte header at offset 0 of the shared-memory ring.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct RingHeader {
    pub head: u32,
    pub tail: u32,
    pub overflow_count: u32,
}

const _: () = assert!(std::mem::size_of::<RingHeader>() == HEADER_SIZE);

impl RingHeader {
    pub const fn zeroed() -> Self {
        RingHeader {
            head: 0,
            tail: 0,
            overflow_count: 0,
        }
    }
}

/// Total shared-memory region size for a ring of `capacity` records.
pub const fn region_size(capacity: u32) -> usize {
    HEADER_SIZE + capacity as usize * SLOT_SIZE
}

/// Largest capacity (in records) that fits in `byte_size` bytes, per
/// `(file_size - 12) / 192`.
pub const fn capacity_for_bytes(byte_size: usize) -> u32 {
    if byte_size < HEADER_SIZE {
        0
    } else {
        ((byte_size - HEADER_SIZE) / SLOT_SIZE) as u32
    }
}
