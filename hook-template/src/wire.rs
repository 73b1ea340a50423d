//! Wire layout for the shared-memory ring this hook writes into.
//!
//! Deliberately not shared with the profiler's own crate: the hook library
//! and the profiler are separate compilation units with no common
//! dependency, the same way the original hook library and its Python reader
//! were separate programs. Keep this in lockstep with `memhookd::ring`'s
//! consumer-side layout.

pub const BACKTRACE_CAPACITY: usize = 20;
pub const HEADER_SIZE: usize = 12;
pub const SLOT_SIZE: usize = 32 + BACKTRACE_CAPACITY * 8;

const _: () = assert!(SLOT_SIZE == 192);
const _: () = assert!(HEADER_SIZE == 12);

#[repr(C)]
pub struct RingHeader {
    pub head: u32,
    pub tail: u32,
    pub overflow_count: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct Event {
    pub address: u64,
    pub timestamp: u64,
    pub size: u32,
    pub backtrace_len: u32,
    pub kind: u32,
    pub _reserved: u32,
    pub backtrace: [u64; BACKTRACE_CAPACITY],
}

impl Event {
    pub const fn empty() -> Self {
        Event {
            address: 0,
            timestamp: 0,
            size: 0,
            backtrace_len: 0,
            kind: 0,
            _reserved: 0,
            backtrace: [0u64; BACKTRACE_CAPACITY],
        }
    }
}

pub mod kind {
    pub const MALLOC: u32 = 0;
    pub const NEW: u32 = 1;
    pub const NEW_ARRAY: u32 = 2;
    pub const NEW_NO_THROW: u32 = 3;
    pub const FREE: u32 = 4;
    pub const DELETE: u32 = 5;
    pub const DELETE_ARRAY: u32 = 6;
    pub const DELETE_NO_THROW: u32 = 7;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_occupies_exactly_one_slot() {
        assert_eq!(std::mem::size_of::<Event>(), SLOT_SIZE);
    }

    #[test]
    fn header_occupies_exactly_twelve_bytes() {
        assert_eq!(std::mem::size_of::<RingHeader>(), HEADER_SIZE);
    }

    #[test]
    fn empty_event_has_zeroed_backtrace_and_kind() {
        let event = Event::empty();
        assert_eq!(event.address, 0);
        assert_eq!(event.backtrace_len, 0);
        assert_eq!(event.backtrace, [0u64; BACKTRACE_CAPACITY]);
    }

    #[test]
    fn kind_constants_are_pairwise_distinct() {
        let all = [
            kind::MALLOC,
            kind::NEW,
            kind::NEW_ARRAY,
            kind::NEW_NO_THROW,
            kind::FREE,
            kind::DELETE,
            kind::DELETE_ARRAY,
            kind::DELETE_NO_THROW,
        ];
        for (i, a) in all.iter().enumerate() {
            for (j, b) in all.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
    }
}
