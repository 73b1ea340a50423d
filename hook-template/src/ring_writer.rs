//! Producer side of the shared-memory ring. Runs on whichever thread calls
//! the hooked allocator; must never block the target.

use crate::wire::{Event, RingHeader, HEADER_SIZE, SLOT_SIZE};
use std::ffi::CString;
use std::sync::atomic::{fence, Ordering};

pub struct RingWriter {
    header: *mut RingHeader,
    slots: *mut Event,
    capacity: u32,
}

unsafe impl Send for RingWriter {}
unsafe impl Sync for RingWriter {}

impl RingWriter {
    /// Create (or re-open) the named shared-memory object and size it for
    /// `capacity` records. Panics on failure: this runs once, at the first
    /// hooked call, and there is no sensible fallback for the hook.
    pub fn create(name: &str, capacity: u32) -> Self {
        let region_size = HEADER_SIZE + capacity as usize * SLOT_SIZE;
        let cname = CString::new(name).expect("shared memory name must not contain NUL");
        unsafe {
            let fd = libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o600,
            );
            if fd < 0 {
                panic!("shm_open({name}) failed");
            }
            if libc::ftruncate(fd, region_size as libc::off_t) != 0 {
                panic!("ftruncate({name}, {region_size}) failed");
            }
            let base = libc::mmap(
                std::ptr::null_mut(),
                region_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            if base == libc::MAP_FAILED {
                panic!("mmap({name}) failed");
            }
            libc::close(fd);
            let header = base as *mut RingHeader;
            std::ptr::write_volatile(header, RingHeader { head: 0, tail: 0, overflow_count: 0 });
            let slots = base.add(HEADER_SIZE) as *mut Event;
            RingWriter { header, slots, capacity }
        }
    }

    /// Write one record. Drops it and increments `overflow_count` if the
    /// ring is full rather than blocking the hooked thread.
    pub fn push(&self, event: Event) {
        unsafe {
            let tail = std::ptr::read_volatile(&(*self.header).tail);
            let head = std::ptr::read_volatile(&(*self.header).head);
            let next = (tail + 1) % self.capacity;
            if next == head {
                let overflow = std::ptr::read_volatile(&(*self.header).overflow_count);
                std::ptr::write_volatile(&mut (*self.header).overflow_count, overflow + 1);
                return;
            }
            std::ptr::write_volatile(self.slots.add(tail as usize), event);
            fence(Ordering::Release);
            std::ptr::write_volatile(&mut (*self.header).tail, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::kind;

    fn unique_name(case: &str) -> String {
        format!("/memhook_test_{case}_{}_{}", std::process::id(), line!())
    }

    fn event(address: u64) -> Event {
        Event {
            address,
            timestamp: 42,
            size: 64,
            backtrace_len: 0,
            kind: kind::MALLOC,
            _reserved: 0,
            backtrace: [0u64; crate::wire::BACKTRACE_CAPACITY],
        }
    }

    /// Reads raw header/slot state for assertions only; production code
    /// never peeks at its own ring, the consumer lives in `memhookd`.
    fn header(ring: &RingWriter) -> (u32, u32, u32) {
        unsafe {
            (
                std::ptr::read_volatile(&(*ring.header).head),
                std::ptr::read_volatile(&(*ring.header).tail),
                std::ptr::read_volatile(&(*ring.header).overflow_count),
            )
        }
    }

    fn slot(ring: &RingWriter, idx: u32) -> Event {
        unsafe { std::ptr::read_volatile(ring.slots.add(idx as usize)) }
    }

    #[test]
    fn push_writes_the_slot_before_advancing_tail() {
        let name = unique_name("push_order");
        let ring = RingWriter::create(&name, 4);
        ring.push(event(0xAAAA));
        let (head, tail, overflow) = header(&ring);
        assert_eq!(head, 0);
        assert_eq!(tail, 1);
        assert_eq!(overflow, 0);
        // The slot a reader would see at index 0 (tail's value before this
        // push) holds the pushed event, not a half-written one — the slot
        // write happens-before the tail publish via the release fence.
        assert_eq!(slot(&ring, 0).address, 0xAAAA);
        unsafe { libc::shm_unlink(CString::new(name).unwrap().as_ptr()) };
    }

    #[test]
    fn push_drops_and_counts_overflow_when_ring_is_full() {
        let name = unique_name("overflow");
        let capacity = 4;
        let ring = RingWriter::create(&name, capacity);
        // One slot is always kept empty to distinguish full from empty, so
        // `capacity - 1` pushes fill the ring.
        for i in 0..(capacity - 1) {
            ring.push(event(i as u64));
        }
        let (head, tail, overflow) = header(&ring);
        assert_eq!(head, 0);
        assert_eq!(tail, capacity - 1);
        assert_eq!(overflow, 0);

        // The ring is now full: this push must be dropped, not overwrite
        // the oldest unread slot.
        ring.push(event(0xDEAD));
        let (head_after, tail_after, overflow_after) = header(&ring);
        assert_eq!(head_after, head);
        assert_eq!(tail_after, tail);
        assert_eq!(overflow_after, 1);
        assert_ne!(slot(&ring, 0).address, 0xDEAD);

        unsafe { libc::shm_unlink(CString::new(name).unwrap().as_ptr()) };
    }

    #[test]
    fn repeated_overflow_keeps_incrementing_the_counter() {
        let name = unique_name("repeated_overflow");
        let capacity = 2;
        let ring = RingWriter::create(&name, capacity);
        ring.push(event(1));
        ring.push(event(2));
        ring.push(event(3));
        let (_, _, overflow) = header(&ring);
        assert_eq!(overflow, 2);
        unsafe { libc::shm_unlink(CString::new(name).unwrap().as_ptr()) };
    }
}
