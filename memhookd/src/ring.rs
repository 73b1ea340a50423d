//! Shared-Memory Ring (component E), consumer side. Grounded on the
//! teacher's `runtime::sequencer` for the mmap + volatile-read shape, and on
//! the original prototype's `shared_buffer.py` for the head/tail protocol —
//! unified here into the single ring spec.md's data model describes.

use crate::errors::HookError;
use memhook_common::{Event, RingHeader, HEADER_SIZE, SLOT_SIZE};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::os::fd::AsRawFd;

pub struct RingConsumer {
    mmap: MmapMut,
    capacity: u32,
}

unsafe impl Send for RingConsumer {}

impl RingConsumer {
    /// Opens the named POSIX shared-memory object (already sized by the
    /// injected library's constructor) and maps it read-write so `head` can
    /// be published back.
    pub fn open(name: &str, capacity: u32) -> Result<Self, HookError> {
        let path = format!("/dev/shm{name}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| HookError::SharedMemoryOpen {
                name: name.to_string(),
                reason: format!("open({path}) failed: {e}"),
            })?;
        let region_size = HEADER_SIZE + capacity as usize * SLOT_SIZE;
        let mmap = unsafe {
            MmapOptions::new()
                .len(region_size)
                .map_mut(&file)
                .map_err(|e| HookError::SharedMemoryOpen {
                    name: name.to_string(),
                    reason: format!("mmap({path}) failed: {e}"),
                })?
        };
        let _ = file.as_raw_fd();
        Ok(Self { mmap, capacity })
    }

    fn header_ptr(&self) -> *mut RingHeader {
        self.mmap.as_ptr() as *mut RingHeader
    }

    fn slot_ptr(&self, index: u32) -> *const Event {
        unsafe {
            self.mmap
                .as_ptr()
                .add(HEADER_SIZE + index as usize * SLOT_SIZE) as *const Event
        }
    }

    fn read_head(&self) -> u32 {
        unsafe { std::ptr::read_volatile(&(*self.header_ptr()).head) }
    }

    fn read_tail(&self) -> u32 {
        unsafe { std::ptr::read_volatile(&(*self.header_ptr()).tail) }
    }

    pub fn overflow_count(&self) -> u32 {
        unsafe { std::ptr::read_volatile(&(*self.header_ptr()).overflow_count) }
    }

    fn publish_head(&self, head: u32) {
        unsafe { std::ptr::write_volatile(&mut (*self.header_ptr()).head, head) };
    }

    /// Drains every record currently between `head` and `tail`, handing
    /// each to `on_event`, then publishes the advanced `head`. A corrupt
    /// slot (`backtrace_len` out of range or unknown `kind`) is skipped and
    /// reported through `on_corruption` rather than aborting the drain.
    pub fn drain(&self, mut on_event: impl FnMut(Event), mut on_corruption: impl FnMut(u32)) -> u32 {
        let tail = self.read_tail();
        let mut head = self.read_head();
        let mut drained = 0u32;
        while head != tail {
            let event = unsafe { std::ptr::read_volatile(self.slot_ptr(head)) };
            if !event.has_valid_backtrace_len() || event.decoded_kind().is_err() {
                on_corruption(head);
            } else {
                on_event(event);
            }
            head = (head + 1) % self.capacity;
            drained += 1;
        }
        self.publish_head(head);
        drained
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
