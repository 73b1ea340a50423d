//! Injected allocator hook library.
//!
//! This file is a template: every `<<<NAME>>>` token below is substituted by
//! the Template Renderer before the crate is compiled. Left unsubstituted it
//! is not valid Rust — that is intentional, this crate is never built in
//! place, only after rendering into a scratch copy.

mod backtrace_fast;
mod ring_writer;
mod wire;

use ring_writer::RingWriter;
use std::cell::Cell;
use std::ffi::{c_void, CString};
use std::sync::OnceLock;
use wire::{kind, Event};

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

static RING: OnceLock<RingWriter> = OnceLock::new();

/// Creates the shared-memory region as soon as the library is loaded into
/// the target, before any hooked allocator call can run. A lazily-created
/// ring would mean the profiler's consumer side races the target's first
/// allocation to see the region at all.
#[ctor::ctor]
fn init_ring() {
    RING.set(<<<BUFFER_CONSTRUCTOR>>>)
        .unwrap_or_else(|_| panic!("ring constructor ran twice"));
}

fn ring() -> &'static RingWriter {
    RING.get().expect("init_ring runs at library load, before any hook can fire")
}

#[inline(always)]
fn passes_size_range(size: usize) -> bool {
    <<<SIZE_RANGE_FILTER>>>
}

#[inline(always)]
fn passes_exact_size(size: usize) -> bool {
    <<<EXACT_SIZE_FILTER>>>
}

#[inline(always)]
fn capture_backtrace() -> ([u64; wire::BACKTRACE_CAPACITY], u32) {
    <<<BACKTRACE_METHOD>>>
}

#[inline(always)]
fn capture_timestamp() -> u64 {
    <<<TIMESTAMP_METHOD>>>
}

#[inline(always)]
fn emit(address: u64, size: u32, kind: u32) {
    let (backtrace, backtrace_len) = capture_backtrace();
    ring().push(Event {
        address,
        timestamp: capture_timestamp(),
        size,
        backtrace_len,
        kind,
        _reserved: 0,
        backtrace,
    });
}

/// Runs `body` with hook reentrancy disabled for this thread, so that any
/// allocation the hook itself performs (timestamping, unwinding) does not
/// recurse back into the hook.
#[inline(always)]
fn guarded<F: FnOnce()>(body: F) {
    let already_in_hook = IN_HOOK.with(|flag| flag.replace(true));
    if !already_in_hook {
        body();
    }
    IN_HOOK.with(|flag| flag.set(already_in_hook));
}

fn resolve_real(symbol: &str) -> *mut c_void {
    let cname = CString::new(symbol).expect("symbol name must not contain NUL");
    unsafe { libc::dlsym(libc::RTLD_NEXT, cname.as_ptr()) }
}

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);

fn real_malloc() -> MallocFn {
    static REAL: OnceLock<usize> = OnceLock::new();
    let addr = *REAL.get_or_init(|| resolve_real("malloc") as usize);
    unsafe { std::mem::transmute::<usize, MallocFn>(addr) }
}

fn real_free() -> FreeFn {
    static REAL: OnceLock<usize> = OnceLock::new();
    let addr = *REAL.get_or_init(|| resolve_real("free") as usize);
    unsafe { std::mem::transmute::<usize, FreeFn>(addr) }
}

/// Replacement for `malloc`.
#[unsafe(no_mangle)]
pub extern "C" fn hook_malloc(size: usize) -> *mut c_void {
    let ptr = unsafe { real_malloc()(size) };
    if !ptr.is_null() && passes_size_range(size) && passes_exact_size(size) {
        guarded(|| emit(ptr as u64, size as u32, kind::MALLOC));
    }
    ptr
}

/// Replacement for `free`.
#[unsafe(no_mangle)]
pub extern "C" fn hook_free(ptr: *mut c_void) {
    if !ptr.is_null() {
        guarded(|| emit(ptr as u64, 0, kind::FREE));
    }
    unsafe { real_free()(ptr) }
}

/// Replacement for `operator new(size_t)` (mangled `_Znwm`).
#[unsafe(no_mangle)]
pub extern "C" fn hook_znwm(size: usize) -> *mut c_void {
    let ptr = unsafe { real_malloc()(size) };
    if !ptr.is_null() && passes_size_range(size) && passes_exact_size(size) {
        guarded(|| emit(ptr as u64, size as u32, kind::NEW));
    }
    ptr
}

/// Replacement for `operator new[](size_t)` (mangled `_Znam`).
#[unsafe(no_mangle)]
pub extern "C" fn hook_znam(size: usize) -> *mut c_void {
    let ptr = unsafe { real_malloc()(size) };
    if !ptr.is_null() && passes_size_range(size) && passes_exact_size(size) {
        guarded(|| emit(ptr as u64, size as u32, kind::NEW_ARRAY));
    }
    ptr
}

/// Replacement for `operator new(size_t, const std::nothrow_t&)`.
#[unsafe(no_mangle)]
pub extern "C" fn hook_znwm_nothrow(size: usize) -> *mut c_void {
    let ptr = unsafe { real_malloc()(size) };
    if !ptr.is_null() && passes_size_range(size) && passes_exact_size(size) {
        guarded(|| emit(ptr as u64, size as u32, kind::NEW_NO_THROW));
    }
    ptr
}

/// Replacement for `operator delete(void*)` (mangled `_ZdlPv`).
#[unsafe(no_mangle)]
pub extern "C" fn hook_zdlpv(ptr: *mut c_void) {
    if !ptr.is_null() {
        guarded(|| emit(ptr as u64, 0, kind::DELETE));
    }
    unsafe { real_free()(ptr) }
}

/// Replacement for `operator delete(void*, size_t)` (mangled `_ZdlPvm`).
#[unsafe(no_mangle)]
pub extern "C" fn hook_zdlpvm(ptr: *mut c_void, _size: usize) {
    if !ptr.is_null() {
        guarded(|| emit(ptr as u64, 0, kind::DELETE));
    }
    unsafe { real_free()(ptr) }
}

/// Replacement for `operator delete[](void*)` (mangled `_ZdaPv`).
#[unsafe(no_mangle)]
pub extern "C" fn hook_zdapv(ptr: *mut c_void) {
    if !ptr.is_null() {
        guarded(|| emit(ptr as u64, 0, kind::DELETE_ARRAY));
    }
    unsafe { real_free()(ptr) }
}

/// Replacement for `operator delete[](void*, size_t)` (mangled `_ZdaPvm`).
#[unsafe(no_mangle)]
pub extern "C" fn hook_zdapvm(ptr: *mut c_void, _size: usize) {
    if !ptr.is_null() {
        guarded(|| emit(ptr as u64, 0, kind::DELETE_ARRAY));
    }
    unsafe { real_free()(ptr) }
}

/// Replacement for `operator delete(void*, const std::nothrow_t&)`.
#[unsafe(no_mangle)]
pub extern "C" fn hook_zdlpv_nothrow(ptr: *mut c_void) {
    if !ptr.is_null() {
        guarded(|| emit(ptr as u64, 0, kind::DELETE_NO_THROW));
    }
    unsafe { real_free()(ptr) }
}
