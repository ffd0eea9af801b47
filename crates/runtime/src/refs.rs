//! Heap reference kinds.
//!
//! Every heap object starts with a [`RefHeader`]: the kind byte, a flags
//! byte carrying the GC mark bit, and the `next` link threading the object
//! into the allocator's global list. Concrete kinds are `#[repr(C)]` structs
//! with the header first, so any object can be inspected through a
//! `*mut RefHeader` and downcast once the kind is known. String and struct
//! payloads share the header's allocation and sit directly after it.
//!
//! Destruction happens only on the collector thread (or when the allocator
//! itself is dropped): [`destroy_ref`] dispatches on the kind to run the
//! right drop and release the right layout.

use crate::exec_state::ExecState;
use crate::process::ProcessRef;
use crate::stream::StreamRef;
use crate::value::Value;
use std::alloc::Layout;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU8, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RefKind {
    Struct = 0,
    Future = 1,
    String = 2,
    StringLink = 3,
    Long = 4,
    Atomic = 5,
    Stream = 6,
    Process = 7,
}

const GC_MARK: u8 = 1;

/// Common header of every heap object.
#[repr(C)]
pub struct RefHeader {
    next: AtomicPtr<RefHeader>,
    kind: RefKind,
    flags: AtomicU8,
}

impl RefHeader {
    pub(crate) fn new(kind: RefKind) -> RefHeader {
        RefHeader {
            next: AtomicPtr::new(std::ptr::null_mut()),
            kind,
            flags: AtomicU8::new(0),
        }
    }

    #[inline]
    pub fn kind(&self) -> RefKind {
        self.kind
    }

    #[inline]
    pub fn next(&self) -> *mut RefHeader {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_next(&self, next: *mut RefHeader) {
        self.next.store(next, Ordering::Release)
    }

    #[inline]
    pub(crate) fn next_atomic(&self) -> &AtomicPtr<RefHeader> {
        &self.next
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.flags.load(Ordering::Acquire) & GC_MARK != 0
    }

    #[inline]
    pub fn set_mark(&self) {
        self.flags.fetch_or(GC_MARK, Ordering::AcqRel);
    }

    #[inline]
    pub fn clear_mark(&self) {
        self.flags.fetch_and(!GC_MARK, Ordering::AcqRel);
    }
}

/// Immutable byte string. `data` points either at payload bytes placed after
/// the header in the same allocation (always null-terminated), or straight at
/// literal bytes owned by the executable image.
#[repr(C)]
pub struct StringRef {
    pub(crate) header: RefHeader,
    pub(crate) data: *const u8,
    pub(crate) size: u32,
    /// Payload bytes co-allocated after the header; 0 for literal-backed
    /// strings. Fixed at allocation time, the deallocation layout depends
    /// on it.
    pub(crate) payload_cap: u32,
}

impl StringRef {
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn data_ptr(&self) -> *const u8 {
        self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data, self.size as usize) }
    }

    /// Shrink after formatting into an over-sized payload.
    pub fn update_size(&mut self, size: u32) {
        debug_assert!(self.payload_cap == 0 || size <= self.payload_cap);
        self.size = size;
    }

    /// Mutable payload access; only valid for strings that own their payload.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        debug_assert!(self.payload_cap > 0 || self.size == 0);
        unsafe { std::slice::from_raw_parts_mut(self.data as *mut u8, self.payload_cap as usize) }
    }
}

/// Lazy concatenation node: `prev` is the chain so far (a string or another
/// link), `val` the appended piece (a string ref, or a single character as an
/// int scalar). The first observation collapses the chain into a flat string
/// and caches it; the stale chain pointers are cleared by the collector one
/// full pause later, when no mutator can still be reading them.
#[repr(C)]
pub struct StringLinkRef {
    pub(crate) header: RefHeader,
    prev: AtomicPtr<RefHeader>,
    val: AtomicU64,
    collapsed: AtomicPtr<StringRef>,
}

impl StringLinkRef {
    pub(crate) fn new(prev: *mut RefHeader, val: Value) -> StringLinkRef {
        debug_assert!(!prev.is_null());
        StringLinkRef {
            header: RefHeader::new(RefKind::StringLink),
            prev: AtomicPtr::new(prev),
            val: AtomicU64::new(val.raw()),
            collapsed: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    #[inline]
    pub fn prev(&self) -> *mut RefHeader {
        self.prev.load(Ordering::Acquire)
    }

    #[inline]
    pub fn val(&self) -> Value {
        Value::from_raw(self.val.load(Ordering::Acquire))
    }

    /// Size in bytes of this link's own piece.
    pub fn val_size(&self) -> u32 {
        let val = self.val();
        if val.is_ref() {
            unsafe { (*(val.ref_ptr() as *mut StringRef)).size() }
        } else {
            1 // A single character.
        }
    }

    #[inline]
    pub fn collapsed(&self) -> *mut StringRef {
        self.collapsed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_collapsed(&self) -> bool {
        !self.collapsed().is_null()
    }

    #[inline]
    pub fn set_collapsed(&self, flat: *mut StringRef) {
        self.collapsed.store(flat, Ordering::Release);
    }

    /// Drop the chain pointers. Only legal once a collapsed version exists
    /// and a full pause/resume separates us from any reader of the chain.
    pub(crate) fn clear_link(&self) {
        debug_assert!(self.is_collapsed());
        self.prev.store(std::ptr::null_mut(), Ordering::Release);
        self.val.store(Value::zero().raw(), Ordering::Release);
    }
}

/// Boxed negative int64 (non-negative ones are stored inline in the value).
#[repr(C)]
pub struct LongRef {
    pub(crate) header: RefHeader,
    pub(crate) val: i64,
}

impl LongRef {
    #[inline]
    pub fn val(&self) -> i64 {
        self.val
    }
}

/// Struct with `field_count` value fields placed after the header.
#[repr(C)]
pub struct StructRef {
    pub(crate) header: RefHeader,
    pub(crate) field_count: u8,
}

impl StructRef {
    #[inline]
    pub fn field_count(&self) -> u8 {
        self.field_count
    }

    #[inline]
    pub fn fields_ptr(&self) -> *mut Value {
        unsafe { (self as *const StructRef).add(1) as *mut Value }
    }

    #[inline]
    pub fn field(&self, index: u8) -> Value {
        debug_assert!(index < self.field_count);
        unsafe { *self.fields_ptr().add(index as usize) }
    }

    #[inline]
    pub fn set_field(&self, index: u8, value: Value) {
        debug_assert!(index < self.field_count);
        unsafe { *self.fields_ptr().add(index as usize) = value }
    }

    /// For closure structs the last field is the target instruction offset.
    #[inline]
    pub fn last_field(&self) -> Value {
        debug_assert!(self.field_count > 0);
        self.field(self.field_count - 1)
    }
}

/// Single-writer many-reader result cell for a forked executor.
///
/// `started` is the parent/child handshake: the child sets it (release) once
/// the entry arguments are copied and the future sits on its own stack; the
/// parent spins on it (acquire) before dropping the arguments. The result is
/// written before the state leaves `Running`; the state transition happens
/// under the mutex and notifies all waiters.
#[repr(C)]
pub struct FutureRef {
    pub(crate) header: RefHeader,
    started: AtomicBool,
    state: Mutex<ExecState>,
    cond: Condvar,
    result: AtomicU64,
}

impl FutureRef {
    pub(crate) fn new() -> FutureRef {
        FutureRef {
            header: RefHeader::new(RefKind::Future),
            started: AtomicBool::new(false),
            state: Mutex::new(ExecState::Running),
            cond: Condvar::new(),
            result: AtomicU64::new(Value::zero().raw()),
        }
    }

    #[inline]
    pub fn set_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    #[inline]
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn poll(&self) -> ExecState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until the state leaves `Running`.
    pub fn block(&self) -> ExecState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while *state == ExecState::Running {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        *state
    }

    /// Block up to `nanos`; true when the future resolved within the
    /// deadline.
    pub fn wait_nano(&self, nanos: i64) -> bool {
        let deadline = std::time::Duration::from_nanos(nanos.max(0) as u64);
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (state, _) = self
            .cond
            .wait_timeout_while(state, deadline, |s| *s == ExecState::Running)
            .unwrap_or_else(|e| e.into_inner());
        *state != ExecState::Running
    }

    #[inline]
    pub fn result(&self) -> Value {
        Value::from_raw(self.result.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_result(&self, result: Value) {
        self.result.store(result.raw(), Ordering::Release);
    }

    pub fn set_state_and_notify(&self, new_state: ExecState) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            *state = new_state;
        }
        self.cond.notify_all();
    }
}

/// Shared int32 with sequentially-consistent load and compare-and-swap.
#[repr(C)]
pub struct AtomicRef {
    pub(crate) header: RefHeader,
    val: AtomicI32,
}

impl AtomicRef {
    pub(crate) fn new(val: i32) -> AtomicRef {
        AtomicRef {
            header: RefHeader::new(RefKind::Atomic),
            val: AtomicI32::new(val),
        }
    }

    #[inline]
    pub fn load(&self) -> i32 {
        self.val.load(Ordering::SeqCst)
    }

    /// Returns the previous value, whether or not the swap happened.
    #[inline]
    pub fn compare_and_swap(&self, expected: i32, desired: i32) -> i32 {
        match self
            .val
            .compare_exchange(expected, desired, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(prev) => prev,
            Err(prev) => prev,
        }
    }
}

// Downcasts. Callers must have checked (or be able to guarantee) the kind.

#[inline]
pub unsafe fn downcast<T>(header: *mut RefHeader) -> *mut T {
    header as *mut T
}

#[inline]
pub unsafe fn get_string_ref(val: Value) -> *mut StringRef {
    let ptr = val.ref_ptr();
    debug_assert_eq!(unsafe { (*ptr).kind() }, RefKind::String);
    unsafe { downcast(ptr) }
}

#[inline]
pub unsafe fn get_struct_ref(val: Value) -> *mut StructRef {
    let ptr = val.ref_ptr();
    debug_assert_eq!(unsafe { (*ptr).kind() }, RefKind::Struct);
    unsafe { downcast(ptr) }
}

#[inline]
pub unsafe fn get_future_ref(val: Value) -> *mut FutureRef {
    let ptr = val.ref_ptr();
    debug_assert_eq!(unsafe { (*ptr).kind() }, RefKind::Future);
    unsafe { downcast(ptr) }
}

#[inline]
pub unsafe fn get_atomic_ref(val: Value) -> *mut AtomicRef {
    let ptr = val.ref_ptr();
    debug_assert_eq!(unsafe { (*ptr).kind() }, RefKind::Atomic);
    unsafe { downcast(ptr) }
}

#[inline]
pub unsafe fn get_stream_ref(val: Value) -> *mut StreamRef {
    let ptr = val.ref_ptr();
    debug_assert_eq!(unsafe { (*ptr).kind() }, RefKind::Stream);
    unsafe { downcast(ptr) }
}

#[inline]
pub unsafe fn get_process_ref(val: Value) -> *mut ProcessRef {
    let ptr = val.ref_ptr();
    debug_assert_eq!(unsafe { (*ptr).kind() }, RefKind::Process);
    unsafe { downcast(ptr) }
}

/// Read an int64 out of a value: inline when non-negative, boxed otherwise.
#[inline]
pub unsafe fn get_long(val: Value) -> i64 {
    if val.is_ref() {
        unsafe { (*(val.ref_ptr() as *mut LongRef)).val() }
    } else {
        val.as_pos_long()
    }
}

/// Allocation layout of the object behind `header`, matching what the
/// allocator requested for it.
pub(crate) unsafe fn layout_of(header: *mut RefHeader) -> Layout {
    unsafe {
        let (size, align) = match (*header).kind() {
            RefKind::Struct => {
                let fields = (*(header as *mut StructRef)).field_count() as usize;
                (
                    std::mem::size_of::<StructRef>() + fields * std::mem::size_of::<Value>(),
                    std::mem::align_of::<StructRef>(),
                )
            }
            RefKind::String => {
                let cap = (*(header as *mut StringRef)).payload_cap as usize;
                (
                    std::mem::size_of::<StringRef>() + cap,
                    std::mem::align_of::<StringRef>(),
                )
            }
            RefKind::StringLink => (
                std::mem::size_of::<StringLinkRef>(),
                std::mem::align_of::<StringLinkRef>(),
            ),
            RefKind::Long => (std::mem::size_of::<LongRef>(), std::mem::align_of::<LongRef>()),
            RefKind::Future => (
                std::mem::size_of::<FutureRef>(),
                std::mem::align_of::<FutureRef>(),
            ),
            RefKind::Atomic => (
                std::mem::size_of::<AtomicRef>(),
                std::mem::align_of::<AtomicRef>(),
            ),
            RefKind::Stream => (
                std::mem::size_of::<StreamRef>(),
                std::mem::align_of::<StreamRef>(),
            ),
            RefKind::Process => (
                std::mem::size_of::<ProcessRef>(),
                std::mem::align_of::<ProcessRef>(),
            ),
        };
        Layout::from_size_align_unchecked(size, align)
    }
}

/// Run the kind-specific destructor and free the backing memory. No vtables:
/// one dispatch table keeps the header at two words.
pub(crate) unsafe fn destroy_ref(header: *mut RefHeader) {
    unsafe {
        let layout = layout_of(header);
        match (*header).kind() {
            // Plain-data kinds need no drop, just the deallocation.
            RefKind::Struct | RefKind::String | RefKind::StringLink | RefKind::Long => {}
            RefKind::Future => std::ptr::drop_in_place(header as *mut FutureRef),
            RefKind::Atomic => std::ptr::drop_in_place(header as *mut AtomicRef),
            RefKind::Stream => std::ptr::drop_in_place(header as *mut StreamRef),
            RefKind::Process => std::ptr::drop_in_place(header as *mut ProcessRef),
        }
        std::alloc::dealloc(header as *mut u8, layout);
    }
}
