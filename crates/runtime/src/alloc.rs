//! Reference allocator.
//!
//! Owns the global singly-linked list of live heap objects. Allocation makes
//! one backing allocation for header plus payload, then prepends the object
//! to the list with a CAS loop so executors on any thread can allocate
//! concurrently. The collector is the only component that frees: it walks
//! the list behind a snapshot of the head and unlinks what the mark phase
//! did not reach.
//!
//! Allocation byte counts feed the GC pacer so collection frequency tracks
//! allocation pressure.

use crate::gc::GcPacer;
use crate::process::ProcessRef;
use crate::refs::{
    AtomicRef, FutureRef, LongRef, RefHeader, RefKind, StringLinkRef, StringRef, StructRef,
    destroy_ref,
};
use crate::stream::{StreamRef, StreamSource};
use crate::value::Value;
use std::alloc::Layout;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicPtr, Ordering};

pub struct RefAllocator {
    head: AtomicPtr<RefHeader>,
    pacer: OnceLock<Arc<GcPacer>>,
}

// The raw list pointers are only mutated through atomics (allocation) or by
// the single collector thread (sweep), per the pause protocol.
unsafe impl Send for RefAllocator {}
unsafe impl Sync for RefAllocator {}

impl RefAllocator {
    pub fn new() -> RefAllocator {
        RefAllocator {
            head: AtomicPtr::new(std::ptr::null_mut()),
            pacer: OnceLock::new(),
        }
    }

    /// Wire the GC pacer. Must happen before the first allocation.
    pub(crate) fn set_pacer(&self, pacer: Arc<GcPacer>) {
        debug_assert!(self.head.load(Ordering::Acquire).is_null());
        let _ = self.pacer.set(pacer);
    }

    /// Allocate a string owning `size` payload bytes (plus a null
    /// terminator). The payload is uninitialized; callers fill it and may
    /// shrink with `update_size`.
    pub fn alloc_str(&self, size: u32) -> Option<*mut StringRef> {
        let extra = size as usize + 1;
        let ptr = self.alloc_obj(
            StringRef {
                header: RefHeader::new(RefKind::String),
                data: std::ptr::null(),
                size,
                payload_cap: extra as u32,
            },
            extra,
        )?;
        unsafe {
            let payload = ptr.add(1) as *mut u8;
            *payload.add(size as usize) = 0;
            (*ptr).data = payload;
        }
        Some(ptr)
    }

    /// Allocate a string whose data points at literal bytes owned by the
    /// executable image; no copy is made.
    ///
    /// # Safety
    /// `data` must stay valid for the lifetime of the VM context (literal
    /// tables do, they live in the shared executable).
    pub unsafe fn alloc_str_lit(&self, data: *const u8, size: u32) -> Option<*mut StringRef> {
        self.alloc_obj(
            StringRef {
                header: RefHeader::new(RefKind::String),
                data,
                size,
                payload_cap: 0,
            },
            0,
        )
    }

    /// Allocate a string and copy `bytes` into it.
    pub fn alloc_str_from(&self, bytes: &[u8]) -> Option<*mut StringRef> {
        let ptr = self.alloc_str(bytes.len() as u32)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), (*ptr).data as *mut u8, bytes.len());
        }
        Some(ptr)
    }

    pub fn alloc_str_link(&self, prev: *mut RefHeader, val: Value) -> Option<*mut StringLinkRef> {
        self.alloc_obj(StringLinkRef::new(prev, val), 0)
    }

    pub fn alloc_long(&self, val: i64) -> Option<*mut LongRef> {
        self.alloc_obj(
            LongRef {
                header: RefHeader::new(RefKind::Long),
                val,
            },
            0,
        )
    }

    /// Allocate a struct with `field_count` zero-cleared fields after the
    /// header.
    pub fn alloc_struct(&self, field_count: u8) -> Option<*mut StructRef> {
        let extra = field_count as usize * std::mem::size_of::<Value>();
        let ptr = self.alloc_obj(
            StructRef {
                header: RefHeader::new(RefKind::Struct),
                field_count,
            },
            extra,
        )?;
        unsafe {
            std::ptr::write_bytes((*ptr).fields_ptr() as *mut u8, 0, extra);
        }
        Some(ptr)
    }

    pub fn alloc_future(&self) -> Option<*mut FutureRef> {
        self.alloc_obj(FutureRef::new(), 0)
    }

    pub fn alloc_atomic(&self, val: i32) -> Option<*mut AtomicRef> {
        self.alloc_obj(AtomicRef::new(val), 0)
    }

    pub fn alloc_stream(&self, source: StreamSource) -> Option<*mut StreamRef> {
        self.alloc_obj(StreamRef::new(source), 0)
    }

    pub fn alloc_process(&self, process: ProcessRef) -> Option<*mut ProcessRef> {
        self.alloc_obj(process, 0)
    }

    /// Head of the allocation list (newest object).
    pub fn head_alloc(&self) -> *mut RefHeader {
        self.head.load(Ordering::Acquire)
    }

    pub fn next_alloc(&self, header: *mut RefHeader) -> *mut RefHeader {
        unsafe { (*header).next() }
    }

    /// Unlink and destroy the object after `prev`, returning the new
    /// successor. Collector-thread only; races with nothing because sweeping
    /// stays strictly behind the head snapshot.
    pub(crate) unsafe fn free_next(&self, prev: *mut RefHeader) -> *mut RefHeader {
        unsafe {
            let to_free = (*prev).next();
            if to_free.is_null() {
                return std::ptr::null_mut();
            }
            let next = (*to_free).next();
            (*prev).set_next(next);
            destroy_ref(to_free);
            next
        }
    }

    /// Number of live allocations; walks the list, test/diagnostic use.
    pub fn alloc_count(&self) -> usize {
        let mut count = 0;
        let mut cur = self.head_alloc();
        while !cur.is_null() {
            count += 1;
            cur = self.next_alloc(cur);
        }
        count
    }

    fn alloc_obj<T>(&self, value: T, extra: usize) -> Option<*mut T> {
        let size = std::mem::size_of::<T>() + extra;
        let layout = Layout::from_size_align(size, std::mem::align_of::<T>()).ok()?;
        let ptr = unsafe { std::alloc::alloc(layout) } as *mut T;
        if ptr.is_null() {
            return None;
        }
        unsafe { ptr.write(value) };
        self.link(ptr as *mut RefHeader, size);
        Some(ptr)
    }

    fn link(&self, header: *mut RefHeader, bytes: usize) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*header).set_next(head) };
            match self
                .head
                .compare_exchange_weak(head, header, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => head = observed,
            }
        }
        if let Some(pacer) = self.pacer.get() {
            pacer.notify_alloc(bytes);
        }
    }
}

impl Default for RefAllocator {
    fn default() -> RefAllocator {
        RefAllocator::new()
    }
}

impl Drop for RefAllocator {
    fn drop(&mut self) {
        // No allocations can be in flight once the allocator is dropped; the
        // GC thread and all executors hold strong context references.
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let next = unsafe { (*cur).next() };
            unsafe { destroy_ref(cur) };
            cur = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_linked_newest_first() {
        let alloc = RefAllocator::new();
        let a = alloc.alloc_long(-1).unwrap();
        let b = alloc.alloc_long(-2).unwrap();

        let head = alloc.head_alloc();
        assert_eq!(head, b as *mut RefHeader);
        assert_eq!(alloc.next_alloc(head), a as *mut RefHeader);
        assert!(alloc.next_alloc(a as *mut RefHeader).is_null());
        assert_eq!(alloc.alloc_count(), 2);
    }

    #[test]
    fn strings_are_null_terminated_and_sized() {
        let alloc = RefAllocator::new();
        let s = alloc.alloc_str_from(b"hello").unwrap();
        unsafe {
            assert_eq!((*s).size(), 5);
            assert_eq!((*s).as_bytes(), b"hello");
            assert_eq!(*(*s).data_ptr().add(5), 0);
        }
    }

    #[test]
    fn struct_fields_start_zeroed() {
        let alloc = RefAllocator::new();
        let st = alloc.alloc_struct(4).unwrap();
        unsafe {
            for i in 0..4 {
                assert_eq!((*st).field(i).raw(), 0);
            }
            (*st).set_field(2, Value::int(9));
            assert_eq!((*st).field(2).as_int(), 9);
        }
    }

    #[test]
    fn free_next_unlinks_and_keeps_list_intact() {
        let alloc = RefAllocator::new();
        let _a = alloc.alloc_long(-1).unwrap();
        let _b = alloc.alloc_long(-2).unwrap();
        let _c = alloc.alloc_long(-3).unwrap();
        assert_eq!(alloc.alloc_count(), 3);

        // Free the middle element (successor of the head).
        let head = alloc.head_alloc();
        unsafe { alloc.free_next(head) };
        assert_eq!(alloc.alloc_count(), 2);
        assert_eq!(
            alloc.next_alloc(alloc.next_alloc(head)),
            std::ptr::null_mut()
        );
    }
}
