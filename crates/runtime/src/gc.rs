//! Concurrent mark-and-sweep collector.
//!
//! A dedicated thread waits on a request condvar (with a periodic timeout as
//! a floor on collection frequency). A cycle pauses every executor through
//! the registry, scans their stacks into the mark queue, snapshots the
//! allocation-list head, resumes the executors, then marks and sweeps
//! concurrently with the running program.
//!
//! Why that is sound: every reference reachable at the pause was on some
//! paused stack (or reachable from one), so the mark phase finds it even if
//! mutators rearrange things afterwards — at worst an object that just
//! became garbage survives until the next cycle. Allocations made after the
//! snapshot are prepended before the snapshot head and the sweep never
//! traverses them. The head itself is never freed because mutators may be
//! CAS-ing it concurrently.
//!
//! Pacing: allocation sizes accumulate in a thread-local counter which
//! periodically spills into a process-wide budget; exhausting the budget
//! requests a collection.

use crate::alloc::RefAllocator;
use crate::refs::{FutureRef, RefHeader, RefKind, StringLinkRef, StructRef, downcast};
use crate::registry::ExecutorRegistry;
use crate::stream::StreamRef;
use std::cell::Cell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

const GC_BYTE_INTERVAL: i64 = 64 * 1024 * 1024;
const GC_MIN_INTERVAL: Duration = Duration::from_secs(5);
const ALLOC_ACCUM_SPILL: u64 = 1024 * 1024;
const INITIAL_MARK_QUEUE_CAPACITY: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GcRequest {
    None,
    Collect,
    Terminate,
}

pub(crate) struct GcShared {
    request: Mutex<GcRequest>,
    cond: Condvar,
}

impl GcShared {
    fn submit(&self, request: GcRequest) {
        {
            let mut slot = self.request.lock().unwrap_or_else(|e| e.into_inner());
            // A pending terminate outranks everything else.
            if *slot != GcRequest::Terminate {
                *slot = request;
            }
        }
        self.cond.notify_one();
    }
}

thread_local! {
    // Per-thread spill counter so mutators do not contend on the budget
    // atomic for every allocation.
    static ALLOC_ACCUM: Cell<u64> = const { Cell::new(0) };
}

/// Allocation-pressure hook handed to the allocator.
pub(crate) struct GcPacer {
    shared: Arc<GcShared>,
    bytes_until_next: AtomicI64,
}

impl GcPacer {
    pub(crate) fn notify_alloc(&self, bytes: usize) {
        ALLOC_ACCUM.with(|accum| {
            let total = accum.get() + bytes as u64;
            if total < ALLOC_ACCUM_SPILL {
                accum.set(total);
                return;
            }
            accum.set(0);
            if self
                .bytes_until_next
                .fetch_sub(total as i64, Ordering::AcqRel)
                < 0
            {
                self.bytes_until_next
                    .store(GC_BYTE_INTERVAL, Ordering::Release);
                self.shared.submit(GcRequest::Collect);
            }
        });
    }
}

pub struct GarbageCollector {
    shared: Arc<GcShared>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl GarbageCollector {
    /// Wire the pacer into the allocator and start the collector thread.
    /// Must run before the program makes any allocations.
    pub fn new(alloc: Arc<RefAllocator>, registry: Arc<ExecutorRegistry>) -> GarbageCollector {
        let shared = Arc::new(GcShared {
            request: Mutex::new(GcRequest::None),
            cond: Condvar::new(),
        });
        alloc.set_pacer(Arc::new(GcPacer {
            shared: Arc::clone(&shared),
            bytes_until_next: AtomicI64::new(GC_BYTE_INTERVAL),
        }));

        let loop_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("nov-gc".to_string())
            .spawn(move || collector_loop(loop_shared, alloc, registry))
            .expect("failed to spawn collector thread");

        GarbageCollector {
            shared,
            thread: Some(thread),
        }
    }

    pub fn request_collection(&self) {
        self.shared.submit(GcRequest::Collect);
    }

    /// Stop the collector, finishing any cycle in progress.
    pub fn terminate(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.shared.submit(GcRequest::Terminate);
            let _ = thread.join();
        }
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn collector_loop(shared: Arc<GcShared>, alloc: Arc<RefAllocator>, registry: Arc<ExecutorRegistry>) {
    let mut mark_queue: Vec<*mut RefHeader> = Vec::with_capacity(INITIAL_MARK_QUEUE_CAPACITY);
    loop {
        {
            let slot = shared.request.lock().unwrap_or_else(|e| e.into_inner());
            let (mut slot, _) = shared
                .cond
                .wait_timeout_while(slot, GC_MIN_INTERVAL, |req| *req == GcRequest::None)
                .unwrap_or_else(|e| e.into_inner());
            if *slot == GcRequest::Terminate {
                return;
            }
            *slot = GcRequest::None;
        }
        collect(&alloc, &registry, &mut mark_queue);
    }
}

/// Run one full collection cycle.
pub(crate) fn collect(
    alloc: &RefAllocator,
    registry: &ExecutorRegistry,
    mark_queue: &mut Vec<*mut RefHeader>,
) {
    registry.pause_executors();

    // With the world stopped, gather every reference the stacks can see.
    registry.for_each_stack(|stack| {
        let values = unsafe { (*stack).live_values() };
        for value in values {
            if value.is_ref() && !value.is_null_ref() {
                mark_queue.push(value.ref_ptr());
            }
        }
    });
    let roots = mark_queue.len();

    // Anything allocated after this point lands in front of the snapshot
    // and is out of the sweep's reach.
    let sweep_head = alloc.head_alloc();

    registry.resume_executors();

    let marked = mark(mark_queue);
    let swept = sweep(alloc, sweep_head);
    tracing::debug!(roots, marked, swept, "collection cycle finished");
}

fn mark(queue: &mut Vec<*mut RefHeader>) -> usize {
    let mut marked = 0usize;
    while let Some(cur) = queue.pop() {
        let header = unsafe { &*cur };
        if header.is_marked() {
            continue;
        }
        header.set_mark();
        marked += 1;

        match header.kind() {
            RefKind::Struct => {
                let st = unsafe { &*downcast::<StructRef>(cur) };
                for index in 0..st.field_count() {
                    let field = st.field(index);
                    if field.is_ref() && !field.is_null_ref() {
                        queue.push(field.ref_ptr());
                    }
                }
            }
            RefKind::Future => {
                let future = unsafe { &*downcast::<FutureRef>(cur) };
                let result = future.result();
                if result.is_ref() && !result.is_null_ref() {
                    queue.push(result.ref_ptr());
                }
            }
            RefKind::StringLink => {
                let link = unsafe { &*downcast::<StringLinkRef>(cur) };
                if link.is_collapsed() {
                    queue.push(link.collapsed() as *mut RefHeader);
                    // The flat version is the only thing anyone can still
                    // observe after a full pause, so the chain can go.
                    link.clear_link();
                } else {
                    debug_assert!(!link.prev().is_null());
                    queue.push(link.prev());
                    let val = link.val();
                    if val.is_ref() {
                        queue.push(val.ref_ptr());
                    }
                }
            }
            RefKind::Stream => {
                let stream = unsafe { &*downcast::<StreamRef>(cur) };
                if let Some(process) = stream.process_child() {
                    queue.push(process);
                }
            }
            RefKind::String | RefKind::Long | RefKind::Atomic | RefKind::Process => {}
        }
    }
    marked
}

/// Walk the list from the snapshot head: clear marks on survivors, unlink
/// and destroy the rest. The head is skipped, mutators may be replacing it.
fn sweep(alloc: &RefAllocator, head: *mut RefHeader) -> usize {
    if head.is_null() {
        return 0;
    }
    unsafe { (*head).clear_mark() };

    let mut swept = 0usize;
    let mut prev = head;
    let mut cur = alloc.next_alloc(head);
    while !cur.is_null() {
        if unsafe { (*cur).is_marked() } {
            unsafe { (*cur).clear_mark() };
            prev = cur;
            cur = alloc.next_alloc(cur);
        } else {
            cur = unsafe { alloc.free_next(prev) };
            swept += 1;
        }
    }
    swept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec_state::ExecState;
    use crate::registry::ExecutorHandle;
    use crate::stack::BasicStack;
    use crate::value::Value;

    // The handles in these tests are parked manually in `Paused`, standing
    // in for executors sitting inside a blocking call; the pause protocol
    // accepts them without a trap round-trip.

    #[test]
    fn collection_frees_unreachable_and_keeps_reachable() {
        let alloc = RefAllocator::new();
        let registry = ExecutorRegistry::new();

        let mut stack = BasicStack::new();
        let live_str = alloc.alloc_str_from(b"live").unwrap();
        let live_struct = alloc.alloc_struct(2).unwrap();
        let inner = alloc.alloc_long(-42).unwrap();
        unsafe { (*live_struct).set_field(0, Value::ref_to(inner as *mut RefHeader)) };
        stack.push(Value::ref_to(live_str as *mut RefHeader));
        stack.push(Value::ref_to(live_struct as *mut RefHeader));

        // Garbage, plus a sacrificial head the sweep will skip.
        let _garbage_a = alloc.alloc_str_from(b"garbage").unwrap();
        let _garbage_b = alloc.alloc_long(-7).unwrap();
        let _head = alloc.alloc_str_from(b"head").unwrap();
        assert_eq!(alloc.alloc_count(), 6);

        let handle = ExecutorHandle::new(&mut stack);
        handle.set_state(ExecState::Paused);
        registry.register(&handle);

        let mut queue = Vec::new();
        collect(&alloc, &registry, &mut queue);

        // Live: string, struct, boxed long, plus the protected head.
        assert_eq!(alloc.alloc_count(), 4);
        unsafe {
            assert_eq!((*live_str).as_bytes(), b"live");
            assert_eq!((*live_struct).field(0).ref_ptr(), inner as *mut RefHeader);
            // Mark bits are clear outside a cycle.
            assert!(!(*(live_str as *mut RefHeader)).is_marked());
            assert!(!(*(live_struct as *mut RefHeader)).is_marked());
        }
    }

    #[test]
    fn second_cycle_frees_what_the_first_kept() {
        let alloc = RefAllocator::new();
        let registry = ExecutorRegistry::new();

        let mut stack = BasicStack::new();
        let s = alloc.alloc_str_from(b"short-lived").unwrap();
        stack.push(Value::ref_to(s as *mut RefHeader));
        // Keep the head slot occupied by something else.
        let _head = alloc.alloc_long(-1).unwrap();

        let handle = ExecutorHandle::new(&mut stack);
        handle.set_state(ExecState::Paused);
        registry.register(&handle);

        let mut queue = Vec::new();
        collect(&alloc, &registry, &mut queue);
        assert_eq!(alloc.alloc_count(), 2);

        // Drop the reference; the next cycle reclaims the string.
        unsafe { (*handle.stack()).rewind_to(0) };
        collect(&alloc, &registry, &mut queue);
        assert_eq!(alloc.alloc_count(), 1);
    }

    #[test]
    fn string_link_chains_are_traced_and_collapsed_links_cleared() {
        let alloc = RefAllocator::new();
        let registry = ExecutorRegistry::new();

        let mut stack = BasicStack::new();
        let base = alloc.alloc_str_from(b"ab").unwrap();
        let tail = alloc.alloc_str_from(b"cd").unwrap();
        let link = alloc
            .alloc_str_link(
                base as *mut RefHeader,
                Value::ref_to(tail as *mut RefHeader),
            )
            .unwrap();
        stack.push(Value::ref_to(link as *mut RefHeader));
        let _head = alloc.alloc_long(-1).unwrap();

        let handle = ExecutorHandle::new(&mut stack);
        handle.set_state(ExecState::Paused);
        registry.register(&handle);

        let mut queue = Vec::new();
        collect(&alloc, &registry, &mut queue);
        // Base and tail are reachable through the link.
        assert_eq!(alloc.alloc_count(), 4);

        // Collapse, then collect: the chain pointers are cleared, the flat
        // string is traced, and the now-unreferenced tail pieces die.
        let flat = crate::strings::collapse_string_link(&alloc, link).unwrap();
        unsafe { assert_eq!((*flat).as_bytes(), b"abcd") };
        collect(&alloc, &registry, &mut queue);
        assert!(unsafe { (*link).prev().is_null() });
        collect(&alloc, &registry, &mut queue);
        // Link + flat + head survive; base and tail are gone.
        assert_eq!(alloc.alloc_count(), 3);
    }
}
