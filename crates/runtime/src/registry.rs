//! Executor registry and per-executor handles.
//!
//! Every executor owns an [`ExecutorHandle`] on its native stack and links
//! it into the process-wide registry for its lifetime. The handle carries
//! two atomics: the executor's state, and the registry's request slot
//! (none / pause / abort). Executors poll the request at trap points; the
//! collector stops the world by requesting pause on every handle and
//! spinning until none reports `Running`.

use crate::exec_state::ExecState;
use crate::stack::BasicStack;
use std::cell::Cell;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI8, AtomicU8, Ordering};

const REQ_NONE: u8 = 0;
const REQ_ABORT: u8 = 1;
const REQ_PAUSE: u8 = 2;

pub struct ExecutorHandle {
    state: AtomicI8,
    request: AtomicU8,
    stack: *mut BasicStack,
    prev: Cell<*mut ExecutorHandle>,
    next: Cell<*mut ExecutorHandle>,
}

// The list pointers are only touched under the registry mutex; the stack
// pointer is only dereferenced by the collector while this executor is
// parked at a trap or inside a pause-bracketed blocking call.
unsafe impl Send for ExecutorHandle {}
unsafe impl Sync for ExecutorHandle {}

impl ExecutorHandle {
    pub fn new(stack: *mut BasicStack) -> ExecutorHandle {
        ExecutorHandle {
            state: AtomicI8::new(ExecState::Running as i8),
            request: AtomicU8::new(REQ_NONE),
            stack,
            prev: Cell::new(std::ptr::null_mut()),
            next: Cell::new(std::ptr::null_mut()),
        }
    }

    #[inline]
    pub fn state(&self) -> ExecState {
        ExecState::from_i8(self.state.load(Ordering::Acquire)).unwrap_or(ExecState::Failed)
    }

    #[inline]
    pub fn set_state(&self, state: ExecState) {
        self.state.store(state as i8, Ordering::Release);
    }

    #[inline]
    pub fn stack(&self) -> *mut BasicStack {
        self.stack
    }

    /// Poll the request slot. Returns true when the executor must abort.
    /// A pause request parks the thread here, spin-yielding, until the
    /// collector releases it (or upgrades the request to abort).
    pub fn trap(&self) -> bool {
        match self.request.load(Ordering::Acquire) {
            REQ_ABORT => {
                self.set_state(ExecState::Aborted);
                true
            }
            REQ_PAUSE => {
                self.set_state(ExecState::Paused);
                loop {
                    match self.request.load(Ordering::Acquire) {
                        REQ_PAUSE => std::thread::yield_now(),
                        REQ_ABORT => {
                            self.set_state(ExecState::Aborted);
                            return true;
                        }
                        _ => break,
                    }
                }
                self.set_state(ExecState::Running);
                false
            }
            _ => false,
        }
    }

    pub fn request_abort(&self) {
        self.request.store(REQ_ABORT, Ordering::Release);
    }

    /// Request a pause; true once this executor is observably not running
    /// (parked at a trap, or inside a pause-bracketed blocking call).
    pub fn request_pause(&self) -> bool {
        if self.request.load(Ordering::Relaxed) != REQ_PAUSE {
            self.request.store(REQ_PAUSE, Ordering::Release);
        }
        self.state.load(Ordering::Acquire) != ExecState::Running as i8
    }

    pub fn resume(&self) {
        self.request.store(REQ_NONE, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistryState {
    Running,
    Paused,
    Aborted,
}

struct Inner {
    head: *mut ExecutorHandle,
    state: RegistryState,
}

unsafe impl Send for Inner {}

pub struct ExecutorRegistry {
    inner: Mutex<Inner>,
}

impl ExecutorRegistry {
    pub fn new() -> ExecutorRegistry {
        ExecutorRegistry {
            inner: Mutex::new(Inner {
                head: std::ptr::null_mut(),
                state: RegistryState::Running,
            }),
        }
    }

    /// Link a handle in. An executor may start while the registry is paused
    /// or aborting; it inherits the pending request and parks at its first
    /// trap.
    pub fn register(&self, handle: &ExecutorHandle) {
        let mut inner = self.lock();
        let handle_ptr = handle as *const ExecutorHandle as *mut ExecutorHandle;

        debug_assert!(handle.prev.get().is_null() && handle.next.get().is_null());
        if !inner.head.is_null() {
            unsafe { (*inner.head).prev.set(handle_ptr) };
            handle.next.set(inner.head);
        }
        inner.head = handle_ptr;

        match inner.state {
            RegistryState::Running => {}
            RegistryState::Paused => {
                handle.request_pause();
            }
            RegistryState::Aborted => handle.request_abort(),
        }
    }

    /// Unlink a handle that ran to completion. Aborted executors never
    /// unregister; the abort path already emptied the list.
    pub fn unregister(&self, handle: &ExecutorHandle) {
        let mut inner = self.lock();
        let handle_ptr = handle as *const ExecutorHandle as *mut ExecutorHandle;

        if inner.head == handle_ptr {
            inner.head = handle.next.get();
        } else if !handle.prev.get().is_null() {
            unsafe { (*handle.prev.get()).next.set(handle.next.get()) };
        }
        if !handle.next.get().is_null() {
            unsafe { (*handle.next.get()).prev.set(handle.prev.get()) };
        }
        handle.prev.set(std::ptr::null_mut());
        handle.next.set(std::ptr::null_mut());
    }

    /// Stop the world: request pause on every handle and spin until each
    /// one reports a non-running state.
    pub fn pause_executors(&self) {
        loop {
            {
                let mut inner = self.lock();
                // Aborted is final; don't regress the state.
                if inner.state == RegistryState::Aborted {
                    return;
                }
                let mut done = true;
                let mut cur = inner.head;
                while !cur.is_null() {
                    done &= unsafe { (*cur).request_pause() };
                    cur = unsafe { (*cur).next.get() };
                }
                if done {
                    inner.state = RegistryState::Paused;
                    return;
                }
            }
            std::thread::yield_now();
        }
    }

    /// Release every paused executor.
    pub fn resume_executors(&self) {
        let mut inner = self.lock();
        // Once aborted, there is nothing to resume into.
        if inner.state == RegistryState::Aborted {
            return;
        }
        let mut cur = inner.head;
        while !cur.is_null() {
            unsafe { (*cur).resume() };
            cur = unsafe { (*cur).next.get() };
        }
        inner.state = RegistryState::Running;
    }

    /// Pause everything, then flip every request to abort and drop the
    /// list. Aborted executors only touch their own native stacks from here
    /// on, so their handles must not be revisited.
    pub fn abort_executors(&self) {
        {
            let inner = self.lock();
            if inner.state == RegistryState::Aborted {
                return;
            }
            if inner.state == RegistryState::Paused {
                drop(inner);
            } else {
                drop(inner);
                self.pause_executors();
            }
        }

        let mut inner = self.lock();
        let mut cur = inner.head;
        while !cur.is_null() {
            let next = unsafe { (*cur).next.get() };
            unsafe { (*cur).request_abort() };
            cur = next;
        }
        inner.head = std::ptr::null_mut();
        inner.state = RegistryState::Aborted;
    }

    /// Visit every registered executor's stack. Only meaningful between
    /// `pause_executors` and `resume_executors`.
    pub fn for_each_stack(&self, mut visit: impl FnMut(*mut BasicStack)) {
        let inner = self.lock();
        let mut cur = inner.head;
        while !cur.is_null() {
            visit(unsafe { (*cur).stack() });
            cur = unsafe { (*cur).next.get() };
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ExecutorRegistry {
    fn default() -> ExecutorRegistry {
        ExecutorRegistry::new()
    }
}
