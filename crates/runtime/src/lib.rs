//! Novus bytecode virtual machine.
//!
//! Consumes a single [`nov_asm::Executable`] image and runs it to
//! completion on parallel OS threads, one per executor. The pieces:
//!
//! - [`value::Value`]: tagged 64-bit cell, scalars inline, heap refs tagged
//! - [`alloc::RefAllocator`]: lock-free global allocation list
//! - [`gc`]: concurrent mark-and-sweep over the executor stacks
//! - [`registry::ExecutorRegistry`]: pause/resume/abort coordination
//! - [`executor`]: the interpreter loop; forks spawn new executors
//! - [`pcall`]: the platform-call surface (I/O, clocks, sleep, env, assert)

pub mod alloc;
pub mod exec_state;
pub mod executor;
pub mod gc;
mod pcall;
pub mod platform;
pub mod process;
pub mod refs;
pub mod registry;
pub mod signal;
pub mod stack;
pub mod stream;
pub mod strings;
pub mod terminal;
pub mod value;

pub use exec_state::ExecState;
pub use executor::{ExecContext, Settings};
pub use platform::{MemoryConsole, PlatformInterface};

use alloc::RefAllocator;
use gc::GarbageCollector;
use nov_asm::Executable;
use registry::ExecutorRegistry;
use std::sync::Arc;

/// Run an executable to completion and return the terminal state.
///
/// Sets up the registry, allocator and collector, executes the entrypoint
/// on the calling thread, then aborts any still-running forked executors
/// and shuts the collector down.
pub fn run(exe: Executable, iface: PlatformInterface, settings: Settings) -> ExecState {
    signal::ignore_sigpipe();

    if exe.entrypoint() as usize >= exe.code().len() {
        return ExecState::InvalidAssembly;
    }

    let registry = Arc::new(ExecutorRegistry::new());
    let alloc = Arc::new(RefAllocator::new());
    let mut gc = GarbageCollector::new(Arc::clone(&alloc), Arc::clone(&registry));

    let mut interrupt_watcher = if settings.intercept_interrupt {
        signal::InterruptWatcher::spawn(Arc::clone(&registry))
    } else {
        None
    };

    let ctx = ExecContext {
        settings,
        exe: Arc::new(exe),
        iface: Arc::new(iface),
        registry: Arc::clone(&registry),
        alloc,
    };

    let entrypoint = ctx.exe.entrypoint();
    let result = executor::execute(&ctx, entrypoint, 0, std::ptr::null(), std::ptr::null_mut());
    tracing::debug!(state = %result, "main executor finished");

    // Stop forked executors that are still running; they park at their next
    // trap point and never touch shared memory again.
    registry.abort_executors();

    // Finishes any collection in progress.
    gc.terminate();

    if let Some(watcher) = interrupt_watcher.as_mut() {
        watcher.stop();
    }

    ctx.iface.flush_all();
    result
}
