//! Interrupt handling.
//!
//! SIGINT flips an atomic owned by the VM run; a small watcher thread polls
//! it and routes the request into the registry's abort path, so every
//! executor stops at its next trap point instead of the process dying
//! mid-collection.

use crate::registry::ExecutorRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct InterruptWatcher {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl InterruptWatcher {
    /// Register the SIGINT hook and start watching. Returns `None` when the
    /// handler cannot be installed (non-unix, or the hook is taken).
    pub fn spawn(registry: Arc<ExecutorRegistry>) -> Option<InterruptWatcher> {
        let interrupted = Arc::new(AtomicBool::new(false));
        if !register_interrupt_flag(&interrupted) {
            return None;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let watcher_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("nov-interrupt".to_string())
            .spawn(move || {
                while !watcher_stop.load(Ordering::Acquire) {
                    if interrupted.swap(false, Ordering::AcqRel) {
                        tracing::debug!("interrupt received, aborting executors");
                        registry.abort_executors();
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            })
            .ok()?;

        Some(InterruptWatcher {
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for InterruptWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(unix)]
fn register_interrupt_flag(flag: &Arc<AtomicBool>) -> bool {
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(flag)).is_ok()
}

#[cfg(not(unix))]
fn register_interrupt_flag(_flag: &Arc<AtomicBool>) -> bool {
    false
}

/// Ignore SIGPIPE process-wide; broken pipes are reported per write call.
#[cfg(unix)]
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
pub fn ignore_sigpipe() {}
