//! Child-process heap objects.
//!
//! `ProcessStart` spawns the command with piped standard streams; the pipes
//! can be taken out later through `ProcessOpenStream`. A process that failed
//! to spawn is carried as an invalid ref: blocking on it yields -1 and its
//! streams are invalid, the executor itself never fails.

use crate::refs::{RefHeader, RefKind};
use crate::stream::ProcessPipe;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

struct ProcessInner {
    child: Option<Child>,
    exit_code: Option<i32>,
    stdin: Option<std::process::ChildStdin>,
    stdout: Option<std::process::ChildStdout>,
    stderr: Option<std::process::ChildStderr>,
}

#[repr(C)]
pub struct ProcessRef {
    pub(crate) header: RefHeader,
    inner: Mutex<ProcessInner>,
}

impl ProcessRef {
    /// Spawn `cmd_line` (split on whitespace, first token is the program).
    /// Spawn failures produce an invalid process ref.
    pub fn spawn(cmd_line: &str) -> ProcessRef {
        let mut parts = cmd_line.split_whitespace();
        let child = match parts.next() {
            Some(program) => Command::new(program)
                .args(parts)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .ok(),
            None => None,
        };

        let mut inner = ProcessInner {
            child: None,
            exit_code: None,
            stdin: None,
            stdout: None,
            stderr: None,
        };
        if let Some(mut child) = child {
            inner.stdin = child.stdin.take();
            inner.stdout = child.stdout.take();
            inner.stderr = child.stderr.take();
            inner.child = Some(child);
        }

        ProcessRef {
            header: RefHeader::new(RefKind::Process),
            inner: Mutex::new(inner),
        }
    }

    pub fn is_valid(&self) -> bool {
        let inner = self.lock();
        inner.child.is_some() || inner.exit_code.is_some()
    }

    /// Wait for the child to finish and return its exit code; -1 for
    /// invalid processes and for children killed by a signal. Blocking; the
    /// caller brackets this with the pause protocol.
    pub fn block(&self) -> i32 {
        let mut inner = self.lock();
        if let Some(code) = inner.exit_code {
            return code;
        }
        let code = match inner.child.as_mut() {
            Some(child) => match child.wait() {
                Ok(status) => status.code().unwrap_or(-1),
                Err(_) => -1,
            },
            None => -1,
        };
        inner.child = None;
        inner.exit_code = Some(code);
        code
    }

    /// Take the pipe for stream kind 0 (stdin), 1 (stdout) or 2 (stderr).
    /// Each pipe can be taken once; later requests give an empty pipe and
    /// thus an invalid stream.
    pub fn take_pipe(&self, kind: i32) -> Option<ProcessPipe> {
        let mut inner = self.lock();
        match kind {
            0 => Some(ProcessPipe::In(inner.stdin.take())),
            1 => Some(ProcessPipe::Out(inner.stdout.take())),
            2 => Some(ProcessPipe::Err(inner.stderr.take())),
            _ => None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProcessInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ProcessRef {
    fn drop(&mut self) {
        // Don't leave zombies behind when the program never blocked on the
        // child: reap if it already finished, otherwise let it run detached.
        let mut inner = self.lock();
        if let Some(child) = inner.child.as_mut() {
            let _ = child.try_wait();
        }
    }
}
