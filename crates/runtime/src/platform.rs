//! External interface in and out of the VM.
//!
//! Holds the program path, the environment arguments handed to the program
//! and the standard streams. The console can be backed by the real process
//! streams (fully buffered; flushed at stream-flush and VM shutdown) or by
//! in-memory buffers so tests can script stdin and inspect stdout/stderr.

use std::io::{BufWriter, Read, Write};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleKind {
    StdIn,
    StdOut,
    StdErr,
}

pub struct PlatformInterface {
    program_path: String,
    env_args: Vec<String>,
    io: PlatformIo,
}

enum PlatformIo {
    Native {
        stdout: Mutex<BufWriter<std::io::Stdout>>,
        stderr: Mutex<BufWriter<std::io::Stderr>>,
        stdin: Mutex<std::io::Stdin>,
    },
    Memory {
        stdin: Mutex<std::io::Cursor<Vec<u8>>>,
        stdout: Arc<Mutex<Vec<u8>>>,
        stderr: Arc<Mutex<Vec<u8>>>,
    },
}

/// Handles onto the in-memory output buffers of a memory-backed platform;
/// stays readable after the VM is done with the interface.
#[derive(Clone)]
pub struct MemoryConsole {
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl MemoryConsole {
    pub fn stdout(&self) -> Vec<u8> {
        self.stdout.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stdout_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stdout()).into_owned()
    }

    pub fn stderr_utf8(&self) -> String {
        let bytes = self.stderr.lock().unwrap_or_else(|e| e.into_inner()).clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl PlatformInterface {
    /// Platform bound to the real process streams.
    pub fn native(program_path: impl Into<String>, env_args: Vec<String>) -> PlatformInterface {
        PlatformInterface {
            program_path: program_path.into(),
            env_args,
            io: PlatformIo::Native {
                stdout: Mutex::new(BufWriter::new(std::io::stdout())),
                stderr: Mutex::new(BufWriter::new(std::io::stderr())),
                stdin: Mutex::new(std::io::stdin()),
            },
        }
    }

    /// Platform backed by memory buffers, for tests.
    pub fn memory(
        stdin: impl Into<Vec<u8>>,
        env_args: Vec<String>,
    ) -> (PlatformInterface, MemoryConsole) {
        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let console = MemoryConsole {
            stdout: Arc::clone(&stdout),
            stderr: Arc::clone(&stderr),
        };
        let iface = PlatformInterface {
            program_path: String::new(),
            env_args,
            io: PlatformIo::Memory {
                stdin: Mutex::new(std::io::Cursor::new(stdin.into())),
                stdout,
                stderr,
            },
        };
        (iface, console)
    }

    /// Absolute path of the running program; empty when the program only
    /// exists in memory.
    pub fn program_path(&self) -> &str {
        &self.program_path
    }

    pub fn env_arg(&self, index: i32) -> Option<&str> {
        if index < 0 {
            return None;
        }
        self.env_args.get(index as usize).map(String::as_str)
    }

    pub fn env_arg_count(&self) -> i32 {
        self.env_args.len() as i32
    }

    /// Write to an output console stream; false on failure (including a
    /// write to stdin).
    pub fn con_write(&self, kind: ConsoleKind, bytes: &[u8]) -> bool {
        match (&self.io, kind) {
            (_, ConsoleKind::StdIn) => false,
            (PlatformIo::Native { stdout, .. }, ConsoleKind::StdOut) => {
                let mut out = stdout.lock().unwrap_or_else(|e| e.into_inner());
                out.write_all(bytes).is_ok()
            }
            (PlatformIo::Native { stderr, .. }, ConsoleKind::StdErr) => {
                let mut err = stderr.lock().unwrap_or_else(|e| e.into_inner());
                err.write_all(bytes).is_ok()
            }
            (PlatformIo::Memory { stdout, .. }, ConsoleKind::StdOut) => {
                stdout
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend_from_slice(bytes);
                true
            }
            (PlatformIo::Memory { stderr, .. }, ConsoleKind::StdErr) => {
                stderr
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend_from_slice(bytes);
                true
            }
        }
    }

    /// Read up to `buf.len()` bytes from stdin; 0 means end of stream.
    pub fn con_read(&self, buf: &mut [u8]) -> usize {
        match &self.io {
            PlatformIo::Native { stdin, .. } => {
                let mut stdin = stdin.lock().unwrap_or_else(|e| e.into_inner());
                stdin.read(buf).unwrap_or(0)
            }
            PlatformIo::Memory { stdin, .. } => {
                let mut stdin = stdin.lock().unwrap_or_else(|e| e.into_inner());
                stdin.read(buf).unwrap_or(0)
            }
        }
    }

    /// Read a single byte from stdin; 0 at end of stream.
    pub fn con_read_char(&self) -> u8 {
        let mut byte = [0u8; 1];
        if self.con_read(&mut byte) == 0 { 0 } else { byte[0] }
    }

    pub fn flush(&self, kind: ConsoleKind) -> bool {
        match &self.io {
            PlatformIo::Native { stdout, stderr, .. } => match kind {
                ConsoleKind::StdOut => stdout
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .flush()
                    .is_ok(),
                ConsoleKind::StdErr => stderr
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .flush()
                    .is_ok(),
                ConsoleKind::StdIn => false,
            },
            PlatformIo::Memory { .. } => kind != ConsoleKind::StdIn,
        }
    }

    /// Flush everything buffered; called at VM shutdown.
    pub fn flush_all(&self) {
        self.flush(ConsoleKind::StdOut);
        self.flush(ConsoleKind::StdErr);
    }

    /// True when the console is backed by the real process streams (memory
    /// consoles reject stream options such as non-blocking mode).
    pub fn is_native(&self) -> bool {
        matches!(self.io, PlatformIo::Native { .. })
    }
}
