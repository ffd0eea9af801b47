//! Stream heap objects: console, file, tcp and child-process pipes behind
//! one ref kind.
//!
//! Streams never fail the executor: an operation on an invalid stream
//! answers the error contract instead (reads give empty / zero, writes give
//! false, `StreamCheckValid` gives 0). Opening something that does not
//! exist produces an invalid stream rather than an error state.

use crate::alloc::RefAllocator;
use crate::platform::{ConsoleKind, PlatformInterface};
use crate::refs::{RefHeader, RefKind, StringRef};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};

/// Stream option flags (`StreamSetOptions` / `StreamUnsetOptions`).
pub const STREAM_OPT_NO_BLOCK: i32 = 1 << 0;

pub enum ProcessPipe {
    In(Option<std::process::ChildStdin>),
    Out(Option<std::process::ChildStdout>),
    Err(Option<std::process::ChildStderr>),
}

pub enum StreamSource {
    Console(ConsoleKind),
    File(Option<std::fs::File>),
    Tcp(Option<TcpStream>),
    TcpServer(Option<TcpListener>),
    Process {
        /// Backing process ref, kept for the collector to trace.
        process: *mut RefHeader,
        pipe: ProcessPipe,
    },
    Invalid,
}

#[repr(C)]
pub struct StreamRef {
    pub(crate) header: RefHeader,
    source: StreamSource,
}

impl StreamRef {
    pub(crate) fn new(source: StreamSource) -> StreamRef {
        StreamRef {
            header: RefHeader::new(RefKind::Stream),
            source,
        }
    }

    pub fn is_valid(&self) -> bool {
        match &self.source {
            StreamSource::Console(_) => true,
            StreamSource::File(file) => file.is_some(),
            StreamSource::Tcp(socket) => socket.is_some(),
            StreamSource::TcpServer(listener) => listener.is_some(),
            StreamSource::Process { pipe, .. } => match pipe {
                ProcessPipe::In(p) => p.is_some(),
                ProcessPipe::Out(p) => p.is_some(),
                ProcessPipe::Err(p) => p.is_some(),
            },
            StreamSource::Invalid => false,
        }
    }

    /// Read up to `max` bytes into a fresh string; empty on end-of-stream,
    /// on a would-block non-blocking read and on invalid streams. `None`
    /// only when the string allocation itself failed.
    pub fn read_string(
        &mut self,
        alloc: &RefAllocator,
        iface: &PlatformInterface,
        max: i32,
    ) -> Option<*mut StringRef> {
        let max = max.max(0) as usize;
        let result = alloc.alloc_str(max as u32)?;
        let read = {
            let buf = unsafe { (*result).payload_mut() };
            let buf = &mut buf[..max];
            match &mut self.source {
                StreamSource::Console(ConsoleKind::StdIn) => iface.con_read(buf),
                StreamSource::File(Some(file)) => file.read(buf).unwrap_or(0),
                StreamSource::Tcp(Some(socket)) => socket.read(buf).unwrap_or(0),
                StreamSource::Process {
                    pipe: ProcessPipe::Out(Some(pipe)),
                    ..
                } => pipe.read(buf).unwrap_or(0),
                StreamSource::Process {
                    pipe: ProcessPipe::Err(Some(pipe)),
                    ..
                } => pipe.read(buf).unwrap_or(0),
                _ => 0,
            }
        };
        unsafe {
            (*result).update_size(read as u32);
            // Keep the shrunk payload null-terminated.
            (*result).payload_mut()[read] = 0;
        }
        Some(result)
    }

    /// Read one byte; 0 at end-of-stream or on invalid streams.
    pub fn read_char(&mut self, iface: &PlatformInterface) -> u8 {
        let mut byte = [0u8; 1];
        let read = match &mut self.source {
            StreamSource::Console(ConsoleKind::StdIn) => return iface.con_read_char(),
            StreamSource::File(Some(file)) => file.read(&mut byte).unwrap_or(0),
            StreamSource::Tcp(Some(socket)) => socket.read(&mut byte).unwrap_or(0),
            StreamSource::Process {
                pipe: ProcessPipe::Out(Some(pipe)),
                ..
            } => pipe.read(&mut byte).unwrap_or(0),
            StreamSource::Process {
                pipe: ProcessPipe::Err(Some(pipe)),
                ..
            } => pipe.read(&mut byte).unwrap_or(0),
            _ => 0,
        };
        if read == 0 { 0 } else { byte[0] }
    }

    pub fn write(&mut self, iface: &PlatformInterface, bytes: &[u8]) -> bool {
        match &mut self.source {
            StreamSource::Console(kind) => iface.con_write(*kind, bytes),
            StreamSource::File(Some(file)) => file.write_all(bytes).is_ok(),
            StreamSource::Tcp(Some(socket)) => socket.write_all(bytes).is_ok(),
            StreamSource::Process {
                pipe: ProcessPipe::In(Some(pipe)),
                ..
            } => pipe.write_all(bytes).is_ok(),
            _ => false,
        }
    }

    pub fn flush(&mut self, iface: &PlatformInterface) -> bool {
        match &mut self.source {
            StreamSource::Console(kind) => iface.flush(*kind),
            StreamSource::File(Some(file)) => file.flush().is_ok(),
            StreamSource::Tcp(Some(socket)) => socket.flush().is_ok(),
            StreamSource::Process {
                pipe: ProcessPipe::In(Some(pipe)),
                ..
            } => pipe.flush().is_ok(),
            _ => false,
        }
    }

    /// Set option flags; false when the stream kind does not support them.
    pub fn set_opts(&mut self, iface: &PlatformInterface, opts: i32) -> bool {
        if opts & STREAM_OPT_NO_BLOCK != 0 {
            return self.set_no_block(iface, true);
        }
        false
    }

    pub fn unset_opts(&mut self, iface: &PlatformInterface, opts: i32) -> bool {
        if opts & STREAM_OPT_NO_BLOCK != 0 {
            return self.set_no_block(iface, false);
        }
        false
    }

    /// Accept one connection on a server stream. Blocking; the caller
    /// brackets this with the pause protocol.
    pub fn accept(&mut self) -> StreamSource {
        match &mut self.source {
            StreamSource::TcpServer(Some(listener)) => match listener.accept() {
                Ok((socket, _addr)) => StreamSource::Tcp(Some(socket)),
                Err(_) => StreamSource::Invalid,
            },
            _ => StreamSource::Invalid,
        }
    }

    /// Process ref backing a process stream, for the collector.
    pub fn process_child(&self) -> Option<*mut RefHeader> {
        match &self.source {
            StreamSource::Process { process, .. } => Some(*process),
            _ => None,
        }
    }

    #[cfg(unix)]
    fn set_no_block(&mut self, iface: &PlatformInterface, enabled: bool) -> bool {
        use std::os::unix::io::AsRawFd;
        let fd = match &self.source {
            StreamSource::Console(kind) => {
                if !iface.is_native() {
                    return false;
                }
                match kind {
                    ConsoleKind::StdIn => 0,
                    ConsoleKind::StdOut => 1,
                    ConsoleKind::StdErr => 2,
                }
            }
            StreamSource::File(Some(file)) => file.as_raw_fd(),
            StreamSource::Tcp(Some(socket)) => return socket.set_nonblocking(enabled).is_ok(),
            StreamSource::TcpServer(Some(listener)) => {
                return listener.set_nonblocking(enabled).is_ok();
            }
            _ => return false,
        };
        set_fd_no_block(fd, enabled)
    }

    #[cfg(not(unix))]
    fn set_no_block(&mut self, _iface: &PlatformInterface, _enabled: bool) -> bool {
        false
    }
}

#[cfg(unix)]
fn set_fd_no_block(fd: i32, enabled: bool) -> bool {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return false;
        }
        let flags = if enabled {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        libc::fcntl(fd, libc::F_SETFL, flags) == 0
    }
}

/// Open a file stream. Mode: 0 read, 1 read-write, 2 create/truncate,
/// 3 append. Any failure yields an invalid stream.
pub fn open_file_stream(path: &str, mode: i32) -> StreamSource {
    let mut options = std::fs::OpenOptions::new();
    match mode {
        0 => options.read(true),
        1 => options.read(true).write(true),
        2 => options.write(true).create(true).truncate(true),
        3 => options.append(true).create(true),
        _ => return StreamSource::Invalid,
    };
    match options.open(path) {
        Ok(file) => StreamSource::File(Some(file)),
        Err(_) => StreamSource::Invalid,
    }
}

pub fn open_console_stream(kind: i32) -> StreamSource {
    match kind {
        0 => StreamSource::Console(ConsoleKind::StdIn),
        1 => StreamSource::Console(ConsoleKind::StdOut),
        2 => StreamSource::Console(ConsoleKind::StdErr),
        _ => StreamSource::Invalid,
    }
}

pub fn open_tcp_connection(address: &str, port: i32) -> StreamSource {
    if !(0..=u16::MAX as i32).contains(&port) {
        return StreamSource::Invalid;
    }
    match TcpStream::connect((address, port as u16)) {
        Ok(socket) => StreamSource::Tcp(Some(socket)),
        Err(_) => StreamSource::Invalid,
    }
}

pub fn start_tcp_server(port: i32, _backlog: i32) -> StreamSource {
    if !(0..=u16::MAX as i32).contains(&port) {
        return StreamSource::Invalid;
    }
    match TcpListener::bind(("0.0.0.0", port as u16)) {
        Ok(listener) => StreamSource::TcpServer(Some(listener)),
        Err(_) => StreamSource::Invalid,
    }
}

/// Resolve a hostname to its first address; empty string on failure.
pub fn lookup_address(hostname: &str) -> String {
    match (hostname, 0u16).to_socket_addrs() {
        Ok(mut addrs) => addrs
            .next()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_streams_answer_the_error_contract() {
        let alloc = RefAllocator::new();
        let (iface, _console) = PlatformInterface::memory("", vec![]);
        let mut stream = StreamRef::new(StreamSource::Invalid);

        assert!(!stream.is_valid());
        assert!(!stream.write(&iface, b"data"));
        assert_eq!(stream.read_char(&iface), 0);
        let read = stream.read_string(&alloc, &iface, 16).unwrap();
        unsafe { assert_eq!((*read).size(), 0) };
    }

    #[test]
    fn bad_open_mode_gives_invalid_stream() {
        assert!(matches!(
            open_file_stream("/tmp/whatever", 9),
            StreamSource::Invalid
        ));
        assert!(matches!(open_console_stream(3), StreamSource::Invalid));
    }

    #[test]
    fn missing_file_gives_invalid_stream() {
        let source = open_file_stream("/definitely/not/here.txt", 0);
        let stream = StreamRef::new(source);
        assert!(!stream.is_valid());
    }

    #[test]
    fn memory_console_rejects_no_block() {
        let (iface, _console) = PlatformInterface::memory("", vec![]);
        let mut stream = StreamRef::new(StreamSource::Console(ConsoleKind::StdIn));
        assert!(!stream.set_opts(&iface, STREAM_OPT_NO_BLOCK));
    }
}
