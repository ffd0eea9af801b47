//! Platform-call dispatcher.
//!
//! One switch over the pcall byte. Each arm pops its operands, invokes the
//! matching platform shim and pushes the result. I/O failures are answered
//! through return values, never through executor failure; only assertion
//! failures, allocation failures and stack overflow transition the state.
//!
//! Blocking arms follow the pause protocol: operands stay on the stack for
//! the collector to see, the state is `Paused` across the blocking region,
//! and `trap` runs exactly once on resume.

use crate::exec_state::ExecState;
use crate::executor::ExecContext;
use crate::process::ProcessRef;
use crate::refs::{RefHeader, get_process_ref, get_stream_ref};
use crate::registry::ExecutorHandle;
use crate::stack::BasicStack;
use crate::stream::{self, StreamSource};
use crate::strings;
use crate::terminal;
use crate::value::Value;
use nov_asm::PCallCode;
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn steady_clock_base() -> &'static Instant {
    static BASE: OnceLock<Instant> = OnceLock::new();
    BASE.get_or_init(Instant::now)
}

pub(crate) fn pcall(
    ctx: &ExecContext,
    stack: &mut BasicStack,
    handle: &ExecutorHandle,
    code: PCallCode,
) {
    let alloc = &*ctx.alloc;
    let iface = &*ctx.iface;

    macro_rules! bail {
        ($state:expr) => {{
            handle.set_state($state);
            return;
        }};
    }
    macro_rules! push {
        ($val:expr) => {
            if !stack.push($val) {
                bail!(ExecState::StackOverflow)
            }
        };
    }
    macro_rules! push_int {
        ($val:expr) => {
            push!(Value::int($val))
        };
    }
    macro_rules! push_bool {
        ($val:expr) => {
            push_int!($val as i32)
        };
    }
    macro_rules! push_long {
        ($val:expr) => {{
            let v: i64 = $val;
            if v >= 0 {
                push!(Value::pos_long(v))
            } else {
                match alloc.alloc_long(v) {
                    Some(boxed) => push!(Value::ref_to(boxed as *mut RefHeader)),
                    None => bail!(ExecState::AllocFailed),
                }
            }
        }};
    }
    macro_rules! push_ref {
        ($alloc_result:expr) => {
            match $alloc_result {
                Some(ptr) => push!(Value::ref_to(ptr as *mut RefHeader)),
                None => bail!(ExecState::AllocFailed),
            }
        };
    }
    macro_rules! push_str {
        ($bytes:expr) => {
            push_ref!(alloc.alloc_str_from($bytes))
        };
    }
    macro_rules! pop_str {
        () => {
            match unsafe { strings::get_string_ref(alloc, stack.pop()) } {
                Some(s) => s,
                None => bail!(ExecState::AllocFailed),
            }
        };
    }
    // Collapse a string still sitting on the stack (peeked, not popped).
    macro_rules! peek_str {
        ($behind:expr) => {
            match unsafe { strings::get_string_ref(alloc, stack.peek_behind($behind)) } {
                Some(s) => s,
                None => bail!(ExecState::AllocFailed),
            }
        };
    }
    // Bracket a blocking region with the pause protocol.
    macro_rules! blocking {
        ($body:expr) => {{
            handle.set_state(ExecState::Paused);
            let result = $body;
            handle.set_state(ExecState::Running);
            if handle.trap() {
                return;
            }
            result
        }};
    }

    match code {
        PCallCode::StreamOpenFile => {
            let mode = stack.pop().as_int();
            let path = pop_str!();
            let path = String::from_utf8_lossy(unsafe { (*path).as_bytes() }).into_owned();
            push_ref!(alloc.alloc_stream(stream::open_file_stream(&path, mode)));
        }
        PCallCode::StreamOpenConsole => {
            let kind = stack.pop().as_int();
            push_ref!(alloc.alloc_stream(stream::open_console_stream(kind)));
        }
        PCallCode::StreamCheckValid => {
            let s = unsafe { get_stream_ref(stack.pop()) };
            push_bool!(unsafe { (*s).is_valid() });
        }
        PCallCode::StreamReadString => {
            // Operands stay on the stack across the blocking read.
            let max = stack.peek().as_int();
            let s = unsafe { get_stream_ref(stack.peek_behind(1)) };
            let result = blocking!(unsafe { (*s).read_string(alloc, iface, max) });
            stack.rewind_to(stack.size() - 2);
            push_ref!(result);
        }
        PCallCode::StreamReadChar => {
            let s = unsafe { get_stream_ref(stack.peek()) };
            let byte = blocking!(unsafe { (*s).read_char(iface) });
            stack.pop();
            push_int!(byte as i32);
        }
        PCallCode::StreamWriteString => {
            let text = peek_str!(0);
            let s = unsafe { get_stream_ref(stack.peek_behind(1)) };
            let ok = blocking!(unsafe { (*s).write(iface, (*text).as_bytes()) });
            stack.rewind_to(stack.size() - 2);
            push_bool!(ok);
        }
        PCallCode::StreamWriteChar => {
            let byte = stack.peek().as_int() as u8;
            let s = unsafe { get_stream_ref(stack.peek_behind(1)) };
            let ok = blocking!(unsafe { (*s).write(iface, &[byte]) });
            stack.rewind_to(stack.size() - 2);
            push_bool!(ok);
        }
        PCallCode::StreamFlush => {
            let s = unsafe { get_stream_ref(stack.peek()) };
            let ok = blocking!(unsafe { (*s).flush(iface) });
            stack.pop();
            push_bool!(ok);
        }
        PCallCode::StreamSetOptions => {
            let opts = stack.pop().as_int();
            let s = unsafe { get_stream_ref(stack.pop()) };
            push_bool!(unsafe { (*s).set_opts(iface, opts) });
        }
        PCallCode::StreamUnsetOptions => {
            let opts = stack.pop().as_int();
            let s = unsafe { get_stream_ref(stack.pop()) };
            push_bool!(unsafe { (*s).unset_opts(iface, opts) });
        }

        PCallCode::FileRemove => {
            let path = pop_str!();
            let path = String::from_utf8_lossy(unsafe { (*path).as_bytes() }).into_owned();
            push_bool!(std::fs::remove_file(&path).is_ok());
        }

        PCallCode::TermSetOptions => {
            let opts = stack.pop().as_int();
            push_bool!(terminal::set_term_opts(opts));
        }
        PCallCode::TermUnsetOptions => {
            let opts = stack.pop().as_int();
            push_bool!(terminal::unset_term_opts(opts));
        }

        PCallCode::GetEnvArg => {
            let index = stack.pop().as_int();
            let arg = iface.env_arg(index).unwrap_or("");
            push_str!(arg.as_bytes());
        }
        PCallCode::GetEnvArgCount => push_int!(iface.env_arg_count()),
        PCallCode::GetEnvVar => {
            let name = pop_str!();
            let name = String::from_utf8_lossy(unsafe { (*name).as_bytes() }).into_owned();
            let value = std::env::var(&name).unwrap_or_default();
            push_str!(value.as_bytes());
        }

        PCallCode::ClockMicroSinceEpoch => {
            let micros = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_micros() as i64)
                .unwrap_or(-1);
            push_long!(micros);
        }
        PCallCode::ClockNanoSteady => {
            push_long!(steady_clock_base().elapsed().as_nanos() as i64);
        }

        PCallCode::SleepNano => {
            let nanos = unsafe { crate::refs::get_long(stack.pop()) };
            if nanos > 0 {
                blocking!(std::thread::sleep(Duration::from_nanos(nanos as u64)));
            }
        }

        PCallCode::Assert => {
            let msg = pop_str!();
            let cond = stack.pop().as_int();
            if cond == 0 {
                iface.con_write(crate::platform::ConsoleKind::StdErr, b"Assertion failed: ");
                iface.con_write(crate::platform::ConsoleKind::StdErr, unsafe {
                    (*msg).as_bytes()
                });
                iface.con_write(crate::platform::ConsoleKind::StdErr, b"\n");
                iface.flush(crate::platform::ConsoleKind::StdErr);
                bail!(ExecState::AssertFailed);
            }
        }

        PCallCode::TcpOpenCon => {
            let port = stack.pop().as_int();
            let address = pop_str!();
            let address = String::from_utf8_lossy(unsafe { (*address).as_bytes() }).into_owned();
            let source = if ctx.settings.sockets_enabled {
                blocking!(stream::open_tcp_connection(&address, port))
            } else {
                StreamSource::Invalid
            };
            push_ref!(alloc.alloc_stream(source));
        }
        PCallCode::TcpStartServer => {
            let backlog = stack.pop().as_int();
            let port = stack.pop().as_int();
            let source = if ctx.settings.sockets_enabled {
                stream::start_tcp_server(port, backlog)
            } else {
                StreamSource::Invalid
            };
            push_ref!(alloc.alloc_stream(source));
        }
        PCallCode::TcpAcceptCon => {
            let server = unsafe { get_stream_ref(stack.peek()) };
            let source = if ctx.settings.sockets_enabled {
                blocking!(unsafe { (*server).accept() })
            } else {
                StreamSource::Invalid
            };
            stack.pop();
            push_ref!(alloc.alloc_stream(source));
        }
        PCallCode::IpLookupAddress => {
            let hostname = pop_str!();
            let hostname = String::from_utf8_lossy(unsafe { (*hostname).as_bytes() }).into_owned();
            let address = if ctx.settings.sockets_enabled {
                blocking!(stream::lookup_address(&hostname))
            } else {
                String::new()
            };
            push_str!(address.as_bytes());
        }

        PCallCode::ProcessStart => {
            let cmd_line = pop_str!();
            let cmd_line = String::from_utf8_lossy(unsafe { (*cmd_line).as_bytes() }).into_owned();
            push_ref!(alloc.alloc_process(ProcessRef::spawn(&cmd_line)));
        }
        PCallCode::ProcessBlock => {
            let process = unsafe { get_process_ref(stack.peek()) };
            let exit_code = blocking!(unsafe { (*process).block() });
            stack.pop();
            push_int!(exit_code);
        }
        PCallCode::ProcessOpenStream => {
            let kind = stack.pop().as_int();
            let process_val = stack.peek();
            let process = unsafe { get_process_ref(process_val) };
            let source = match unsafe { (*process).take_pipe(kind) } {
                Some(pipe) => StreamSource::Process {
                    process: process_val.ref_ptr(),
                    pipe,
                },
                None => StreamSource::Invalid,
            };
            stack.pop();
            push_ref!(alloc.alloc_stream(source));
        }

        PCallCode::VersionRt => {
            push_str!(env!("CARGO_PKG_VERSION").as_bytes());
        }
    }
}
