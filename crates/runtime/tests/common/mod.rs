//! Shared helpers: assemble a program, run it on a memory-backed platform,
//! inspect the captured console.
#![allow(dead_code)] // Each test binary uses its own subset.

use nov_asm::{Assembler, Executable, PCallCode};
use nov_runtime::{ExecState, MemoryConsole, PlatformInterface, Settings};

/// Wrap an expression body in an `entrypoint` label and a trailing `Ret`.
pub fn build_expr(build: impl FnOnce(&mut Assembler)) -> Executable {
    let mut asmb = Assembler::new();
    asmb.label("entrypoint");
    build(&mut asmb);
    asmb.add_ret();
    asmb.set_entrypoint("entrypoint");
    asmb.close().expect("assembly closes")
}

/// Build a full program; the builder sets labels and the entrypoint itself.
pub fn build_prog(build: impl FnOnce(&mut Assembler)) -> Executable {
    let mut asmb = Assembler::new();
    build(&mut asmb);
    asmb.close().expect("assembly closes")
}

/// Print the string on top of the stack to stdout.
pub fn add_print(asmb: &mut Assembler) {
    asmb.add_load_lit_int(1); // stdout
    asmb.add_pcall(PCallCode::StreamOpenConsole);
    asmb.add_swap();
    asmb.add_pcall(PCallCode::StreamWriteString);
    asmb.add_pop(); // Drop the write result.
}

pub fn run_with(
    exe: Executable,
    stdin: &str,
    env_args: Vec<String>,
) -> (MemoryConsole, ExecState) {
    let (iface, console) = PlatformInterface::memory(stdin, env_args);
    let state = nov_runtime::run(exe, iface, Settings::default());
    (console, state)
}

/// Run an expression body and return (stdout, state).
pub fn run_expr(build: impl FnOnce(&mut Assembler)) -> (String, ExecState) {
    let (console, state) = run_with(build_expr(build), "", vec![]);
    (console.stdout_utf8(), state)
}

/// Run a full program and return (stdout, state).
pub fn run_prog(build: impl FnOnce(&mut Assembler)) -> (String, ExecState) {
    let (console, state) = run_with(build_prog(build), "", vec![]);
    (console.stdout_utf8(), state)
}

/// Assert an expression prints `expected` and succeeds.
pub fn check_expr(build: impl FnOnce(&mut Assembler), expected: &str) {
    let (output, state) = run_expr(build);
    assert_eq!(state, ExecState::Success, "unexpected state, output: {output:?}");
    assert_eq!(output, expected);
}

/// Assert a full program prints `expected` and succeeds.
pub fn check_prog(build: impl FnOnce(&mut Assembler), expected: &str) {
    let (output, state) = run_prog(build);
    assert_eq!(state, ExecState::Success, "unexpected state, output: {output:?}");
    assert_eq!(output, expected);
}

/// Assert an expression terminates in `expected` state.
pub fn check_expr_state(build: impl FnOnce(&mut Assembler), expected: ExecState) {
    let (_, state) = run_expr(build);
    assert_eq!(state, expected);
}

/// Assert a full program terminates in `expected` state.
pub fn check_prog_state(build: impl FnOnce(&mut Assembler), expected: ExecState) {
    let (_, state) = run_prog(build);
    assert_eq!(state, expected);
}
