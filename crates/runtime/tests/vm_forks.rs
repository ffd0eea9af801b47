//! Forked executors and futures.

mod common;

use common::{add_print, check_prog, check_prog_state};
use nov_asm::{CallMode, OpCode, PCallCode};
use nov_runtime::ExecState;

/// Emit a worker that tail-call-loops its argument down to zero, then
/// returns 42. Gives forked executors actual work plus trap points.
fn add_countdown_worker(asmb: &mut nov_asm::Assembler) {
    asmb.label("worker");
    asmb.add_stack_load(0);
    asmb.add_load_lit_int(0);
    asmb.add_op(OpCode::CheckEqInt);
    asmb.add_jump_if("worker-end");
    asmb.add_stack_load(0);
    asmb.add_load_lit_int(1);
    asmb.add_op(OpCode::SubInt);
    asmb.add_call("worker", 1, CallMode::Tail);

    asmb.label("worker-end");
    asmb.add_load_lit_int(42);
    asmb.add_ret();
}

#[test]
fn fork_results_are_waited_and_added() {
    check_prog(
        |asmb| {
            asmb.set_entrypoint("entry");
            asmb.label("entry");
            asmb.add_stack_alloc(1);

            // One fork by static target.
            asmb.add_load_lit_int(100);
            asmb.add_call("worker", 1, CallMode::Forked);

            // One fork through a closure.
            asmb.add_load_lit_int(10);
            asmb.add_load_lit_ip("worker");
            asmb.add_make_struct(2);
            asmb.add_call_dyn(0, CallMode::Forked);

            // Wait for both and add the results.
            asmb.add_future_block();
            asmb.add_stack_store(0);
            asmb.add_future_block();
            asmb.add_stack_load(0);
            asmb.add_op(OpCode::AddInt);

            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
            asmb.add_ret();

            add_countdown_worker(asmb);
        },
        "84",
    );
}

#[test]
fn future_wait_reports_resolution() {
    check_prog(
        |asmb| {
            asmb.set_entrypoint("entry");
            asmb.label("entry");

            asmb.add_load_lit_int(1);
            asmb.add_call("worker", 1, CallMode::Forked);

            // Blocking wait with a generous deadline resolves.
            asmb.add_dup();
            asmb.add_load_lit_long(2_000_000_000);
            asmb.add_future_wait_nano();
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);

            // The future is resolved now, so a poll also answers true.
            asmb.add_dup();
            asmb.add_load_lit_long(0);
            asmb.add_future_wait_nano();
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);

            // And the blocking take yields the result.
            asmb.add_future_block();
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
            asmb.add_ret();

            add_countdown_worker(asmb);
        },
        "1142",
    );
}

#[test]
fn failed_fork_propagates_on_block() {
    check_prog_state(
        |asmb| {
            asmb.set_entrypoint("entry");
            asmb.label("entry");
            asmb.add_call("divzero", 0, CallMode::Forked);
            asmb.add_future_block();
            asmb.add_ret();

            asmb.label("divzero");
            asmb.add_load_lit_int(1);
            asmb.add_load_lit_int(0);
            asmb.add_op(OpCode::DivInt);
            asmb.add_ret();
        },
        ExecState::DivByZero,
    );
}

#[test]
fn many_forks_allocate_concurrently() {
    // Each fork builds and collapses strings, exercising concurrent
    // allocation against the shared list while the parent joins them all.
    check_prog(
        |asmb| {
            const FORKS: u16 = 8;

            asmb.set_entrypoint("entry");
            asmb.label("entry");
            asmb.add_stack_alloc(FORKS);
            for i in 0..FORKS {
                asmb.add_call("alloc-worker", 0, CallMode::Forked);
                asmb.add_stack_store(i);
            }
            for i in 0..FORKS {
                asmb.add_stack_load(i);
                asmb.add_future_block();
                asmb.add_pop();
            }
            asmb.add_load_lit_string("done");
            add_print(asmb);
            asmb.add_ret();

            // Builds a 64-piece chain, collapses it, returns its length.
            asmb.label("alloc-worker");
            asmb.add_load_lit_string("chunk-of-payload");
            for _ in 0..63 {
                asmb.add_load_lit_string("chunk-of-payload");
                asmb.add_op(OpCode::AddString);
            }
            asmb.add_op(OpCode::LengthString);
            asmb.add_ret();
        },
        "done",
    );
}

#[test]
fn fork_results_can_be_printed_by_the_child() {
    // Children write to the shared console; the parent only joins. Output
    // order between children is unspecified, so all pieces are identical.
    let (output, state) = common::run_prog(|asmb| {
        asmb.set_entrypoint("entry");
        asmb.label("entry");
        asmb.add_stack_alloc(4);
        for i in 0..4u16 {
            asmb.add_call("printer", 0, CallMode::Forked);
            asmb.add_stack_store(i);
        }
        for i in 0..4u16 {
            asmb.add_stack_load(i);
            asmb.add_future_block();
            asmb.add_pop();
        }
        asmb.add_ret();

        asmb.label("printer");
        asmb.add_load_lit_string("tick");
        asmb.add_load_lit_int(1);
        asmb.add_pcall(PCallCode::StreamOpenConsole);
        asmb.add_swap();
        asmb.add_pcall(PCallCode::StreamWriteString);
        asmb.add_ret();
    });
    assert_eq!(state, ExecState::Success);
    assert_eq!(output, "tick".repeat(4));
}
