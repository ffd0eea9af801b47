//! Atomic operations, including the cross-executor handshake.

mod common;

use common::{add_print, check_expr, check_prog};
use nov_asm::{CallMode, OpCode, PCallCode};

#[test]
fn create_and_load() {
    check_expr(
        |asmb| {
            asmb.add_make_atomic(42);
            asmb.add_atomic_load();
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "42",
    );
    check_expr(
        |asmb| {
            asmb.add_make_atomic(-1337);
            asmb.add_atomic_load();
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "-1337",
    );
}

#[test]
fn compare_and_swap_returns_the_previous_value() {
    check_expr(
        |asmb| {
            asmb.add_make_atomic(42);
            asmb.add_dup();
            asmb.add_dup();

            asmb.add_atomic_compare_swap(42, 1337);
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);

            asmb.add_atomic_compare_swap(1337, 42);
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "421337",
    );
}

#[test]
fn compare_and_swap_transitions_only_on_match() {
    check_expr(
        |asmb| {
            asmb.add_make_atomic(42);
            asmb.add_dup();
            asmb.add_atomic_compare_swap(7, 99); // Mismatch, no transition.
            asmb.add_pop();
            asmb.add_atomic_load();
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "42",
    );
    check_expr(
        |asmb| {
            asmb.add_make_atomic(42);
            asmb.add_dup();
            asmb.add_atomic_compare_swap(42, 1337);
            asmb.add_pop();
            asmb.add_atomic_load();
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "1337",
    );
}

#[test]
fn atomic_block_returns_immediately_on_match() {
    check_expr(
        |asmb| {
            asmb.add_make_atomic(42);
            asmb.add_atomic_block(42);
        },
        "",
    );
}

#[test]
fn atomic_block_wakes_when_a_fork_transitions() {
    // The parent blocks until the fork flips the atomic to 1.
    check_prog(
        |asmb| {
            asmb.set_entrypoint("entry");
            asmb.label("entry");
            asmb.add_stack_alloc(1);
            asmb.add_make_atomic(0);
            asmb.add_stack_store(0);

            asmb.add_stack_load(0);
            asmb.add_call("flipper", 1, CallMode::Forked);

            asmb.add_stack_load(0);
            asmb.add_atomic_block(1);

            asmb.add_future_block();
            asmb.add_pop();
            asmb.add_load_lit_string("woken");
            add_print(asmb);
            asmb.add_ret();

            asmb.label("flipper");
            asmb.add_stack_load(0);
            asmb.add_atomic_compare_swap(0, 1);
            asmb.add_ret();
        },
        "woken",
    );
}

#[test]
fn only_one_of_many_forks_wins_the_swap() {
    const FORKS: u16 = 15;

    let (output, state) = common::run_prog(|asmb| {
        asmb.set_entrypoint("entry");
        asmb.label("entry");
        asmb.add_stack_alloc(1 + FORKS);

        asmb.add_make_atomic(0);
        asmb.add_stack_store(0);

        for i in 0..FORKS {
            asmb.add_stack_load(0);
            asmb.add_call("worker", 1, CallMode::Forked);
            asmb.add_stack_store(1 + i);
        }
        for i in 0..FORKS {
            asmb.add_stack_load(1 + i);
            asmb.add_future_block();
            asmb.add_pop();
        }
        asmb.add_ret();

        // Each worker tries the 0 -> 1 swap; exactly one sees 0 back.
        asmb.label("worker");
        asmb.add_stack_load(0);
        asmb.add_atomic_compare_swap(0, 1);
        asmb.add_load_lit_int(0);
        asmb.add_op(OpCode::CheckEqInt);
        asmb.add_jump_if("worker-won");
        asmb.add_load_lit_int(0);
        asmb.add_ret();

        asmb.label("worker-won");
        asmb.add_load_lit_string("Hello from worker");
        asmb.add_load_lit_int(1);
        asmb.add_pcall(PCallCode::StreamOpenConsole);
        asmb.add_swap();
        asmb.add_pcall(PCallCode::StreamWriteString);
        asmb.add_ret();
    });

    assert_eq!(state, nov_runtime::ExecState::Success);
    assert_eq!(output, "Hello from worker");
}
