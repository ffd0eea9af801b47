//! Int32 and int64 arithmetic, logic and comparisons.

mod common;

use common::{add_print, check_expr, check_expr_state};
use nov_asm::OpCode;
use nov_runtime::ExecState;

fn check_int_op(build: impl FnOnce(&mut nov_asm::Assembler), expected: i32) {
    check_expr(
        |asmb| {
            build(asmb);
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        &expected.to_string(),
    );
}

fn check_long_op(build: impl FnOnce(&mut nov_asm::Assembler), expected: i64) {
    check_expr(
        |asmb| {
            build(asmb);
            asmb.add_op(OpCode::ConvLongString);
            add_print(asmb);
        },
        &expected.to_string(),
    );
}

#[test]
fn int_arithmetic() {
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(1);
            asmb.add_load_lit_int(2);
            asmb.add_op(OpCode::AddInt);
        },
        3,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(10);
            asmb.add_load_lit_int(3);
            asmb.add_op(OpCode::SubInt);
        },
        7,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(-6);
            asmb.add_load_lit_int(7);
            asmb.add_op(OpCode::MulInt);
        },
        -42,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(33);
            asmb.add_load_lit_int(4);
            asmb.add_op(OpCode::DivInt);
        },
        8,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(33);
            asmb.add_load_lit_int(4);
            asmb.add_op(OpCode::RemInt);
        },
        1,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(1337);
            asmb.add_op(OpCode::NegInt);
        },
        -1337,
    );
}

#[test]
fn int_division_by_zero_fails_the_executor() {
    check_expr_state(
        |asmb| {
            asmb.add_load_lit_int(1);
            asmb.add_load_lit_int(0);
            asmb.add_op(OpCode::DivInt);
        },
        ExecState::DivByZero,
    );
    check_expr_state(
        |asmb| {
            asmb.add_load_lit_int(1);
            asmb.add_load_lit_int(0);
            asmb.add_op(OpCode::RemInt);
        },
        ExecState::DivByZero,
    );
}

#[test]
fn int_bit_ops() {
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(0b0110);
            asmb.add_load_lit_int(0b0011);
            asmb.add_op(OpCode::AndInt);
        },
        0b0010,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(0b0110);
            asmb.add_load_lit_int(0b0011);
            asmb.add_op(OpCode::OrInt);
        },
        0b0111,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(0b0110);
            asmb.add_load_lit_int(0b0011);
            asmb.add_op(OpCode::XorInt);
        },
        0b0101,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(1);
            asmb.add_load_lit_int(4);
            asmb.add_op(OpCode::ShiftLeftInt);
        },
        16,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(16);
            asmb.add_load_lit_int(3);
            asmb.add_op(OpCode::ShiftRightInt);
        },
        2,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(0);
            asmb.add_op(OpCode::InvInt);
        },
        -1,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(0);
            asmb.add_op(OpCode::LogicInvInt);
        },
        1,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(42);
            asmb.add_op(OpCode::LogicInvInt);
        },
        0,
    );
}

#[test]
fn int_comparisons_produce_zero_or_one() {
    let cases: &[(i32, i32, OpCode, i32)] = &[
        (1, 1, OpCode::CheckEqInt, 1),
        (1, 2, OpCode::CheckEqInt, 0),
        (2, 1, OpCode::CheckGtInt, 1),
        (1, 2, OpCode::CheckGtInt, 0),
        (1, 2, OpCode::CheckLeInt, 1),
        (2, 1, OpCode::CheckLeInt, 0),
    ];
    for &(a, b, op, expected) in cases {
        check_int_op(
            |asmb| {
                asmb.add_load_lit_int(a);
                asmb.add_load_lit_int(b);
                asmb.add_op(op);
            },
            expected,
        );
    }
}

#[test]
fn long_arithmetic_crosses_the_int_range() {
    check_long_op(
        |asmb| {
            asmb.add_load_lit_long(4_000_000_000);
            asmb.add_load_lit_long(4_000_000_000);
            asmb.add_op(OpCode::AddLong);
        },
        8_000_000_000,
    );
    check_long_op(
        |asmb| {
            asmb.add_load_lit_long(1);
            asmb.add_load_lit_long(2);
            asmb.add_op(OpCode::SubLong);
        },
        -1,
    );
    check_long_op(
        |asmb| {
            asmb.add_load_lit_long(-3_000_000_000);
            asmb.add_load_lit_long(3);
            asmb.add_op(OpCode::MulLong);
        },
        -9_000_000_000,
    );
    check_long_op(
        |asmb| {
            asmb.add_load_lit_long(-9_000_000_000);
            asmb.add_load_lit_long(-3);
            asmb.add_op(OpCode::DivLong);
        },
        3_000_000_000,
    );
    check_long_op(
        |asmb| {
            asmb.add_load_lit_long(i64::MAX);
            asmb.add_op(OpCode::NegLong);
        },
        -i64::MAX,
    );
}

#[test]
fn long_division_by_zero_fails_the_executor() {
    check_expr_state(
        |asmb| {
            asmb.add_load_lit_long(1);
            asmb.add_load_lit_long(0);
            asmb.add_op(OpCode::DivLong);
        },
        ExecState::DivByZero,
    );
}

#[test]
fn long_comparisons_cover_the_boxed_range() {
    check_int_op(
        |asmb| {
            asmb.add_load_lit_long(-5_000_000_000);
            asmb.add_load_lit_long(-5_000_000_000);
            asmb.add_op(OpCode::CheckEqLong);
        },
        1,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_long(-5_000_000_000);
            asmb.add_load_lit_long(5_000_000_000);
            asmb.add_op(OpCode::CheckLeLong);
        },
        1,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_long(i64::MAX);
            asmb.add_load_lit_long(i64::MIN);
            asmb.add_op(OpCode::CheckGtLong);
        },
        1,
    );
}

#[test]
fn conversions_between_numeric_kinds() {
    check_long_op(
        |asmb| {
            asmb.add_load_lit_int(-7);
            asmb.add_op(OpCode::ConvIntLong);
        },
        -7,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_long(4_294_967_298); // 2^32 + 2 truncates to 2.
            asmb.add_op(OpCode::ConvLongInt);
        },
        2,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_float(42.9);
            asmb.add_op(OpCode::ConvFloatInt);
        },
        42,
    );
    check_long_op(
        |asmb| {
            asmb.add_load_lit_float(-2.5);
            asmb.add_op(OpCode::ConvFloatLong);
        },
        -2,
    );
    check_int_op(
        |asmb| {
            asmb.add_load_lit_int(321); // Truncates to one byte.
            asmb.add_op(OpCode::ConvIntChar);
        },
        65,
    );
}
