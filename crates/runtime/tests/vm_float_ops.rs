//! Float32 arithmetic and formatting.

mod common;

use common::{add_print, check_expr};
use nov_asm::OpCode;

fn check_float_op(build: impl FnOnce(&mut nov_asm::Assembler), expected: &str) {
    check_expr(
        |asmb| {
            build(asmb);
            asmb.add_op(OpCode::ConvFloatString);
            add_print(asmb);
        },
        expected,
    );
}

#[test]
fn float_arithmetic() {
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(0.1);
            asmb.add_load_lit_float(0.2);
            asmb.add_op(OpCode::AddFloat);
        },
        "0.3",
    );
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(1.0);
            asmb.add_load_lit_float(0.25);
            asmb.add_op(OpCode::SubFloat);
        },
        "0.75",
    );
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(1.5);
            asmb.add_load_lit_float(4.0);
            asmb.add_op(OpCode::MulFloat);
        },
        "6",
    );
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(1.0);
            asmb.add_load_lit_float(4.0);
            asmb.add_op(OpCode::DivFloat);
        },
        "0.25",
    );
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(0.5);
            asmb.add_op(OpCode::NegFloat);
        },
        "-0.5",
    );
}

#[test]
fn float_division_by_zero_is_ieee_infinity() {
    // Never a runtime error, unlike the integer kinds.
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(1.0);
            asmb.add_load_lit_float(0.0);
            asmb.add_op(OpCode::DivFloat);
        },
        "inf",
    );
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(-1.0);
            asmb.add_load_lit_float(0.0);
            asmb.add_op(OpCode::DivFloat);
        },
        "-inf",
    );
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(0.0);
            asmb.add_load_lit_float(0.0);
            asmb.add_op(OpCode::DivFloat);
        },
        "nan",
    );
}

#[test]
fn float_math_functions() {
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(2.0);
            asmb.add_load_lit_float(10.0);
            asmb.add_op(OpCode::PowFloat);
        },
        "1024",
    );
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(64.0);
            asmb.add_op(OpCode::SqrtFloat);
        },
        "8",
    );
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(0.0);
            asmb.add_op(OpCode::SinFloat);
        },
        "0",
    );
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(0.0);
            asmb.add_op(OpCode::CosFloat);
        },
        "1",
    );
    check_float_op(
        |asmb| {
            asmb.add_load_lit_float(5.5);
            asmb.add_load_lit_float(4.0);
            asmb.add_op(OpCode::ModFloat);
        },
        "1.5",
    );
}

#[test]
fn float_comparisons() {
    check_expr(
        |asmb| {
            asmb.add_load_lit_float(1.5);
            asmb.add_load_lit_float(1.5);
            asmb.add_op(OpCode::CheckEqFloat);
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "1",
    );
    check_expr(
        |asmb| {
            asmb.add_load_lit_float(1.0);
            asmb.add_load_lit_float(2.0);
            asmb.add_op(OpCode::CheckLeFloat);
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "1",
    );
    // NaN compares unequal to itself.
    check_expr(
        |asmb| {
            asmb.add_load_lit_float(f32::NAN);
            asmb.add_load_lit_float(f32::NAN);
            asmb.add_op(OpCode::CheckEqFloat);
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "0",
    );
}

#[test]
fn int_float_conversions() {
    check_float_op(
        |asmb| {
            asmb.add_load_lit_int(42);
            asmb.add_op(OpCode::ConvIntFloat);
        },
        "42",
    );
    check_float_op(
        |asmb| {
            asmb.add_load_lit_long(-3);
            asmb.add_op(OpCode::ConvLongFloat);
        },
        "-3",
    );
}
