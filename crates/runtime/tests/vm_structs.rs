//! Struct make/load/store and the null-struct sentinel.

mod common;

use common::{add_print, check_expr};
use nov_asm::OpCode;

#[test]
fn make_struct_preserves_field_order() {
    // Field 0 is pushed first.
    check_expr(
        |asmb| {
            asmb.add_load_lit_int(10);
            asmb.add_load_lit_int(20);
            asmb.add_load_lit_int(30);
            asmb.add_make_struct(3);
            asmb.add_struct_load_field(1);
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "20",
    );
}

#[test]
fn struct_store_field_mutates_in_place() {
    check_expr(
        |asmb| {
            asmb.add_load_lit_int(1);
            asmb.add_load_lit_int(2);
            asmb.add_make_struct(2);
            asmb.add_dup();
            asmb.add_dup();
            asmb.add_load_lit_int(99);
            asmb.add_struct_store_field(0);
            asmb.add_struct_load_field(0);
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "99",
    );
}

#[test]
fn structs_nest_and_hold_references() {
    check_expr(
        |asmb| {
            asmb.add_load_lit_string("inner");
            asmb.add_make_struct(1);
            asmb.add_load_lit_int(7);
            asmb.add_make_struct(2);
            asmb.add_struct_load_field(0); // inner struct
            asmb.add_struct_load_field(0); // inner string
            add_print(asmb);
        },
        "inner",
    );
}

#[test]
fn null_struct_check() {
    check_expr(
        |asmb| {
            asmb.add_make_null_struct();
            asmb.add_op(OpCode::CheckStructNull);
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "1",
    );
    check_expr(
        |asmb| {
            asmb.add_load_lit_int(1);
            asmb.add_make_struct(1);
            asmb.add_op(OpCode::CheckStructNull);
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "0",
    );
    // Scalars are not the null-ref.
    check_expr(
        |asmb| {
            asmb.add_load_lit_int(0);
            asmb.add_op(OpCode::CheckStructNull);
            asmb.add_op(OpCode::ConvIntString);
            add_print(asmb);
        },
        "0",
    );
}

#[test]
fn long_fields_round_trip_through_structs() {
    check_expr(
        |asmb| {
            asmb.add_load_lit_long(-5_000_000_000);
            asmb.add_make_struct(1);
            asmb.add_struct_load_field(0);
            asmb.add_op(OpCode::ConvLongString);
            add_print(asmb);
        },
        "-5000000000",
    );
}
