use kernc_dtype::DType;
use test_case::test_case;

use crate::op::Op;
use crate::types::{BinaryOp, ConstValue, TernaryOp, UnaryOp};
use crate::uop::{exec_alu, threefry2x32};

fn bin(op: BinaryOp) -> Op {
    Op::Binary(op)
}

#[test_case(BinaryOp::Add, 3, 4, 7)]
#[test_case(BinaryOp::Sub, 3, 4, -1)]
#[test_case(BinaryOp::Mul, -3, 4, -12)]
#[test_case(BinaryOp::Idiv, 7, 2, 3)]
#[test_case(BinaryOp::Idiv, -7, 2, -3; "idiv_truncates_toward_zero")]
#[test_case(BinaryOp::Mod, -7, 2, -1; "mod_keeps_dividend_sign")]
#[test_case(BinaryOp::Max, -7, 2, 2)]
#[test_case(BinaryOp::Xor, 6, 3, 5)]
#[test_case(BinaryOp::Shl, 1, 4, 16)]
#[test_case(BinaryOp::Shr, 16, 2, 4)]
fn int32_binary(op: BinaryOp, a: i64, b: i64, expected: i64) {
    let r = exec_alu(&bin(op), &DType::Int32, &[ConstValue::Int(a), ConstValue::Int(b)]);
    assert_eq!(r, Some(ConstValue::Int(expected)));
}

#[test]
fn int32_add_wraps() {
    let r = exec_alu(&bin(BinaryOp::Add), &DType::Int32, &[ConstValue::Int(i32::MAX as i64), ConstValue::Int(1)]);
    assert_eq!(r, Some(ConstValue::Int(i32::MIN as i64)));
}

#[test_case(BinaryOp::Idiv; "idiv")]
#[test_case(BinaryOp::Mod; "mod")]
fn integer_division_by_zero_is_undefined(op: BinaryOp) {
    assert_eq!(exec_alu(&bin(op), &DType::Int32, &[ConstValue::Int(5), ConstValue::Int(0)]), None);
}

#[test]
fn comparisons_produce_bool() {
    let lt = exec_alu(&bin(BinaryOp::CmpLt), &DType::Bool, &[ConstValue::Int(1), ConstValue::Int(2)]);
    let ne = exec_alu(&bin(BinaryOp::CmpNe), &DType::Bool, &[ConstValue::Float(1.0), ConstValue::Float(1.0)]);
    assert_eq!(lt, Some(ConstValue::Bool(true)));
    assert_eq!(ne, Some(ConstValue::Bool(false)));
}

#[test]
fn float_ops_round_to_dtype() {
    let r = exec_alu(&bin(BinaryOp::Fdiv), &DType::Float32, &[ConstValue::Float(1.0), ConstValue::Float(3.0)]);
    assert_eq!(r, Some(ConstValue::Float((1.0f64 / 3.0) as f32 as f64)));
}

#[test]
fn bit_ops_on_floats_are_undefined() {
    assert_eq!(exec_alu(&bin(BinaryOp::Xor), &DType::Float32, &[ConstValue::Float(1.0), ConstValue::Float(2.0)]), None);
}

#[test_case(UnaryOp::Recip, 0.0, f64::INFINITY; "recip_of_zero")]
#[test_case(UnaryOp::Log2, 0.0, f64::NEG_INFINITY; "log2_of_zero")]
#[test_case(UnaryOp::Exp2, 3.0, 8.0; "exp2")]
#[test_case(UnaryOp::Sqrt, 16.0, 4.0; "sqrt")]
#[test_case(UnaryOp::Neg, 2.5, -2.5; "neg")]
fn float_unary(op: UnaryOp, x: f64, expected: f64) {
    assert_eq!(exec_alu(&Op::Unary(op), &DType::Float64, &[ConstValue::Float(x)]), Some(ConstValue::Float(expected)));
}

#[test]
fn sqrt_of_negative_is_nan() {
    let r = exec_alu(&Op::Unary(UnaryOp::Sqrt), &DType::Float32, &[ConstValue::Float(-1.0)]);
    assert!(matches!(r, Some(ConstValue::Float(v)) if v.is_nan()));
}

#[test]
fn neg_of_bool_is_not() {
    assert_eq!(exec_alu(&Op::Unary(UnaryOp::Neg), &DType::Bool, &[ConstValue::Bool(true)]), Some(ConstValue::Bool(false)));
}

#[test]
fn where_and_mulacc() {
    let w = exec_alu(
        &Op::Ternary(TernaryOp::Where),
        &DType::Int32,
        &[ConstValue::Bool(false), ConstValue::Int(1), ConstValue::Int(2)],
    );
    assert_eq!(w, Some(ConstValue::Int(2)));
    let m = exec_alu(
        &Op::Ternary(TernaryOp::MulAcc),
        &DType::Float32,
        &[ConstValue::Float(2.0), ConstValue::Float(3.0), ConstValue::Float(1.0)],
    );
    assert_eq!(m, Some(ConstValue::Float(7.0)));
}

#[test]
fn wrong_arity_is_rejected() {
    assert_eq!(exec_alu(&bin(BinaryOp::Add), &DType::Int32, &[ConstValue::Int(1)]), None);
    assert_eq!(exec_alu(&Op::Sink, &DType::Int32, &[]), None);
}

// =============================================================================
// Threefry
// =============================================================================

#[test]
fn threefry_known_answer() {
    // Random123 threefry2x32_20, counter (0, 0), key (0, 0).
    assert_eq!(threefry2x32(0, 0), 0x99ba_4efe_6b20_0159);
}

#[test]
fn threefry_folds_through_exec_alu() {
    let r = exec_alu(&bin(BinaryOp::Threefry), &DType::UInt64, &[ConstValue::UInt(0), ConstValue::UInt(0)]);
    assert_eq!(r, Some(ConstValue::UInt(0x99ba_4efe_6b20_0159)));
}

#[test]
fn threefry_seed_changes_output() {
    assert_ne!(threefry2x32(0, 0), threefry2x32(0, 1));
    assert_ne!(threefry2x32(1, 0), threefry2x32(0, 0));
}
