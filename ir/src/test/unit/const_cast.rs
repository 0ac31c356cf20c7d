use kernc_dtype::{DType, ScalarDType};
use test_case::test_case;

use crate::types::ConstValue;

// =============================================================================
// Identity casts
// =============================================================================

#[test_case(ConstValue::Bool(true), DType::Bool, ConstValue::Bool(true); "bool_to_bool")]
#[test_case(ConstValue::Int(42), DType::Int64, ConstValue::Int(42); "int64_to_int64")]
#[test_case(ConstValue::UInt(42), DType::UInt64, ConstValue::UInt(42); "uint64_to_uint64")]
#[test_case(ConstValue::Float(0.5), DType::Float64, ConstValue::Float(0.5); "float64_to_float64")]
fn identity_cast(input: ConstValue, dtype: DType, expected: ConstValue) {
    assert_eq!(input.cast(&dtype), Some(expected));
}

// =============================================================================
// Narrowing
// =============================================================================

#[test_case(ConstValue::Int(300), DType::UInt8, ConstValue::UInt(44); "int_wraps_into_uint8")]
#[test_case(ConstValue::Int(-1), DType::UInt32, ConstValue::UInt(u32::MAX as u64); "negative_to_uint32")]
#[test_case(ConstValue::Int(128), DType::Int8, ConstValue::Int(-128); "int8_overflow_wraps")]
#[test_case(ConstValue::Float(2.9), DType::Int32, ConstValue::Int(2); "float_truncates")]
#[test_case(ConstValue::Float(-2.9), DType::Int32, ConstValue::Int(-2); "negative_float_truncates")]
#[test_case(ConstValue::Int(5), DType::Bool, ConstValue::Bool(true); "nonzero_is_true")]
#[test_case(ConstValue::Float(0.0), DType::Bool, ConstValue::Bool(false); "zero_is_false")]
#[test_case(ConstValue::Bool(true), DType::Float32, ConstValue::Float(1.0); "bool_to_float")]
fn narrowing_cast(input: ConstValue, dtype: DType, expected: ConstValue) {
    assert_eq!(input.cast(&dtype), Some(expected));
}

#[test]
fn float32_rounds_to_single_precision() {
    let v = ConstValue::Float(0.1).cast(&DType::Float32);
    assert_eq!(v, Some(ConstValue::Float(0.1f32 as f64)));
    assert_ne!(v, Some(ConstValue::Float(0.1)));
}

#[test]
fn bigint_behaves_like_int64() {
    assert_eq!(ConstValue::Int(i64::MAX).cast(&DType::BigInt), Some(ConstValue::Int(i64::MAX)));
}

#[test]
fn vectors_cast_to_their_element() {
    assert_eq!(ConstValue::Int(3).cast(&DType::Float32.vec(4)), Some(ConstValue::Float(3.0)));
}

#[test]
fn pointers_and_void_do_not_cast() {
    assert_eq!(ConstValue::Int(3).cast(&DType::Float32.ptr(kernc_dtype::AddrSpace::Global)), None);
    assert_eq!(ConstValue::Int(3).cast(&DType::Void), None);
}

#[test]
fn max_identity_is_smallest_value() {
    assert_eq!(ConstValue::min_of(ScalarDType::Int8), ConstValue::Int(-128));
    assert_eq!(ConstValue::min_of(ScalarDType::UInt16), ConstValue::UInt(0));
    assert_eq!(ConstValue::min_of(ScalarDType::Float32), ConstValue::Float(f64::NEG_INFINITY));
}

#[test]
fn value_eq_crosses_representations() {
    assert!(ConstValue::Int(0).value_eq(&ConstValue::Float(0.0)));
    assert!(ConstValue::Bool(true).value_eq(&ConstValue::UInt(1)));
    assert!(!ConstValue::Int(1).value_eq(&ConstValue::Float(1.5)));
    // Structural equality is bitwise.
    assert_ne!(ConstValue::Int(0), ConstValue::Float(0.0));
    assert_ne!(ConstValue::Float(0.0), ConstValue::Float(-0.0));
}
