use test_case::test_case;

use crate::*;

#[test_case(DType::Bool, 1)]
#[test_case(DType::Int32, 4)]
#[test_case(DType::UInt64, 8)]
#[test_case(DType::Float16, 2)]
#[test_case(DType::Float32.vec(4), 16)]
#[test_case(DType::image(ImageKind::Half, 8, 16), 2; "half image reports texel channel size")]
#[test_case(DType::Float32.ptr(AddrSpace::Global), 8)]
fn itemsize(dtype: DType, expected: usize) {
    assert_eq!(dtype.bytes(), expected);
}

#[test]
fn vec_of_one_is_scalar() {
    assert_eq!(DType::Float32.vec(1), DType::Float32);
    assert_eq!(DType::Void.vec(4), DType::Void);
}

#[test]
fn vec_keeps_base_and_count() {
    let v = DType::Float16.vec(8);
    assert!(v.is_vector());
    assert!(v.is_float());
    assert_eq!(v.base(), ScalarDType::Float16);
    assert_eq!(v.count(), 8);
    assert_eq!(v.scalar_dtype(), DType::Float16);
}

#[test]
fn pointers_are_not_values() {
    let p = DType::Float32.ptr(AddrSpace::Local);
    assert!(!p.is_float());
    assert_eq!(p.pointee(), Some(&DType::Float32));
    assert_eq!(p.ptr(AddrSpace::Global), p);
}

#[test]
fn image_base_follows_kind() {
    let img = DType::image(ImageKind::Float, 4, 8);
    assert_eq!(img.base(), ScalarDType::Float32);
    assert_eq!(img.image_shape(), Some(&[4, 8, 4][..]));
    assert_eq!(img.scalar_dtype(), DType::Float32);
}

#[test]
fn bigint_is_signed_index() {
    assert!(DType::BigInt.is_int());
    assert!(DType::BigInt.is_signed());
    assert_eq!(ScalarDType::BigInt.bits(), 64);
}

#[test]
fn display_names() {
    assert_eq!(DType::Float32.to_string(), "float");
    assert_eq!(DType::Float32.vec(4).to_string(), "float.vec(4)");
    assert_eq!(DType::Int32.ptr(AddrSpace::Global).to_string(), "ptr.int");
}
