use kernc_dtype::DType;

use crate::UOp;

#[test]
fn constants_are_points() {
    assert_eq!(UOp::index_const(7).bounds(), Some((7, 7)));
}

#[test]
fn range_and_special() {
    assert_eq!(UOp::range(0, 16, false).bounds(), Some((0, 15)));
    assert_eq!(UOp::special(0, "gidx0", 4).bounds(), Some((0, 3)));
}

#[test]
fn affine_expression() {
    let r = UOp::range(0, 8, false);
    let e = r.mul(4i64).add(3i64);
    assert_eq!(e.vmin(), Some(3));
    assert_eq!(e.vmax(), Some(31));
}

#[test]
fn division_and_modulo_by_constant() {
    let r = UOp::range(0, 32, false);
    assert_eq!(r.idiv(8i64).bounds(), Some((0, 3)));
    assert_eq!(r.mod_(8i64).bounds(), Some((0, 7)));
    // A range that never wraps keeps its exact bounds.
    let small = UOp::range(0, 4, false).add(8i64);
    assert_eq!(small.mod_(16i64).bounds(), Some((8, 11)));
}

#[test]
fn comparisons_collapse_when_decided() {
    let r = UOp::range(0, 4, false);
    assert_eq!(r.cmp_lt(4i64).bounds(), Some((1, 1)));
    assert_eq!(r.cmp_lt(0i64).bounds(), Some((0, 0)));
    assert_eq!(r.cmp_lt(2i64).bounds(), Some((0, 1)));
}

#[test]
fn floats_have_no_bounds() {
    let f = UOp::const_(DType::Float32, 1.0);
    assert_eq!(f.bounds(), None);
}

#[test]
fn cast_to_narrow_int_clamps_unknown_range() {
    let r = UOp::range(0, 1000, false).cast(DType::UInt8);
    assert_eq!(r.bounds(), Some((0, 255)));
}
