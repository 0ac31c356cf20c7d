use std::sync::Arc;

use kernc_ir::prelude::*;

use crate::estimate::flops_mem;

fn int_global() -> Arc<UOp> {
    UOp::define_global(0, DType::Int32, false)
}

#[test]
fn mulacc_counts_as_mul_and_add() {
    let g = int_global();
    let l1 = UOp::load(DType::Int32, g.clone(), UOp::index_const(1));
    let l2 = UOp::load(DType::Int32, g.clone(), UOp::index_const(2));
    let c3 = UOp::const_(DType::Int32, 3);
    let mul = UOp::new(Op::Binary(BinaryOp::Mul), DType::Int32, [l1.clone(), l2.clone()]);
    let add = UOp::new(Op::Binary(BinaryOp::Add), DType::Int32, [mul.clone(), c3.clone()]);
    let fma = l1.mulacc(l2.clone(), c3.clone());

    let split = vec![g.clone(), l1.clone(), l2.clone(), c3.clone(), mul, add];
    let fused = vec![g, l1, l2, c3, fma];
    assert_eq!(flops_mem(&split, false), flops_mem(&fused, false));
    assert_eq!(flops_mem(&fused, false), (2, 8));
}

#[test]
fn range_multiplies_body() {
    let g = int_global();
    let r = UOp::range(0, 10, false);
    let l = UOp::load(DType::Int32, g.clone(), r.clone());
    let end = UOp::new(Op::EndRange, DType::Void, [r.clone()]);
    let after = UOp::load(DType::Int32, g.clone(), UOp::index_const(0));
    let (_, mem) = flops_mem(&[g, r, l, end, after], false);
    assert_eq!(mem, 4 * 10 + 4);
}
