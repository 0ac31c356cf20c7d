use kernc_ir::prelude::*;

use crate::linearize::{format_listing, linearize, LinearizeError};
use crate::optimizer::{Opt, Renderer};
use crate::test::helpers::{count_tag, elementwise_add, kernel, position_of};

#[test]
fn reduce_loop_is_ordered() {
    let out_buf = UOp::define_global(0, DType::Float32, true);
    let in_buf = UOp::define_global(1, DType::Float32, false);
    let r = UOp::range(0, 16, true);
    let red = UOp::load(DType::Float32, in_buf, r.clone()).reduce(ReduceOp::Sum, [r]);
    let sink = UOp::sink([UOp::store(out_buf, UOp::const_(DType::Int32, 0), red)]);

    let uops = linearize(&sink, false).unwrap();
    let pos = |tag| position_of(&uops, tag).unwrap_or_else(|| panic!("{tag:?} missing:\n{}", format_listing(&uops)));
    assert!(pos(OpTag::DefineAcc) < pos(OpTag::Range));
    assert!(pos(OpTag::Range) < pos(OpTag::Phi));
    assert!(pos(OpTag::Phi) < pos(OpTag::EndRange));
    assert!(pos(OpTag::EndRange) < pos(OpTag::Store));
    assert_eq!(count_tag(&uops, OpTag::EndRange), 1);
}

#[test]
fn sink_is_stripped() {
    let buf = UOp::define_global(0, DType::Int32, true);
    let sink = UOp::sink([UOp::store(buf, UOp::const_(DType::Int32, 0), UOp::const_(DType::Int32, 5))]);
    let uops = linearize(&sink, false).unwrap();
    assert_eq!(count_tag(&uops, OpTag::Sink), 0);
    assert_eq!(uops.last().map(|u| u.tag()), Some(OpTag::Store));
}

#[test]
fn no_range_is_left_open() {
    let out_buf = UOp::define_global(0, DType::Int32, true);
    let in_buf = UOp::define_global(1, DType::Int32, false);
    let r = UOp::range(0, 8, false);
    let val = UOp::load(DType::Int32, in_buf, r.clone()).add(1i64);
    let sink = UOp::sink([UOp::store(out_buf, r, val)]);

    let uops = linearize(&sink, false).unwrap();
    assert_eq!(count_tag(&uops, OpTag::Range), count_tag(&uops, OpTag::EndRange));
    assert!(position_of(&uops, OpTag::Range) < position_of(&uops, OpTag::Store));
}

#[test]
fn listing_has_one_line_per_uop() {
    let buf = UOp::define_global(0, DType::Int32, true);
    let sink = UOp::sink([UOp::store(buf, UOp::const_(DType::Int32, 0), UOp::const_(DType::Int32, 5))]);
    let uops = linearize(&sink, false).unwrap();
    assert_eq!(format_listing(&uops).lines().count(), uops.len());
}

#[test]
fn leftover_ops_are_reported_once() {
    let out_buf = UOp::define_global(0, DType::Int32, true);
    let in_buf = UOp::define_global(1, DType::Int32, false);
    let stores = (0..2i64).map(|i| {
        let ld = UOp::load(DType::Int32, in_buf.clone(), UOp::const_(DType::Int32, i));
        let scaled = ld.unmul(UOp::const_(DType::Int32, 5 + i));
        UOp::store(out_buf.clone(), UOp::const_(DType::Int32, i), scaled)
    });
    let err = linearize(&UOp::sink(stores), false).unwrap_err();
    assert_eq!(err, LinearizeError::BadOps { ops: vec![OpTag::Unmul] });
}

// ============================================================================
// Vector memory
// ============================================================================

#[test]
fn upcast_loads_fold_into_float4() {
    let mut k = kernel(elementwise_add(&[64, 64], DType::Float32), Renderer::gpu());
    assert!(k.opts.supports_float4);
    k.apply_opt(Opt::upcast(0, 4), true).unwrap();
    let lin = k.linearize().unwrap();

    let vec_loads = lin.uops.iter().filter(|u| u.tag() == OpTag::Load && u.dtype_ref().count() == 4).count();
    assert_eq!(vec_loads, 2, "{}", format_listing(&lin.uops));
    let vec_alu = lin
        .uops
        .iter()
        .filter(|u| matches!(u.tag(), OpTag::Unary | OpTag::Binary | OpTag::Ternary) && u.dtype_ref().count() > 1)
        .count();
    assert_eq!(vec_alu, 0, "{}", format_listing(&lin.uops));
}
