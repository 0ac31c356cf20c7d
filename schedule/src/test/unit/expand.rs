use std::sync::Arc;

use kernc_ir::prelude::*;
use kernc_ir::graph_rewrite;

use crate::expand::{expander, ExpandContext};
use crate::symbolic::constant_folder;

fn expand(sink: &Arc<UOp>) -> (Arc<UOp>, ExpandContext) {
    let pm = expander() + constant_folder();
    let mut ctx = ExpandContext::default();
    let out = graph_rewrite(&pm, sink, &mut ctx);
    (out, ctx)
}

fn lanes(values: &[i64]) -> Arc<UOp> {
    UOp::expand(DType::Int32, values.iter().map(|&v| UOp::const_(DType::Int32, v)), vec![(1, values.len())])
}

#[test]
fn expand_through_alu_splits_stores() {
    let buf = UOp::define_global(0, DType::Int32, true);
    let ex = lanes(&[10, 11, 12, 13]);
    let store = UOp::store(buf, ex.clone(), ex.mul(2i64));

    let (out, _) = expand(&UOp::sink([store]));
    assert_eq!(out.src().len(), 4);
    let stored: Vec<Option<i64>> =
        out.src().iter().map(|s| s.src()[2].const_value().and_then(|c| c.as_i64())).collect();
    assert_eq!(stored, vec![Some(20), Some(22), Some(24), Some(26)]);
    assert!(out.src().iter().all(|s| s.tag() == OpTag::Store));
}

#[test]
fn contract_of_matching_expand_vectorizes() {
    let buf = UOp::define_global(1, DType::Float32, false);
    let loads: Vec<_> = (0..4).map(|i| UOp::load(DType::Float32, buf.clone(), UOp::const_(DType::Int32, i))).collect();
    let ex = UOp::expand(DType::Float32, loads, vec![(1, 4)]);
    let con = ex.contract(DType::Float32.vec(4), vec![1]);

    let (out, _) = expand(&UOp::sink([con]));
    let vec = &out.src()[0];
    assert_eq!(vec.tag(), OpTag::Vectorize);
    assert_eq!(vec.src().len(), 4);
    assert!(vec.src().iter().all(|l| l.tag() == OpTag::Load));
}

#[test]
fn reduce_becomes_accumulator() {
    let out_buf = UOp::define_global(0, DType::Float32, true);
    let in_buf = UOp::define_global(1, DType::Float32, false);
    let r = UOp::range(0, 16, true);
    let red = UOp::load(DType::Float32, in_buf, r.clone()).reduce(ReduceOp::Sum, [r]);
    let store = UOp::store(out_buf, UOp::const_(DType::Int32, 0), red);

    let (out, ctx) = expand(&UOp::sink([store]));
    assert_eq!(ctx.acc_number, 1);
    let tags: Vec<OpTag> = out.toposort().iter().map(|u| u.tag()).collect();
    assert!(tags.contains(&OpTag::DefineAcc));
    assert!(tags.contains(&OpTag::Phi));
    assert!(!tags.contains(&OpTag::Reduce));
}

#[test]
fn vector_alu_is_split_into_lanes() {
    let out_buf = UOp::define_global(0, DType::Float32, true);
    let a = UOp::load(DType::Float32.vec(4), UOp::define_global(1, DType::Float32, false), UOp::const_(DType::Int32, 0));
    let b = UOp::load(DType::Float32.vec(4), UOp::define_global(2, DType::Float32, false), UOp::const_(DType::Int32, 0));
    let store = UOp::store(out_buf, UOp::const_(DType::Int32, 0), a.alu(BinaryOp::Add, b));

    let (out, _) = expand(&UOp::sink([store]));
    let nodes = out.toposort();
    let adds: Vec<_> = nodes.iter().filter(|u| u.tag() == OpTag::Binary).collect();
    assert_eq!(adds.len(), 4);
    assert!(adds.iter().all(|u| u.dtype_ref().count() == 1));
    let stored = &out.src()[0].src()[2];
    assert_eq!(stored.tag(), OpTag::Vectorize);
    assert_eq!(stored.dtype(), DType::Float32.vec(4));
}
