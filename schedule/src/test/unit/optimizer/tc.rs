//! Tensor core selection on a 16x16x16 matmul.

use kernc_ir::{AstOp, DType, OpTag, ReduceOp};
use test_case::test_case;

use crate::lower::lower;
use crate::optimizer::{Kernel, Opt, OptError, Renderer, TensorCoreOptions};
use crate::test::helpers::*;

fn metal_tc_kernel() -> Kernel {
    let mut k = kernel(matmul(16, DType::Float32), Renderer::metal());
    assert!(k.apply_tensor_cores(1, Some(&[]), 0, 0), "tensor cores should apply");
    k
}

#[test]
fn metal_matmul_picks_a_tensor_core() {
    let k = metal_tc_kernel();
    let tc = k.tensor_core.as_ref().unwrap();
    assert_eq!(tc.dims, [8, 8, 8]);
    assert_eq!(tc.dtype_out, DType::Float32);
    assert_eq!(k.applied_opts.as_slice(), &[Opt::tc(0, 0)]);
}

#[test]
fn optimized_ast_has_one_wmma() {
    let k = metal_tc_kernel();
    let ast = k.get_optimized_ast().unwrap();
    let nodes = ast.toposort();
    assert_eq!(nodes.iter().filter(|x| matches!(x.op, AstOp::Wmma(_))).count(), 1);
    let reduce = nodes.iter().find(|x| matches!(x.op, AstOp::Reduce { .. })).unwrap();
    assert!(matches!(&reduce.op, AstOp::Reduce { op: ReduceOp::Sum, .. }));
    assert!(matches!(reduce.src[0].op, AstOp::Wmma(_)));
}

#[test]
fn lowered_graph_has_one_wmma() {
    let k = metal_tc_kernel();
    let ast = k.get_optimized_ast().unwrap();
    let sink = lower(&ast, &k.opts).unwrap();
    assert_eq!(count_tag(&sink.toposort(), OpTag::Wmma), 1);
}

#[test_case(Renderer::metal(), DType::Float32, [8, 8, 8] ; "metal")]
#[test_case(Renderer::cuda(), DType::Float16, [8, 16, 16] ; "cuda")]
#[test_case(Renderer::amd(), DType::Float16, [16, 16, 16] ; "amd")]
fn tensor_core_recipe_linearizes(renderer: Renderer, dtype: DType, dims: [usize; 3]) {
    let mut k = kernel(matmul(16, dtype.clone()), renderer);
    assert!(k.apply_tensor_cores(1, Some(&[]), 0, 0), "tensor cores should apply");
    let tc = k.tensor_core.as_ref().unwrap();
    assert_eq!(tc.dims, dims);
    assert_eq!(tc.dtype_in, dtype);

    let lin = k.linearize().unwrap_or_else(|e| panic!("linearize failed: {e}"));
    assert_eq!(count_tag(&lin.uops, OpTag::Wmma), 1);
    assert_eq!(count_tag(&lin.uops, OpTag::Reduce), 0);
    assert_eq!(count_tag(&lin.uops, OpTag::Expand), 0);
}

#[test]
fn clang_has_no_tensor_cores() {
    let mut k = kernel(matmul(16, DType::Float32), Renderer::clang());
    assert!(!k.apply_tensor_cores(1, None, 0, 0));
    assert!(k.applied_opts.is_empty());
    assert_eq!(k.apply_opt(Opt::tc(0, 0), true), Err(OptError::NoTensorCores));
}

#[test]
fn tensor_core_must_come_first() {
    let mut k = kernel(matmul(16, DType::Float32), Renderer::metal());
    k.apply_opt(Opt::upcast(0, 4), true).unwrap();
    assert_eq!(k.apply_opt(Opt::tc(0, 0), true), Err(OptError::TensorCoreNotFirst));
}

#[test]
fn elementwise_has_no_tensor_core_match() {
    let mut k = kernel(elementwise_add(&[16, 16], DType::Float32), Renderer::metal());
    assert!(!k.apply_tensor_cores(1, None, 0, 0));
    assert!(k.tensor_core.is_none());
}

#[test]
fn fix_axes_shifts_and_drops() {
    let mut o = TensorCoreOptions { axes: [1, 3, 5], axes_exist: [true, true], axis_pads: vec![] };
    o.fix_axes(0);
    assert_eq!(o.axes, [0, 2, 5]);
    o.fix_axes(2);
    assert_eq!(o.axes_exist, [true, false]);
    assert_eq!(o.axes[0], 0);
}
