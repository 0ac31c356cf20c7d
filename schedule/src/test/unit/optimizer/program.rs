//! Lowering optimized kernels to programs: launch dims and cost estimates.

use kernc_ir::{AstNode, DType, OpTag};

use crate::optimizer::{Opt, PlainRender, Renderer};
use crate::test::helpers::*;

const N: u64 = 1024 * 1024;

#[test]
fn clang_add_moves_three_buffers() {
    let k = kernel(elementwise_add(&[1024, 1024], DType::UInt8), Renderer::clang());
    let p = k.to_program(&PlainRender).unwrap();
    assert_eq!(p.mem_estimate, 3 * N);
    assert!(p.op_estimate >= N && p.op_estimate <= 2 * N, "op_estimate = {}", p.op_estimate);
    assert_eq!(p.global_size, None);
    assert_eq!(p.run_count(), 1);
}

#[test]
fn shared_input_is_counted_once() {
    let k = kernel(self_add(&[1024, 1024], DType::UInt8), Renderer::clang());
    let p = k.to_program(&PlainRender).unwrap();
    assert_eq!(p.mem_estimate, 2 * N);
}

#[test]
fn broadcast_input_is_counted_at_its_real_size() {
    let k = kernel(broadcast_add(16), Renderer::clang());
    assert_eq!(k.buffer_bytes(), 1024 + 64 + 1024);
    let p = k.to_program(&PlainRender).unwrap();
    assert_eq!(p.mem_estimate, 2112);
}

#[test]
fn gpu_launch_dims_follow_the_zones() {
    let mut k = kernel(elementwise_add(&[64, 64], DType::Float32), Renderer::gpu());
    k.apply_opt(Opt::local(0, 32), true).unwrap();
    let p = k.to_program(&PlainRender).unwrap();
    assert_eq!(p.global_size, Some([128, 1, 1]));
    assert_eq!(p.local_size, Some([32, 1, 1]));
    assert_eq!(p.run_count(), 4096);
    assert_eq!(p.device, "GPU");
}

#[test]
fn upcast_lanes_become_separate_stores() {
    let mut k = kernel(elementwise_add(&[64, 64], DType::Float32), Renderer::clang());
    k.apply_opt(Opt::upcast(0, 4), true).unwrap();
    let lin = k.linearize().unwrap();
    assert_eq!(count_tag(&lin.uops, OpTag::Store), 4);
    assert_eq!(count_tag(&lin.uops, OpTag::Expand), 0);
}

#[test]
fn reduce_lowers_to_an_accumulator() {
    let k = kernel(row_sum(16, 256), Renderer::clang());
    let lin = k.linearize().unwrap();
    assert_eq!(count_tag(&lin.uops, OpTag::DefineAcc), 1);
    assert_eq!(count_tag(&lin.uops, OpTag::Reduce), 0);
}

#[test]
fn rendering_is_deterministic() {
    let mut k = kernel(row_sum(64, 128), Renderer::gpu());
    for opt in [Opt::upcast(0, 4), Opt::unroll(0, 4)] {
        k.apply_opt(opt, true).unwrap();
    }
    let a = k.to_program_named(&PlainRender, "r").unwrap();
    let b = k.clone().to_program_named(&PlainRender, "r").unwrap();
    assert_eq!(a.src, b.src);
    assert!(a.src.starts_with("kernel r\n"));
    assert_eq!(a.op_estimate, b.op_estimate);
}

#[test]
fn program_name_tracks_the_kernel() {
    let k = kernel(row_sum(16, 256), Renderer::gpu());
    let p = k.to_program(&PlainRender).unwrap();
    assert!(p.name.starts_with('r'), "{}", p.name);
    assert!(p.src.starts_with(&format!("kernel {}\n", p.name)));
}

#[test]
fn base_names_describe_the_kernel() {
    assert_eq!(kernel(row_sum(16, 256), Renderer::gpu()).base_name(), "r_16_256");
    assert_eq!(kernel(elementwise_add(&[64, 64], DType::Float32), Renderer::clang()).base_name(), "E_4096");
    let copy = AstNode::kernel(vec![AstNode::store(0, DType::Float32, st(&[8]), load(1, DType::Float32, &[8]))]);
    assert_eq!(kernel(copy, Renderer::clang()).base_name(), "C_8");
}

#[test]
fn name_is_registered_once_per_kernel() {
    let k = kernel(row_sum(8, 32), Renderer::gpu());
    let name = k.name();
    assert_eq!(k.name(), name);
    assert_eq!(k.clone().name(), name);

    let other = kernel(row_sum(8, 32), Renderer::gpu());
    assert_ne!(other.name(), name);

    let mut upcasted = k.clone();
    upcasted.apply_opt(Opt::upcast(0, 4), true).unwrap();
    assert_ne!(upcasted.name(), name);
    assert!(upcasted.name().starts_with(&upcasted.base_name()));
}
