//! Operation and memory traffic estimates over a linear instruction list.

use std::collections::HashSet;
use std::sync::Arc;

use kernc_ir::{Op, TernaryOp, UOp};

fn const_extent(u: &UOp) -> Option<i64> {
    u.const_value().and_then(|v| v.as_i64())
}

/// Count ALU operations and bytes loaded or stored by `uops`.
///
/// Loop bodies are weighted by their trip count and SPECIAL dims by their
/// size. With `ignore_indexing` the address and gate computations of loads,
/// stores and IFs are not counted.
pub fn flops_mem(uops: &[Arc<UOp>], ignore_indexing: bool) -> (u64, u64) {
    let mut flops: u64 = 0;
    let mut mem: u64 = 0;
    let mut mults: u64 = 1;
    let mut mult_stack: Vec<u64> = Vec::new();

    let mut dont_count: HashSet<u64> = HashSet::new();
    if ignore_indexing {
        for u in uops {
            // address and gate operands
            let skipped: &[usize] = match u.op() {
                Op::Load if u.src().len() > 3 => &[1, 2],
                Op::Store if u.src().len() > 3 => &[1, 3],
                Op::Load | Op::Store => &[1],
                Op::If => &[0],
                _ => &[],
            };
            for x in skipped.iter().filter_map(|&i| u.src().get(i)) {
                dont_count.extend(x.sparents());
            }
        }
    }

    for u in uops {
        match u.op() {
            Op::Range { .. } => {
                mult_stack.push(mults);
                let trip = match u.src() {
                    [start, end, ..] => const_extent(end).zip(const_extent(start)).map(|(e, s)| e - s),
                    _ => None,
                };
                mults *= trip.map_or(1, |t| t.max(0) as u64);
            }
            Op::EndRange => mults = mult_stack.pop().unwrap_or(1),
            Op::Special { size, .. } => mults *= *size as u64,
            Op::Load => mem += u.dtype_ref().bytes() as u64 * mults,
            Op::Store => mem += u.src().get(2).map_or(0, |v| v.dtype_ref().bytes()) as u64 * mults,
            op if op.is_alu() && !dont_count.contains(&u.id) => {
                let weight = if matches!(op, Op::Ternary(TernaryOp::MulAcc)) { 2 } else { 1 };
                flops += mults * weight * u.dtype_ref().count() as u64;
            }
            Op::Wmma(arg) if !dont_count.contains(&u.id) => {
                let threads = (arg.dims[0] * arg.dims[1] / arg.sizes[2].max(1)).max(1);
                let per_thread = 2 * arg.dims.iter().product::<usize>() / threads;
                flops += per_thread as u64 * mults;
            }
            _ => {}
        }
    }
    (flops, mem)
}
