//! Inline expansion of the threefry2x32 mixing op into 32-bit integer ALU.

use std::sync::Arc;

use kernc_ir::{DType, UOp};

const ROTATIONS: [[u32; 4]; 2] = [[13, 15, 26, 6], [17, 29, 16, 24]];
const KEY_PARITY: i64 = 0x1BD1_1BDA;

/// Expand `threefry(x, seed)` over uint64 into its five-round mixing
/// schedule. Rotations are built from multiply, divide and add so the result
/// folds like any other integer expression.
pub fn expand_threefry(x: &Arc<UOp>, seed: &Arc<UOp>) -> Arc<UOp> {
    let x0 = x.and(0xffff_ffffi64).cast(DType::UInt32);
    let x1 = x.idiv(1i64 << 32).and(0xffff_ffffi64).cast(DType::UInt32);

    let seed = seed.cast(DType::UInt32);
    let ks = [UOp::const_(DType::UInt32, 0i64), seed.xor(KEY_PARITY), seed];
    let mut xr = [x0.add(&ks[2]), x1.add(&ks[0])];

    for i in 0..5 {
        for r in ROTATIONS[i % 2] {
            let mixed = xr[0].add(&xr[1]);
            let rotated = xr[1].mul(1i64 << r).add(xr[1].idiv(1i64 << (32 - r)));
            xr = [mixed.clone(), mixed.xor(rotated)];
        }
        xr = [xr[0].add(&ks[i % 3]), xr[1].add(&ks[(i + 1) % 3]).add((i + 1) as i64)];
    }

    xr[1].cast(DType::UInt64).mul(1i64 << 32).or(xr[0].cast(DType::UInt64))
}
