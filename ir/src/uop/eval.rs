//! Constant evaluation of ALU operations.
//!
//! Evaluation happens at the widest representation of the operands and the
//! result is then normalized to the result dtype, so integer arithmetic wraps
//! exactly like the target would.

use kernc_dtype::DType;

use crate::op::Op;
use crate::types::{BinaryOp, ConstValue, TernaryOp, UnaryOp};

/// Threefry2x32 with 20 rounds over a 64-bit counter.
///
/// The counter is split into two 32-bit words, the seed is truncated to 32
/// bits. The two mixed words are packed back high-word first.
pub fn threefry2x32(x: u64, seed: u64) -> u64 {
    const ROTATIONS: [[u32; 4]; 2] = [[13, 15, 26, 6], [17, 29, 16, 24]];

    let seed = seed as u32;
    let ks = [0u32, seed ^ 0x1BD1_1BDA, seed];
    let mut xr = [(x as u32).wrapping_add(ks[2]), ((x >> 32) as u32).wrapping_add(ks[0])];
    for i in 0..5u32 {
        for r in ROTATIONS[(i % 2) as usize] {
            let x0 = xr[0].wrapping_add(xr[1]);
            xr = [x0, x0 ^ xr[1].rotate_left(r)];
        }
        xr = [
            xr[0].wrapping_add(ks[(i % 3) as usize]),
            xr[1].wrapping_add(ks[((i + 1) % 3) as usize]).wrapping_add(i + 1),
        ];
    }
    ((xr[1] as u64) << 32) | xr[0] as u64
}

#[derive(Clone, Copy)]
enum Domain {
    Float,
    Int,
}

fn domain(operands: &[ConstValue]) -> Domain {
    if operands.iter().any(|v| matches!(v, ConstValue::Float(_))) { Domain::Float } else { Domain::Int }
}

fn as_i128(v: &ConstValue) -> i128 {
    match *v {
        ConstValue::Int(x) => x as i128,
        ConstValue::UInt(x) => x as i128,
        ConstValue::Bool(x) => x as i128,
        ConstValue::Float(x) => x as i128,
    }
}

fn int_result(v: i128) -> ConstValue {
    // Keep the low 64 bits; the final cast narrows further.
    if v >= 0 && v > i64::MAX as i128 { ConstValue::UInt(v as u64) } else { ConstValue::Int(v as i64) }
}

fn exec_unary(op: UnaryOp, x: &ConstValue) -> Option<ConstValue> {
    if let (UnaryOp::Neg, ConstValue::Bool(b)) = (op, x) {
        return Some(ConstValue::Bool(!b));
    }
    if let (UnaryOp::Neg, Domain::Int) = (op, domain(std::slice::from_ref(x))) {
        return Some(int_result(as_i128(x).wrapping_neg()));
    }
    let v = x.as_f64();
    let r = match op {
        UnaryOp::Neg => -v,
        UnaryOp::Exp2 => v.exp2(),
        UnaryOp::Log2 => {
            if v > 0.0 {
                v.log2()
            } else if v == 0.0 {
                f64::NEG_INFINITY
            } else {
                f64::NAN
            }
        }
        UnaryOp::Sin => v.sin(),
        UnaryOp::Sqrt => {
            if v >= 0.0 {
                v.sqrt()
            } else {
                f64::NAN
            }
        }
        UnaryOp::Recip => {
            if v != 0.0 {
                1.0 / v
            } else {
                f64::INFINITY.copysign(v)
            }
        }
    };
    Some(ConstValue::Float(r))
}

fn exec_binary(op: BinaryOp, a: &ConstValue, b: &ConstValue) -> Option<ConstValue> {
    let both = [*a, *b];
    match (op, domain(&both)) {
        (BinaryOp::CmpLt, Domain::Float) => Some(ConstValue::Bool(a.as_f64() < b.as_f64())),
        (BinaryOp::CmpNe, Domain::Float) => Some(ConstValue::Bool(a.as_f64() != b.as_f64())),
        (BinaryOp::CmpLt, Domain::Int) => Some(ConstValue::Bool(as_i128(a) < as_i128(b))),
        (BinaryOp::CmpNe, Domain::Int) => Some(ConstValue::Bool(as_i128(a) != as_i128(b))),

        (BinaryOp::Add, Domain::Float) => Some(ConstValue::Float(a.as_f64() + b.as_f64())),
        (BinaryOp::Sub, Domain::Float) => Some(ConstValue::Float(a.as_f64() - b.as_f64())),
        (BinaryOp::Mul, Domain::Float) => Some(ConstValue::Float(a.as_f64() * b.as_f64())),
        (BinaryOp::Fdiv, _) => Some(ConstValue::Float(a.as_f64() / b.as_f64())),
        (BinaryOp::Max, Domain::Float) => Some(ConstValue::Float(a.as_f64().max(b.as_f64()))),
        (BinaryOp::Idiv, Domain::Float) => {
            let d = b.as_f64();
            if d == 0.0 {
                return None;
            }
            Some(ConstValue::Float((a.as_f64() / d).trunc()))
        }
        (BinaryOp::Mod, Domain::Float) => {
            let (x, y) = (a.as_f64() as i64, b.as_f64() as i64);
            if y == 0 {
                return None;
            }
            Some(ConstValue::Float((x % y) as f64))
        }
        (BinaryOp::Xor | BinaryOp::And | BinaryOp::Or | BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Threefry, Domain::Float) => {
            None
        }

        (BinaryOp::Threefry, Domain::Int) => {
            Some(ConstValue::UInt(threefry2x32(as_i128(a) as u64, as_i128(b) as u64)))
        }
        (_, Domain::Int) => {
            let (x, y) = (as_i128(a), as_i128(b));
            let r = match op {
                BinaryOp::Add => x.wrapping_add(y),
                BinaryOp::Sub => x.wrapping_sub(y),
                BinaryOp::Mul => x.wrapping_mul(y),
                BinaryOp::Max => x.max(y),
                BinaryOp::Idiv => x.checked_div(y)?,
                BinaryOp::Mod => x.checked_rem(y)?,
                BinaryOp::Xor => x ^ y,
                BinaryOp::And => x & y,
                BinaryOp::Or => x | y,
                BinaryOp::Shl => {
                    let s = u32::try_from(y).ok()?;
                    if s >= 128 { 0 } else { x.wrapping_shl(s) }
                }
                BinaryOp::Shr => {
                    let s = u32::try_from(y).ok()?;
                    x >> s.min(127)
                }
                _ => return None,
            };
            Some(int_result(r))
        }
    }
}

fn exec_ternary(op: TernaryOp, a: &ConstValue, b: &ConstValue, c: &ConstValue) -> Option<ConstValue> {
    match op {
        TernaryOp::Where => Some(if a.truthy() { *b } else { *c }),
        TernaryOp::MulAcc => {
            let prod = exec_binary(BinaryOp::Mul, a, b)?;
            exec_binary(BinaryOp::Add, &prod, c)
        }
    }
}

/// Evaluate an ALU `op` over constant operands and normalize to `dtype`.
///
/// Returns `None` when the op is not an ALU op, the arity is wrong, or the
/// result is undefined (integer division by zero, bit ops on floats).
pub fn exec_alu(op: &Op, dtype: &DType, operands: &[ConstValue]) -> Option<ConstValue> {
    let raw = match (op, operands) {
        (Op::Unary(u), [x]) => exec_unary(*u, x)?,
        (Op::Binary(b), [x, y]) => exec_binary(*b, x, y)?,
        (Op::Ternary(t), [x, y, z]) => exec_ternary(*t, x, y, z)?,
        _ => return None,
    };
    raw.cast(dtype)
}
