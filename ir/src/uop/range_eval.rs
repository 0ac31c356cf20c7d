//! Integer range analysis.
//!
//! [`UOp::bounds`] gives an inclusive `(min, max)` interval for integer and
//! bool expressions built from constants, launch indices and loop counters.
//! Anything it cannot reason about yields `None`.

use std::sync::Arc;

use crate::op::Op;
use crate::types::{BinaryOp, TernaryOp, UnaryOp};
use crate::uop::UOp;

fn add(a: (i64, i64), b: (i64, i64)) -> Option<(i64, i64)> {
    Some((a.0.checked_add(b.0)?, a.1.checked_add(b.1)?))
}

fn mul(a: (i64, i64), b: (i64, i64)) -> Option<(i64, i64)> {
    let corners = [a.0.checked_mul(b.0)?, a.0.checked_mul(b.1)?, a.1.checked_mul(b.0)?, a.1.checked_mul(b.1)?];
    Some((*corners.iter().min()?, *corners.iter().max()?))
}

impl UOp {
    /// Inclusive integer bounds of this expression.
    pub fn bounds(self: &Arc<Self>) -> Option<(i64, i64)> {
        if let Some(cached) = self.bounds_cache.get() {
            return *cached;
        }
        // Compute children first so deep expressions never recurse far.
        for node in self.toposort() {
            if node.bounds_cache.get().is_none() {
                let b = node.compute_bounds();
                let _ = node.bounds_cache.set(b);
            }
        }
        self.bounds_cache.get().copied().flatten()
    }

    pub fn vmin(self: &Arc<Self>) -> Option<i64> {
        self.bounds().map(|b| b.0)
    }

    pub fn vmax(self: &Arc<Self>) -> Option<i64> {
        self.bounds().map(|b| b.1)
    }

    fn cached_bounds(&self, i: usize) -> Option<(i64, i64)> {
        self.src.get(i).and_then(|s| s.bounds_cache.get().copied().flatten())
    }

    fn compute_bounds(&self) -> Option<(i64, i64)> {
        if self.dtype.is_float() || self.dtype.is_vector() || self.dtype.is_ptr() {
            return None;
        }
        match &self.op {
            Op::Const(c) => {
                let v = c.as_i64()?;
                Some((v, v))
            }
            Op::Special { size, .. } => Some((0, (*size as i64).checked_sub(1)?)),
            Op::Range { .. } => {
                let start = self.src.first()?.const_value()?.as_i64()?;
                let end = self.src.get(1)?.const_value()?.as_i64()?;
                (end > start).then_some((start, end - 1))
            }
            Op::Cast => {
                let b = self.cached_bounds(0)?;
                let s = self.dtype.base();
                if s.is_bool() {
                    return Some(((b.0 > 0 || b.1 < 0) as i64, (b.0 != 0 || b.1 != 0) as i64));
                }
                if s.is_int() && s.bits() < 64 {
                    let (lo, hi) = if s.is_signed() {
                        (-(1i64 << (s.bits() - 1)), (1i64 << (s.bits() - 1)) - 1)
                    } else {
                        (0, (1i64 << s.bits()) - 1)
                    };
                    // Out-of-range values wrap; only pass through when they fit.
                    return if b.0 >= lo && b.1 <= hi { Some(b) } else { Some((lo, hi)) };
                }
                Some(b)
            }
            Op::Unary(UnaryOp::Neg) => {
                let b = self.cached_bounds(0)?;
                if self.dtype.is_bool() {
                    return Some((1 - b.1, 1 - b.0));
                }
                Some((b.1.checked_neg()?, b.0.checked_neg()?))
            }
            Op::Binary(op) => {
                let a = self.cached_bounds(0)?;
                let b = self.cached_bounds(1)?;
                match op {
                    BinaryOp::Add => add(a, b),
                    BinaryOp::Sub => add(a, (b.1.checked_neg()?, b.0.checked_neg()?)),
                    BinaryOp::Mul => mul(a, b),
                    BinaryOp::Max => Some((a.0.max(b.0), a.1.max(b.1))),
                    BinaryOp::Idiv if b.0 == b.1 && b.0 > 0 => {
                        // Truncating division is monotone for a positive divisor.
                        Some((a.0 / b.0, a.1 / b.0))
                    }
                    BinaryOp::Mod if b.0 == b.1 && b.0 > 0 => {
                        let c = b.0;
                        if a.0 >= 0 && a.1 / c == a.0 / c {
                            Some((a.0 % c, a.1 % c))
                        } else if a.0 >= 0 {
                            Some((0, (c - 1).min(a.1)))
                        } else {
                            Some((-(c - 1), c - 1))
                        }
                    }
                    BinaryOp::CmpLt => {
                        if a.1 < b.0 {
                            Some((1, 1))
                        } else if a.0 >= b.1 {
                            Some((0, 0))
                        } else {
                            Some((0, 1))
                        }
                    }
                    BinaryOp::CmpNe => {
                        if a.1 < b.0 || b.1 < a.0 {
                            Some((1, 1))
                        } else if a.0 == a.1 && b.0 == b.1 && a.0 == b.0 {
                            Some((0, 0))
                        } else {
                            Some((0, 1))
                        }
                    }
                    BinaryOp::And if self.dtype.is_bool() => Some((a.0.min(b.0), a.1.min(b.1))),
                    BinaryOp::Or if self.dtype.is_bool() => Some((a.0.max(b.0), a.1.max(b.1))),
                    _ => None,
                }
            }
            Op::Ternary(TernaryOp::Where) => {
                let c = self.cached_bounds(0)?;
                let t = self.cached_bounds(1)?;
                let f = self.cached_bounds(2)?;
                match c {
                    (1, 1) => Some(t),
                    (0, 0) => Some(f),
                    _ => Some((t.0.min(f.0), t.1.max(f.1))),
                }
            }
            _ => None,
        }
    }
}
