//! UOp constructors grouped by semantic category.
//!
//! ALU builders do no dtype promotion: the result takes the dtype of the last
//! operand (bool for comparisons), so callers are expected to cast first.

use std::sync::Arc;

use kernc_dtype::{AddrSpace, DType};

use crate::op::Op;
use crate::types::{BinaryOp, ConstValue, ReduceOp, TernaryOp, UnaryOp, WmmaArg};
use crate::uop::UOp;

/// Conversion of plain values into operands.
///
/// Scalars become constants of the other operand's dtype, nodes pass through.
pub trait IntoUOp {
    fn into_uop(self, dtype: &DType) -> Arc<UOp>;
}

impl IntoUOp for Arc<UOp> {
    fn into_uop(self, _dtype: &DType) -> Arc<UOp> {
        self
    }
}

impl IntoUOp for &Arc<UOp> {
    fn into_uop(self, _dtype: &DType) -> Arc<UOp> {
        self.clone()
    }
}

impl IntoUOp for ConstValue {
    fn into_uop(self, dtype: &DType) -> Arc<UOp> {
        UOp::const_(dtype.clone(), self)
    }
}

impl IntoUOp for i64 {
    fn into_uop(self, dtype: &DType) -> Arc<UOp> {
        UOp::const_(dtype.clone(), ConstValue::Int(self))
    }
}

impl IntoUOp for f64 {
    fn into_uop(self, dtype: &DType) -> Arc<UOp> {
        UOp::const_(dtype.clone(), ConstValue::Float(self))
    }
}

impl IntoUOp for bool {
    fn into_uop(self, dtype: &DType) -> Arc<UOp> {
        UOp::const_(dtype.clone(), ConstValue::Bool(self))
    }
}

// =========================================================================
// Macro Definitions
// =========================================================================

macro_rules! unary_ops {
    ($($method:ident => $op:ident),+ $(,)?) => {
        $(
            pub fn $method(self: &Arc<Self>) -> Arc<Self> {
                Self::new(Op::Unary(UnaryOp::$op), self.dtype(), [self.clone()])
            }
        )+
    };
}

macro_rules! binary_ops {
    ($($method:ident => $op:ident),+ $(,)?) => {
        $(
            pub fn $method(self: &Arc<Self>, rhs: impl IntoUOp) -> Arc<Self> {
                self.alu(BinaryOp::$op, rhs.into_uop(&self.dtype))
            }
        )+
    };
}

impl UOp {
    // =========================================================================
    // Data
    // =========================================================================

    /// Constant of `dtype`, normalized to it (wrapping, truncation, rounding).
    ///
    /// Vector dtypes broadcast the value to every lane.
    pub fn const_(dtype: DType, value: impl Into<ConstValue>) -> Arc<Self> {
        let value = value.into();
        let value = value.cast(&dtype).unwrap_or(value);
        Self::new(Op::Const(value), dtype, [])
    }

    /// Constant with the dtype of `self`.
    pub fn const_like(self: &Arc<Self>, value: impl Into<ConstValue>) -> Arc<Self> {
        Self::const_(self.dtype(), value)
    }

    pub fn index_const(value: i64) -> Arc<Self> {
        Self::const_(DType::BigInt, value)
    }

    // =========================================================================
    // Graph organization
    // =========================================================================

    pub fn sink(sources: impl IntoIterator<Item = Arc<UOp>>) -> Arc<Self> {
        Self::new(Op::Sink, DType::Void, sources)
    }

    pub fn noop() -> Arc<Self> {
        Self::new(Op::Noop, DType::Void, [])
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    /// Kernel buffer parameter. Images keep their image dtype, everything else
    /// is addressed through a global pointer.
    pub fn define_global(idx: usize, dtype: DType, writable: bool) -> Arc<Self> {
        let dtype = if dtype.is_image() { dtype } else { dtype.ptr(AddrSpace::Global) };
        Self::new(Op::DefineGlobal { idx, writable }, dtype, [])
    }

    pub fn define_local(name: impl Into<String>, dtype: DType, size: usize) -> Arc<Self> {
        Self::new(Op::DefineLocal { name: name.into(), size }, dtype.ptr(AddrSpace::Local), [])
    }

    /// Accumulator `num` initialized to `init` and live across `ranges`.
    pub fn define_acc(num: usize, init: Arc<UOp>, ranges: impl IntoIterator<Item = Arc<UOp>>) -> Arc<Self> {
        let dtype = init.dtype();
        Self::new(Op::DefineAcc(num), dtype, std::iter::once(init).chain(ranges))
    }

    pub fn special(dim: usize, name: impl Into<String>, size: usize) -> Arc<Self> {
        Self::new(Op::Special { dim, name: name.into(), size }, DType::BigInt, [])
    }

    /// Loop counter over `[0, end)`.
    pub fn range(axis: usize, end: i64, reduce: bool) -> Arc<Self> {
        Self::new(Op::Range { axis, reduce }, DType::BigInt, [Self::index_const(0), Self::index_const(end)])
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    pub fn if_(condition: Arc<UOp>, barrier: Arc<UOp>) -> Arc<Self> {
        Self::new(Op::If, DType::Void, [condition, barrier])
    }

    pub fn barrier(sources: impl IntoIterator<Item = Arc<UOp>>) -> Arc<Self> {
        Self::new(Op::Barrier, DType::Void, sources)
    }

    // =========================================================================
    // Memory
    // =========================================================================

    pub fn load(dtype: DType, buffer: Arc<UOp>, idx: Arc<UOp>) -> Arc<Self> {
        Self::new(Op::Load, dtype, [buffer, idx])
    }

    /// Load that yields `alt` where `gate` is false.
    pub fn load_gated(dtype: DType, buffer: Arc<UOp>, idx: Arc<UOp>, gate: Arc<UOp>, alt: Arc<UOp>) -> Arc<Self> {
        Self::new(Op::Load, dtype, [buffer, idx, gate, alt])
    }

    pub fn store(buffer: Arc<UOp>, idx: Arc<UOp>, value: Arc<UOp>) -> Arc<Self> {
        Self::new(Op::Store, DType::Void, [buffer, idx, value])
    }

    pub fn store_gated(buffer: Arc<UOp>, idx: Arc<UOp>, value: Arc<UOp>, gate: Arc<UOp>) -> Arc<Self> {
        Self::new(Op::Store, DType::Void, [buffer, idx, value, gate])
    }

    pub fn phi(acc: Arc<UOp>, value: Arc<UOp>) -> Arc<Self> {
        let dtype = acc.dtype();
        Self::new(Op::Phi, dtype, [acc, value])
    }

    // =========================================================================
    // ALU
    // =========================================================================

    /// Binary ALU node. Comparisons produce bool, the rest keep the rhs dtype.
    pub fn alu(self: &Arc<Self>, op: BinaryOp, rhs: Arc<UOp>) -> Arc<Self> {
        let dtype = if op.is_comparison() { DType::Bool.vec(self.dtype.count()) } else { rhs.dtype() };
        Self::new(Op::Binary(op), dtype, [self.clone(), rhs])
    }

    unary_ops! {
        neg => Neg,
        exp2 => Exp2,
        log2 => Log2,
        sin => Sin,
        sqrt => Sqrt,
        recip => Recip,
    }

    binary_ops! {
        add => Add,
        sub => Sub,
        mul => Mul,
        idiv => Idiv,
        fdiv => Fdiv,
        max => Max,
        mod_ => Mod,
        cmp_lt => CmpLt,
        cmp_ne => CmpNe,
        xor => Xor,
        and => And,
        or => Or,
        shl => Shl,
        shr => Shr,
        threefry => Threefry,
    }

    /// `self == rhs`, built as the negation of `!=`.
    pub fn cmp_eq(self: &Arc<Self>, rhs: impl IntoUOp) -> Arc<Self> {
        self.cmp_ne(rhs).neg()
    }

    /// `self >= rhs`, built as the negation of `<`.
    pub fn cmp_ge(self: &Arc<Self>, rhs: impl IntoUOp) -> Arc<Self> {
        self.cmp_lt(rhs).neg()
    }

    /// `self ? t : f` with `self` as the bool condition.
    pub fn where_(self: &Arc<Self>, t: Arc<UOp>, f: impl IntoUOp) -> Arc<Self> {
        let f = f.into_uop(&t.dtype);
        let dtype = f.dtype();
        Self::new(Op::Ternary(TernaryOp::Where), dtype, [self.clone(), t, f])
    }

    pub fn mulacc(self: &Arc<Self>, b: Arc<UOp>, c: Arc<UOp>) -> Arc<Self> {
        let dtype = c.dtype();
        Self::new(Op::Ternary(TernaryOp::MulAcc), dtype, [self.clone(), b, c])
    }

    /// Value conversion. Casting to the same dtype returns `self`.
    pub fn cast(self: &Arc<Self>, dtype: DType) -> Arc<Self> {
        if self.dtype == dtype {
            return self.clone();
        }
        Self::new(Op::Cast, dtype, [self.clone()])
    }

    pub fn bitcast(self: &Arc<Self>, dtype: DType) -> Arc<Self> {
        Self::new(Op::BitCast, dtype, [self.clone()])
    }

    // =========================================================================
    // Vector
    // =========================================================================

    /// Lane `i` of a vector value.
    pub fn gep(self: &Arc<Self>, i: usize) -> Arc<Self> {
        Self::new(Op::Gep(i), self.dtype.scalar_dtype(), [self.clone()])
    }

    pub fn vectorize(dtype: DType, lanes: impl IntoIterator<Item = Arc<UOp>>) -> Arc<Self> {
        Self::new(Op::Vectorize, dtype, lanes)
    }

    // =========================================================================
    // Expansion and reduction
    // =========================================================================

    pub fn expand(dtype: DType, lanes: impl IntoIterator<Item = Arc<UOp>>, axes: Vec<(usize, usize)>) -> Arc<Self> {
        Self::new(Op::Expand(axes), dtype, lanes)
    }

    pub fn contract(self: &Arc<Self>, dtype: DType, axes: Vec<usize>) -> Arc<Self> {
        Self::new(Op::Contract(axes), dtype, [self.clone()])
    }

    /// Reduction of `self` over the given ranges.
    pub fn reduce(self: &Arc<Self>, op: ReduceOp, ranges: impl IntoIterator<Item = Arc<UOp>>) -> Arc<Self> {
        Self::new(Op::Reduce(op), self.dtype(), std::iter::once(self.clone()).chain(ranges))
    }

    pub fn wmma(dtype: DType, a: Arc<UOp>, b: Arc<UOp>, c: Arc<UOp>, arg: WmmaArg) -> Arc<Self> {
        Self::new(Op::Wmma(Arc::new(arg)), dtype, [a, b, c])
    }

    pub fn unmul(self: &Arc<Self>, scale: Arc<UOp>) -> Arc<Self> {
        Self::new(Op::Unmul, self.dtype(), [self.clone(), scale])
    }
}
