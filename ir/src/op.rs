//! Operation enum and implementation.
//!
//! The [`Op`] enum carries the operation kind together with its argument.
//! Sources live on the [`UOp`](crate::UOp) itself so that rewriting a node
//! only ever swaps its source list.

use std::sync::Arc;

use crate::types::*;

/// Operation kind with its typed argument.
///
/// `Op` is plain data: equality and hashing are structural, which is what
/// hash-consing keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[derive(strum::EnumDiscriminants)]
#[strum_discriminants(name(OpTag))]
#[strum_discriminants(derive(Hash, PartialOrd, Ord, strum::Display))]
#[strum_discriminants(strum(serialize_all = "SCREAMING_SNAKE_CASE"))]
pub enum Op {
    // Graph organization
    Sink,
    Noop,

    // Definitions
    /// Kernel buffer parameter. Output buffers are writable.
    DefineGlobal { idx: usize, writable: bool },
    /// Workgroup-shared scratch buffer of `size` elements.
    DefineLocal { name: String, size: usize },
    /// Reduction accumulator. `src = (initial const, ranges...)`.
    DefineAcc(usize),
    Const(ConstValue),
    /// Launch dimension index: `dim` is the grid axis, `size` its extent.
    Special { dim: usize, name: String, size: usize },

    // Control flow
    /// Loop counter over `[src[0], src[1])`. `axis` is the kernel axis it came
    /// from, `reduce` marks loops that only exist to feed an accumulator.
    Range { axis: usize, reduce: bool },
    EndRange,
    If,
    EndIf,
    Barrier,

    // Memory
    /// `src = (buf, idx, [gate, alt], [barrier])`
    Load,
    /// `src = (buf, idx, val, [gate])`
    Store,
    /// Accumulator update, `src = (acc, value)`.
    Phi,

    // ALU
    Unary(UnaryOp),
    Binary(BinaryOp),
    Ternary(TernaryOp),
    Cast,
    BitCast,

    // Vector
    Gep(usize),
    Vectorize,

    // Expansion
    /// Symbolic lane dimension over the listed `(axis, size)` pairs.
    Expand(Vec<(usize, usize)>),
    /// Gathers the listed axes of an `Expand` source into a vector.
    Contract(Vec<usize>),
    Reduce(ReduceOp),
    Wmma(Arc<WmmaArg>),
    /// Marks an arange-folded value: `src = (value, scale)`.
    Unmul,
}

impl Op {
    pub fn tag(&self) -> OpTag {
        OpTag::from(self)
    }

    pub fn is_alu(&self) -> bool {
        matches!(self, Self::Unary(_) | Self::Binary(_) | Self::Ternary(_))
    }

    /// Ops that open a scope which the linearizer must close.
    pub fn end_for(&self) -> Option<OpTag> {
        match self {
            Self::Range { .. } => Some(OpTag::EndRange),
            Self::If => Some(OpTag::EndIf),
            _ => None,
        }
    }

    /// The op that marks the end of the scope, for the linearizer's
    /// scope-children walk.
    pub fn scope_end_op(&self) -> Option<OpTag> {
        match self {
            Self::Range { .. } => Some(OpTag::Phi),
            Self::If => Some(OpTag::Store),
            _ => None,
        }
    }
}

impl OpTag {
    /// Ops that open a scope.
    pub fn is_scope_start(self) -> bool {
        matches!(self, Self::Range | Self::If)
    }
}
