//! UPat pattern matching DSL.
//!
//! UPat provides a pattern matching language for UOp graphs, similar to
//! regular expressions but for tree structures. It supports:
//!
//! - Wildcard matching (`UPat::var("x")` matches any UOp)
//! - Operation type matching (`UPat::op(OpTag::Load)`)
//! - Constant matching (`UPat::cvar("c")`, `UPat::cnst(0)`)
//! - Named captures; a name used twice must bind the same node
//! - Source structure matching (exact, prefix, repeat and permuted lists)
//! - Argument matching (exact op payload or a predicate)
//!
//! Binary ALU patterns over commutative ops match either operand order.
//!
//! # Example
//!
//! ```ignore
//! // Match: x + 0 (either operand order)
//! let pat = UPat::var("x") + 0;
//! ```

use std::ops::{Add, BitAnd, BitOr, BitXor, Div, Mul, Neg, Rem, Shl, Shr, Sub};
use std::sync::Arc;

use kernc_dtype::DType;
use smallvec::SmallVec;

use crate::op::{Op, OpTag};
use crate::types::{BinaryOp, ConstValue, TernaryOp, UnaryOp};
use crate::UOp;

/// Named captures of one successful match.
#[derive(Debug, Clone, Default)]
pub struct Bindings(SmallVec<[(&'static str, Arc<UOp>); 6]>);

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&Arc<UOp>> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, u)| u)
    }

    /// Bind `name`, or check that it is already bound to the same node.
    fn bind(&mut self, name: &'static str, uop: &Arc<UOp>) -> bool {
        match self.get(name) {
            Some(existing) => existing.id == uop.id,
            None => {
                self.0.push((name, uop.clone()));
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Filter for matching operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpFilter {
    /// Any op with this tag.
    Tag(OpTag),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Ternary(TernaryOp),
}

impl OpFilter {
    fn matches(&self, op: &Op) -> bool {
        match (self, op) {
            (Self::Tag(t), _) => *t == op.tag(),
            (Self::Unary(a), Op::Unary(b)) => a == b,
            (Self::Binary(a), Op::Binary(b)) => a == b,
            (Self::Ternary(a), Op::Ternary(b)) => a == b,
            _ => false,
        }
    }
}

/// Pattern for matching UOp source lists.
#[derive(Debug, Clone)]
pub enum SrcPattern {
    /// Exactly these sources, in order.
    Tuple(Vec<UPat>),
    /// At least these sources; extra trailing sources are ignored.
    Prefix(Vec<UPat>),
    /// Exactly these sources, in any order.
    Permute(Vec<UPat>),
    /// Every source matches the same pattern.
    Repeat(Box<UPat>),
}

/// Predicate over the op payload.
pub type ArgPredicate = Arc<dyn Fn(&Op) -> bool + Send + Sync>;

/// Pattern for matching operation arguments/data.
#[derive(Clone)]
pub enum ArgPattern {
    /// Constant value, compared numerically.
    Const(ConstValue),
    /// The whole op must be equal, e.g. `Op::Gep(0)`.
    Exact(Op),
    Predicate(ArgPredicate),
}

impl std::fmt::Debug for ArgPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Const(c) => write!(f, "Const({c})"),
            Self::Exact(op) => write!(f, "Exact({op:?})"),
            Self::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

impl ArgPattern {
    fn matches(&self, op: &Op) -> bool {
        match (self, op) {
            (Self::Const(c), Op::Const(v)) => c.value_eq(v),
            (Self::Const(_), _) => false,
            (Self::Exact(want), op) => want == op,
            (Self::Predicate(f), op) => f(op),
        }
    }
}

/// Pattern for matching UOp graphs.
///
/// `None` in a [`UPat::Match`] field means no constraint.
#[derive(Debug, Clone)]
pub enum UPat {
    Match {
        op: Option<SmallVec<[OpFilter; 2]>>,
        dtype: Option<Vec<DType>>,
        src: Option<SrcPattern>,
        arg: Option<ArgPattern>,
        name: Option<&'static str>,
    },
    /// Match any of the provided patterns (OR logic).
    Any(Vec<UPat>),
}

/// Conversion of literals into constant patterns, for operator overloads.
pub trait IntoUPat {
    fn into_upat(self) -> UPat;
}

impl IntoUPat for UPat {
    fn into_upat(self) -> UPat {
        self
    }
}

impl IntoUPat for i64 {
    fn into_upat(self) -> UPat {
        UPat::cnst(ConstValue::Int(self))
    }
}

impl IntoUPat for f64 {
    fn into_upat(self) -> UPat {
        UPat::cnst(ConstValue::Float(self))
    }
}

impl IntoUPat for bool {
    fn into_upat(self) -> UPat {
        UPat::cnst(ConstValue::Bool(self))
    }
}

macro_rules! impl_upat_ops {
    (
        binary: [ $(($Trait:ident, $method:ident, $op:ident)),* $(,)? ],
    ) => {
        $(
            impl<T: IntoUPat> $Trait<T> for UPat {
                type Output = UPat;
                fn $method(self, rhs: T) -> UPat {
                    UPat::binary(BinaryOp::$op, self, rhs.into_upat())
                }
            }
        )*
    };
}

impl_upat_ops! {
    binary: [
        (Add, add, Add),
        (Sub, sub, Sub),
        (Mul, mul, Mul),
        (Div, div, Fdiv),
        (Rem, rem, Mod),
        (BitAnd, bitand, And),
        (BitOr, bitor, Or),
        (BitXor, bitxor, Xor),
        (Shl, shl, Shl),
        (Shr, shr, Shr),
    ],
}

impl Neg for UPat {
    type Output = UPat;
    fn neg(self) -> UPat {
        UPat::unary(UnaryOp::Neg, self)
    }
}

impl UPat {
    // ===== Constructors =====

    fn empty() -> Self {
        UPat::Match { op: None, dtype: None, src: None, arg: None, name: None }
    }

    /// Wildcard bound to `name`.
    pub fn var(name: &'static str) -> Self {
        Self::empty().named(name)
    }

    /// Wildcard without a name.
    pub fn any_node() -> Self {
        Self::empty()
    }

    /// Any op with the given tag.
    pub fn op(tag: OpTag) -> Self {
        Self::ops(&[tag])
    }

    /// Any op with one of the given tags.
    pub fn ops(tags: &[OpTag]) -> Self {
        UPat::Match {
            op: Some(tags.iter().map(|t| OpFilter::Tag(*t)).collect()),
            dtype: None,
            src: None,
            arg: None,
            name: None,
        }
    }

    /// Any constant, bound to `name`.
    pub fn cvar(name: &'static str) -> Self {
        Self::op(OpTag::Const).named(name)
    }

    /// A constant equal (numerically) to `value`.
    pub fn cnst(value: impl Into<ConstValue>) -> Self {
        Self::op(OpTag::Const).with_arg(ArgPattern::Const(value.into()))
    }

    /// Exactly this op payload, e.g. `Op::Gep(1)`.
    pub fn exact(op: Op) -> Self {
        Self::op(op.tag()).with_arg(ArgPattern::Exact(op))
    }

    pub fn unary(op: UnaryOp, src: UPat) -> Self {
        UPat::Match {
            op: Some(smallvec::smallvec![OpFilter::Unary(op)]),
            dtype: None,
            src: Some(SrcPattern::Tuple(vec![src])),
            arg: None,
            name: None,
        }
    }

    /// Binary ALU pattern. Commutative ops accept either operand order.
    pub fn binary(op: BinaryOp, lhs: UPat, rhs: UPat) -> Self {
        let src = if op.is_commutative() {
            SrcPattern::Permute(vec![lhs, rhs])
        } else {
            SrcPattern::Tuple(vec![lhs, rhs])
        };
        UPat::Match {
            op: Some(smallvec::smallvec![OpFilter::Binary(op)]),
            dtype: None,
            src: Some(src),
            arg: None,
            name: None,
        }
    }

    pub fn ternary(op: TernaryOp, a: UPat, b: UPat, c: UPat) -> Self {
        UPat::Match {
            op: Some(smallvec::smallvec![OpFilter::Ternary(op)]),
            dtype: None,
            src: Some(SrcPattern::Tuple(vec![a, b, c])),
            arg: None,
            name: None,
        }
    }

    /// Any ALU op (unary, binary or ternary).
    pub fn alu() -> Self {
        Self::ops(&[OpTag::Unary, OpTag::Binary, OpTag::Ternary])
    }

    /// Match any of the provided patterns (OR logic).
    pub fn any(patterns: Vec<UPat>) -> Self {
        UPat::Any(patterns)
    }

    // ===== Fluent modifiers =====

    /// Bind this pattern to a name.
    pub fn named(self, name: &'static str) -> Self {
        match self {
            UPat::Match { op, dtype, src, arg, name: _ } => UPat::Match { op, dtype, src, arg, name: Some(name) },
            UPat::Any(patterns) => UPat::Any(patterns.into_iter().map(|p| p.named(name)).collect()),
        }
    }

    pub fn with_dtype(self, dtype: DType) -> Self {
        self.with_dtypes(vec![dtype])
    }

    /// Add multiple dtype constraints (matches any of them).
    pub fn with_dtypes(self, dtypes: Vec<DType>) -> Self {
        match self {
            UPat::Match { op, dtype: _, src, arg, name } => UPat::Match { op, dtype: Some(dtypes), src, arg, name },
            UPat::Any(patterns) => UPat::Any(patterns.into_iter().map(|p| p.with_dtypes(dtypes.clone())).collect()),
        }
    }

    fn with_src(self, pattern: SrcPattern) -> Self {
        match self {
            UPat::Match { op, dtype, src: _, arg, name } => UPat::Match { op, dtype, src: Some(pattern), arg, name },
            UPat::Any(patterns) => {
                UPat::Any(patterns.into_iter().map(|p| p.with_src(pattern.clone())).collect())
            }
        }
    }

    pub fn src(self, src: Vec<UPat>) -> Self {
        self.with_src(SrcPattern::Tuple(src))
    }

    /// Sources must start with `src`; extra sources are allowed.
    pub fn src_prefix(self, src: Vec<UPat>) -> Self {
        self.with_src(SrcPattern::Prefix(src))
    }

    pub fn src_permute(self, src: Vec<UPat>) -> Self {
        self.with_src(SrcPattern::Permute(src))
    }

    pub fn src_repeat(self, src: UPat) -> Self {
        self.with_src(SrcPattern::Repeat(Box::new(src)))
    }

    pub fn with_arg(self, pattern: ArgPattern) -> Self {
        match self {
            UPat::Match { op, dtype, src, arg: _, name } => UPat::Match { op, dtype, src, arg: Some(pattern), name },
            UPat::Any(patterns) => {
                UPat::Any(patterns.into_iter().map(|p| p.with_arg(pattern.clone())).collect())
            }
        }
    }

    /// Constrain the op payload with a predicate.
    pub fn arg_fn(self, f: impl Fn(&Op) -> bool + Send + Sync + 'static) -> Self {
        self.with_arg(ArgPattern::Predicate(Arc::new(f)))
    }

    // ===== ALU helpers =====

    pub fn cmp_lt(self, rhs: impl IntoUPat) -> Self {
        Self::binary(BinaryOp::CmpLt, self, rhs.into_upat())
    }

    pub fn cmp_ne(self, rhs: impl IntoUPat) -> Self {
        Self::binary(BinaryOp::CmpNe, self, rhs.into_upat())
    }

    /// `-(self != rhs)`, the shape equality takes in the IR.
    pub fn cmp_eq(self, rhs: impl IntoUPat) -> Self {
        -self.cmp_ne(rhs)
    }

    pub fn max(self, rhs: impl IntoUPat) -> Self {
        Self::binary(BinaryOp::Max, self, rhs.into_upat())
    }

    pub fn idiv(self, rhs: impl IntoUPat) -> Self {
        Self::binary(BinaryOp::Idiv, self, rhs.into_upat())
    }

    /// `self ? t : f`
    pub fn where_(self, t: impl IntoUPat, f: impl IntoUPat) -> Self {
        Self::ternary(TernaryOp::Where, self, t.into_upat(), f.into_upat())
    }

    pub fn cast(self) -> Self {
        Self::op(OpTag::Cast).src(vec![self])
    }

    pub fn gep(self, i: usize) -> Self {
        Self::exact(Op::Gep(i)).src(vec![self])
    }

    // ===== Dispatch keys =====

    /// Op filters that every match must satisfy, or `None` for wildcards.
    pub fn filters(&self) -> Option<SmallVec<[OpFilter; 2]>> {
        match self {
            UPat::Match { op, .. } => op.clone(),
            UPat::Any(patterns) => {
                let mut out = SmallVec::new();
                for p in patterns {
                    out.extend(p.filters()?);
                }
                Some(out)
            }
        }
    }

    // ===== Matching =====

    /// All ways `uop` matches this pattern.
    pub fn match_uop(&self, uop: &Arc<UOp>) -> Vec<Bindings> {
        self.match_internal(uop, &Bindings::default())
    }

    fn match_internal(&self, uop: &Arc<UOp>, store: &Bindings) -> Vec<Bindings> {
        match self {
            UPat::Any(patterns) => patterns.iter().flat_map(|p| p.match_internal(uop, store)).collect(),
            UPat::Match { op, dtype, src, arg, name } => {
                if let Some(filters) = op {
                    if !filters.iter().any(|f| f.matches(uop.op())) {
                        return vec![];
                    }
                }
                if let Some(dtypes) = dtype {
                    if !dtypes.contains(uop.dtype_ref()) {
                        return vec![];
                    }
                }
                if let Some(arg) = arg {
                    if !arg.matches(uop.op()) {
                        return vec![];
                    }
                }
                let mut store = store.clone();
                if let Some(n) = name {
                    if !store.bind(*n, uop) {
                        return vec![];
                    }
                }
                let children = uop.src();
                match src {
                    None => vec![store],
                    Some(SrcPattern::Tuple(patterns)) => {
                        if children.len() != patterns.len() {
                            return vec![];
                        }
                        Self::match_sources(children, patterns.iter(), store)
                    }
                    Some(SrcPattern::Prefix(patterns)) => {
                        if children.len() < patterns.len() {
                            return vec![];
                        }
                        Self::match_sources(&children[..patterns.len()], patterns.iter(), store)
                    }
                    Some(SrcPattern::Repeat(pattern)) => {
                        Self::match_sources(children, std::iter::repeat(pattern.as_ref()).take(children.len()), store)
                    }
                    Some(SrcPattern::Permute(patterns)) => {
                        if children.len() != patterns.len() {
                            return vec![];
                        }
                        let mut results = Vec::new();
                        for perm in permutations(patterns.len()) {
                            results.extend(Self::match_sources(children, perm.iter().map(|&i| &patterns[i]), store.clone()));
                        }
                        results
                    }
                }
            }
        }
    }

    fn match_sources<'a>(
        children: &[Arc<UOp>],
        patterns: impl Iterator<Item = &'a UPat>,
        store: Bindings,
    ) -> Vec<Bindings> {
        let mut partial = vec![store];
        for (child, pat) in children.iter().zip(patterns) {
            partial = partial.iter().flat_map(|s| pat.match_internal(child, s)).collect();
            if partial.is_empty() {
                break;
            }
        }
        partial
    }
}

/// Index permutations of `0..n` in lexicographic order, identity first.
fn permutations(n: usize) -> Vec<Vec<usize>> {
    fn go(cur: &mut Vec<usize>, used: &mut Vec<bool>, out: &mut Vec<Vec<usize>>) {
        if cur.len() == used.len() {
            out.push(cur.clone());
            return;
        }
        for i in 0..used.len() {
            if !used[i] {
                used[i] = true;
                cur.push(i);
                go(cur, used, out);
                cur.pop();
                used[i] = false;
            }
        }
    }
    let mut out = Vec::new();
    go(&mut Vec::with_capacity(n), &mut vec![false; n], &mut out);
    out
}
