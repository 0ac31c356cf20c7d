//! Pattern matcher with OpKey-based dispatch.
//!
//! Rules are indexed by the op they can match. A rule whose pattern has no op
//! filter is a wildcard and is a candidate for every node. Candidates are
//! always tried in declaration order, and the first rule returning `Some`
//! wins.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::op::{Op, OpTag};
use crate::types::{BinaryOp, TernaryOp, UnaryOp};
use crate::UOp;

use super::upat::{Bindings, OpFilter, UPat};

/// Rewrite function: receives the captures of a match and the pass context.
pub type RewriteFn<C> = Arc<dyn Fn(&Bindings, &mut C) -> Option<Arc<UOp>> + Send + Sync>;

/// Dispatch key of a node: its tag, refined by the ALU sub-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKey {
    Tag(OpTag),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Ternary(TernaryOp),
}

impl OpKey {
    fn of(op: &Op) -> SmallVec<[OpKey; 2]> {
        let mut keys = SmallVec::new();
        keys.push(OpKey::Tag(op.tag()));
        match op {
            Op::Unary(u) => keys.push(OpKey::Unary(*u)),
            Op::Binary(b) => keys.push(OpKey::Binary(*b)),
            Op::Ternary(t) => keys.push(OpKey::Ternary(*t)),
            _ => {}
        }
        keys
    }
}

impl From<OpFilter> for OpKey {
    fn from(f: OpFilter) -> Self {
        match f {
            OpFilter::Tag(t) => Self::Tag(t),
            OpFilter::Unary(u) => Self::Unary(u),
            OpFilter::Binary(b) => Self::Binary(b),
            OpFilter::Ternary(t) => Self::Ternary(t),
        }
    }
}

/// Ordered rule list with O(1) candidate lookup.
///
/// # Type Parameter
///
/// - `C`: Context passed to every rewrite function. Use `()` for stateless rules.
pub struct PatternMatcher<C = ()> {
    rules: Vec<(UPat, RewriteFn<C>)>,
    indexed: HashMap<OpKey, Vec<usize>>,
    wildcards: Vec<usize>,
}

impl<C> Clone for PatternMatcher<C> {
    fn clone(&self) -> Self {
        Self { rules: self.rules.clone(), indexed: self.indexed.clone(), wildcards: self.wildcards.clone() }
    }
}

impl<C> Default for PatternMatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PatternMatcher<C> {
    pub fn new() -> Self {
        Self { rules: Vec::new(), indexed: HashMap::new(), wildcards: Vec::new() }
    }

    fn push_rule(&mut self, pattern: UPat, f: RewriteFn<C>) {
        let idx = self.rules.len();
        match pattern.filters() {
            Some(filters) => {
                let mut keys: SmallVec<[OpKey; 4]> = SmallVec::new();
                for key in filters.into_iter().map(OpKey::from) {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                for key in keys {
                    self.indexed.entry(key).or_default().push(idx);
                }
            }
            None => self.wildcards.push(idx),
        }
        self.rules.push((pattern, f));
    }

    /// Append a rule.
    pub fn add<F>(&mut self, pattern: UPat, f: F)
    where
        F: Fn(&Bindings, &mut C) -> Option<Arc<UOp>> + Send + Sync + 'static,
    {
        self.push_rule(pattern, Arc::new(f));
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Candidate rule indices for `op`, in declaration order.
    fn candidates(&self, op: &Op) -> SmallVec<[usize; 16]> {
        let mut out: SmallVec<[usize; 16]> = self.wildcards.iter().copied().collect();
        for key in OpKey::of(op) {
            if let Some(ids) = self.indexed.get(&key) {
                out.extend(ids.iter().copied());
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Apply the first rule that matches `uop` and returns a replacement.
    ///
    /// Every match of a rule's pattern is offered to its function in turn.
    pub fn rewrite(&self, uop: &Arc<UOp>, ctx: &mut C) -> Option<Arc<UOp>> {
        for idx in self.candidates(uop.op()) {
            let (pattern, f) = &self.rules[idx];
            for bindings in pattern.match_uop(uop) {
                if let Some(ret) = f(&bindings, ctx) {
                    tracing::trace!(rule = idx, uop.id = uop.id, op = ?uop.tag(), "pattern matched");
                    return Some(ret);
                }
            }
        }
        None
    }
}

/// Combine two matchers. Rules from `rhs` come after those of `self`.
impl<C> std::ops::Add for PatternMatcher<C> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        for (pattern, f) in rhs.rules {
            self.push_rule(pattern, f);
        }
        self
    }
}
