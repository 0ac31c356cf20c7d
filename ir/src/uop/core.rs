//! Core UOp struct and fundamental operations.
//!
//! This module contains the [`UOp`] struct definition and its core methods
//! for accessing operation data, dtype, sources and graph traversal.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use kernc_dtype::DType;
use smallvec::SmallVec;

use crate::op::{Op, OpTag};
use crate::types::ConstValue;

/// Source list of a UOp. Nearly every node has at most four inputs.
pub type Srcs = SmallVec<[Arc<UOp>; 4]>;

/// Wrapper for Arc<UOp> that implements Hash and Eq based on stable ID.
///
/// This allows using Arc<UOp> as HashMap keys without implementing
/// Hash/Eq on UOp itself.
#[allow(clippy::mutable_key_type)]
#[derive(Clone)]
pub struct UOpKey(pub Arc<UOp>);

impl std::fmt::Debug for UOpKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UOpKey(id={})", self.0.id)
    }
}

impl PartialEq for UOpKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for UOpKey {}

impl Hash for UOpKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

static UOP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_uop_id() -> u64 {
    UOP_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Micro-operation node in the computation graph.
///
/// UOps form a DAG through their `src` lists. Nodes are immutable once built;
/// structural sharing inside one rewrite pass comes from the pass's own
/// cache, there is no process-wide interning.
#[derive(derive_more::Debug)]
pub struct UOp {
    /// Unique stable ID for this UOp instance.
    pub id: u64,
    pub(crate) op: Op,
    pub(crate) dtype: DType,
    #[debug(skip)]
    pub(crate) src: Srcs,
    /// Cached integer bounds, see [`UOp::bounds`].
    #[debug(skip)]
    pub(crate) bounds_cache: OnceLock<Option<(i64, i64)>>,
}

impl UOp {
    /// Build a node with a fresh identity.
    pub fn new(op: Op, dtype: DType, src: impl IntoIterator<Item = Arc<UOp>>) -> Arc<Self> {
        Arc::new(Self { id: next_uop_id(), op, dtype, src: src.into_iter().collect(), bounds_cache: OnceLock::new() })
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn tag(&self) -> OpTag {
        self.op.tag()
    }

    pub fn dtype(&self) -> DType {
        self.dtype.clone()
    }

    pub fn dtype_ref(&self) -> &DType {
        &self.dtype
    }

    pub fn src(&self) -> &[Arc<UOp>] {
        &self.src
    }

    /// The constant payload, if this is a CONST.
    pub fn const_value(&self) -> Option<ConstValue> {
        match self.op {
            Op::Const(v) => Some(v),
            _ => None,
        }
    }

    /// Same op and dtype over new sources.
    ///
    /// Returns `self` when every source is already the same node.
    pub fn with_sources(self: &Arc<Self>, src: impl IntoIterator<Item = Arc<UOp>>) -> Arc<Self> {
        let src: Srcs = src.into_iter().collect();
        if src.len() == self.src.len() && src.iter().zip(self.src.iter()).all(|(a, b)| a.id == b.id) {
            return self.clone();
        }
        Self::new(self.op.clone(), self.dtype.clone(), src)
    }

    /// Same op and sources, different dtype.
    pub fn with_dtype(self: &Arc<Self>, dtype: DType) -> Arc<Self> {
        if self.dtype == dtype {
            return self.clone();
        }
        Self::new(self.op.clone(), dtype, self.src.iter().cloned())
    }

    /// Same dtype and sources, different op.
    pub fn with_op(self: &Arc<Self>, op: Op) -> Arc<Self> {
        Self::new(op, self.dtype.clone(), self.src.iter().cloned())
    }

    /// Structural equality on op, dtype and source identities.
    pub fn same_as(&self, other: &UOp) -> bool {
        self.id == other.id
            || (self.op == other.op
                && self.dtype == other.dtype
                && self.src.len() == other.src.len()
                && self.src.iter().zip(other.src.iter()).all(|(a, b)| a.id == b.id))
    }

    /// Whether this is an integer expression known to be a multiple of `v`.
    pub fn divides(&self, v: i64) -> bool {
        if v == 0 {
            return false;
        }
        match &self.op {
            Op::Const(c) => c.as_i64().is_some_and(|c| c % v == 0),
            Op::Binary(crate::BinaryOp::Add) => self.src.iter().all(|x| x.divides(v)),
            Op::Binary(crate::BinaryOp::Mul) => self.src.iter().any(|x| x.divides(v)),
            _ => false,
        }
    }

    // =========================================================================
    // Graph traversal
    // =========================================================================

    /// Nodes reachable from `self` in dependency order (sources first).
    pub fn toposort(self: &Arc<Self>) -> Vec<Arc<Self>> {
        let mut visited = HashSet::new();
        let mut result = Vec::new();
        let mut stack = vec![(self.clone(), false)];

        while let Some((node, processed)) = stack.pop() {
            if visited.contains(&node.id) {
                continue;
            }

            if processed {
                visited.insert(node.id);
                result.push(node);
            } else {
                stack.push((node.clone(), true));
                for child in node.src.iter().rev() {
                    if !visited.contains(&child.id) {
                        stack.push((child.clone(), false));
                    }
                }
            }
        }

        result
    }

    /// Ids of `self` and every node it transitively depends on.
    pub fn sparents(self: &Arc<Self>) -> HashSet<u64> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            if seen.insert(node.id) {
                stack.extend(node.src.iter().cloned());
            }
        }
        seen
    }

    /// Whether `other` is `self` or one of its transitive sources.
    pub fn depends_on(self: &Arc<Self>, other: &UOp) -> bool {
        self.sparents().contains(&other.id)
    }
}
