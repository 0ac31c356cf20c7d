//! Linearization of a kernel graph into an ordered instruction list.
//!
//! ```text
//! SINK(stores)
//!     ↓ gated-store fixup     LOADs behind a BARRIER move into an IF
//!     ↓ folder                constant folding (+ float4 folding)
//!     ↓ expander + folder     lanes made explicit, REDUCE → DEFINE_ACC/PHI
//!     ↓ scoped toposort       loop children first, END markers inserted
//!     ↓ sanity checks
//! Vec<Arc<UOp>>               SINK stripped
//! ```

mod error;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt::Write;
use std::sync::Arc;

use kernc_ir::prelude::*;
use kernc_ir::graph_rewrite;
use once_cell::sync::Lazy;
use snafu::ensure;
use tracing::{debug, error};

use crate::expand::{ExpandContext, expander};
use crate::symbolic::{constant_folder, float4_folding};

pub use error::*;

static FOLDER: Lazy<PatternMatcher> = Lazy::new(constant_folder);
static FOLDER_FLOAT4: Lazy<PatternMatcher> = Lazy::new(|| constant_folder() + float4_folding());
static EXPANDER: Lazy<PatternMatcher<ExpandContext>> = Lazy::new(|| expander() + constant_folder());
static EXPANDER_FLOAT4: Lazy<PatternMatcher<ExpandContext>> =
    Lazy::new(|| expander() + constant_folder() + float4_folding());

/// Linearize a kernel SINK into its instruction list, SINK excluded.
#[tracing::instrument(skip_all)]
pub fn linearize(sink: &Arc<UOp>, supports_float4: bool) -> Result<Vec<Arc<UOp>>> {
    let sink = gate_stores(sink);

    let folder: &PatternMatcher = if supports_float4 { &FOLDER_FLOAT4 } else { &FOLDER };
    let sink = graph_rewrite(folder, &sink, &mut ());

    let expander: &PatternMatcher<ExpandContext> = if supports_float4 { &EXPANDER_FLOAT4 } else { &EXPANDER };
    let mut ctx = ExpandContext::default();
    let sink = graph_rewrite(expander, &sink, &mut ctx);
    debug!(accumulators = ctx.acc_number, "expanded kernel graph");

    let mut uops = scoped_toposort(&sink);
    if let Err(e) = sanity_check(&uops) {
        for line in format_listing(&uops).lines() {
            error!("{line}");
        }
        return Err(e);
    }
    uops.pop();
    debug!(len = uops.len(), "linearized");
    Ok(uops)
}

// ============================================================================
// GATED STORES
// ============================================================================

/// Route every LOAD that waits on a BARRIER under `store` through an IF on
/// the store's gate, so gated-off threads skip the local round trip.
fn gate_loads(store: &Arc<UOp>, gate: &Arc<UOp>) -> Arc<UOp> {
    let mut replaced: HashMap<u64, Arc<UOp>> = HashMap::new();
    for u in store.toposort() {
        let new = match u.src().last() {
            Some(barrier) if u.tag() == OpTag::Load && barrier.tag() == OpTag::Barrier => {
                let srcs = u.src()[..u.src().len() - 1].iter().cloned();
                let if_ = UOp::if_(gate.clone(), barrier.clone());
                UOp::new(u.op().clone(), u.dtype(), srcs.chain([if_]))
            }
            _ => u.with_sources(u.src().iter().map(|s| replaced.get(&s.id).cloned().unwrap_or_else(|| s.clone()))),
        };
        replaced.insert(u.id, new);
    }
    replaced.remove(&store.id).unwrap_or_else(|| store.clone())
}

fn gate_stores(sink: &Arc<UOp>) -> Arc<UOp> {
    let srcs: Vec<Arc<UOp>> = sink
        .src()
        .iter()
        .map(|s| {
            if s.tag() != OpTag::Store || s.src().len() != 4 || s.toposort().iter().any(|x| x.tag() == OpTag::Wmma) {
                return s.clone();
            }
            let rewritten = gate_loads(s, &s.src()[3]);
            if rewritten.id == s.id {
                return s.clone();
            }
            UOp::new(Op::Store, rewritten.dtype(), rewritten.src()[..3].iter().cloned())
        })
        .collect();
    sink.with_sources(srcs)
}

// ============================================================================
// SCOPED TOPOSORT
// ============================================================================

struct Graph {
    /// Nodes in DFS preorder.
    preorder: Vec<Arc<UOp>>,
    /// Nodes in DFS postorder.
    postorder: Vec<Arc<UOp>>,
    /// Consumers per node, one entry per use.
    children: HashMap<u64, Vec<Arc<UOp>>>,
    in_degree: HashMap<u64, usize>,
}

fn build_graph(sink: &Arc<UOp>) -> Graph {
    let mut graph = Graph { preorder: vec![sink.clone()], postorder: vec![], children: HashMap::new(), in_degree: HashMap::new() };
    graph.children.insert(sink.id, vec![]);

    let mut stack: Vec<(Arc<UOp>, usize)> = vec![(sink.clone(), 0)];
    while let Some((node, i)) = stack.last().cloned() {
        if let Some(x) = node.src().get(i) {
            match graph.children.get_mut(&x.id) {
                Some(users) => {
                    users.push(node.clone());
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                }
                None => {
                    graph.children.insert(x.id, vec![]);
                    graph.preorder.push(x.clone());
                    stack.push((x.clone(), 0));
                }
            }
            continue;
        }
        graph.in_degree.insert(node.id, node.src().len());
        graph.postorder.push(node.clone());
        stack.pop();
        if let Some(parent) = stack.last_mut() {
            if let Some(users) = graph.children.get_mut(&node.id) {
                users.push(parent.0.clone());
            }
            parent.1 += 1;
        }
    }
    graph
}

/// Everything downstream of `opener` up to and including its scope-end op.
fn scope_members(graph: &Graph, opener: &Arc<UOp>, end: OpTag) -> HashSet<u64> {
    let mut members = HashSet::new();
    let mut frontier: Vec<Arc<UOp>> = graph.children.get(&opener.id).cloned().unwrap_or_default();
    while let Some(u) = frontier.pop() {
        if u.tag() == OpTag::Sink || !members.insert(u.id) {
            continue;
        }
        if u.tag() != end {
            frontier.extend(graph.children.get(&u.id).into_iter().flatten().cloned());
        }
    }
    members
}

/// Min-heap on `(priority, push order)`.
#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Reverse<(i64, usize)>>,
    nodes: Vec<Arc<UOp>>,
}

impl Queue {
    fn push(&mut self, u: &Arc<UOp>, priority: i64) {
        self.heap.push(Reverse((priority, self.nodes.len())));
        self.nodes.push(u.clone());
    }

    fn pop(&mut self) -> Option<Arc<UOp>> {
        let Reverse((_, seq)) = self.heap.pop()?;
        self.nodes.get(seq).cloned()
    }
}

type Scopes = Vec<(Arc<UOp>, HashSet<u64>)>;

/// Nodes inside deeper loop scopes sort first.
fn scope_priority(u: &UOp, scopes: &Scopes) -> i64 {
    scopes
        .iter()
        .filter(|(_, members)| members.contains(&u.id))
        .filter_map(|(l, _)| match l.op() {
            Op::Range { axis, reduce } => Some(-(*axis as i64 * 1000 + *reduce as i64)),
            _ => None,
        })
        .sum()
}

fn set_scope_end(scope_end: &mut Vec<(Arc<UOp>, Arc<UOp>)>, opener: &Arc<UOp>, last: &Arc<UOp>) {
    match scope_end.iter_mut().find(|(o, _)| o.id == opener.id) {
        Some(entry) => entry.1 = last.clone(),
        None => scope_end.push((opener.clone(), last.clone())),
    }
}

fn position(uops: &[Arc<UOp>], u: &UOp) -> Option<usize> {
    uops.iter().position(|x| x.id == u.id)
}

fn scoped_toposort(sink: &Arc<UOp>) -> Vec<Arc<UOp>> {
    let graph = build_graph(sink);
    let mut in_degree = graph.in_degree.clone();

    let mut scopes: Scopes = graph
        .postorder
        .iter()
        .rev()
        .filter_map(|p| {
            let end = p.op().scope_end_op()?;
            Some((p.clone(), scope_members(&graph, p, end)))
        })
        .collect();

    let mut queue = Queue::default();
    for u in &graph.preorder {
        if in_degree.get(&u.id) == Some(&0) {
            queue.push(u, scope_priority(u, &scopes));
        }
    }

    let mut uops: Vec<Arc<UOp>> = Vec::with_capacity(graph.preorder.len());
    let mut scope_end: Vec<(Arc<UOp>, Arc<UOp>)> = Vec::new();
    while let Some(x) = queue.pop() {
        if scopes.iter().any(|(opener, _)| opener.id == x.id) {
            set_scope_end(&mut scope_end, &x, &x);
        }

        // accumulators open right before their outermost loop
        let insert_at = match x.op() {
            Op::DefineAcc(_) => x.src().iter().filter(|l| l.tag() == OpTag::Range).filter_map(|l| position(&uops, l)).min(),
            _ => None,
        };
        match insert_at {
            Some(idx) => uops.insert(idx, x.clone()),
            None => uops.push(x.clone()),
        }

        for (opener, members) in scopes.iter_mut() {
            if members.remove(&x.id) && members.is_empty() {
                set_scope_end(&mut scope_end, opener, &x);
            }
        }
        for u in graph.children.get(&x.id).into_iter().flatten() {
            let Some(degree) = in_degree.get_mut(&u.id) else { continue };
            *degree -= 1;
            if *degree == 0 {
                queue.push(u, scope_priority(u, &scopes));
            }
        }
    }

    for (opener, last) in &scope_end {
        let Some(end) = opener.op().end_for() else { continue };
        let end_op = match end {
            OpTag::EndRange => Op::EndRange,
            _ => Op::EndIf,
        };
        if let Some(idx) = position(&uops, last) {
            uops.insert(idx + 1, UOp::new(end_op, DType::Void, [opener.clone()]));
        }
    }
    uops
}

// ============================================================================
// SANITY CHECKS
// ============================================================================

fn type_verify(uops: &[Arc<UOp>]) -> Result<()> {
    for (index, u) in uops.iter().enumerate() {
        let src = u.src();
        let mismatch = |detail: String| TypeMismatchSnafu { index, detail };
        match u.op() {
            Op::Unary(op) => {
                ensure!(u.dtype_ref() == src[0].dtype_ref(), mismatch(format!("{op} {} != {}", u.dtype_ref(), src[0].dtype_ref())));
            }
            Op::Binary(op) if op.is_comparison() => {
                ensure!(u.dtype_ref().base() == ScalarDType::Bool, mismatch(format!("{op} output {} is not bool", u.dtype_ref())));
                ensure!(
                    src[0].dtype_ref() == src[1].dtype_ref(),
                    mismatch(format!("{op} operands {} != {}", src[0].dtype_ref(), src[1].dtype_ref()))
                );
            }
            Op::Binary(op) => {
                ensure!(
                    u.dtype_ref() == src[0].dtype_ref() && u.dtype_ref() == src[1].dtype_ref(),
                    mismatch(format!("{op} {} != {} != {}", u.dtype_ref(), src[0].dtype_ref(), src[1].dtype_ref()))
                );
            }
            Op::Ternary(TernaryOp::Where) => {
                ensure!(src[0].dtype_ref().base() == ScalarDType::Bool, mismatch(format!("WHERE selector {} is not bool", src[0].dtype_ref())));
                ensure!(
                    u.dtype_ref() == src[1].dtype_ref() && u.dtype_ref() == src[2].dtype_ref(),
                    mismatch(format!("WHERE {} != {} != {}", u.dtype_ref(), src[1].dtype_ref(), src[2].dtype_ref()))
                );
            }
            _ => {}
        }
    }
    Ok(())
}

fn sanity_check(uops: &[Arc<UOp>]) -> Result<()> {
    type_verify(uops)?;

    let last = uops.last().map(|u| u.tag());
    ensure!(last == Some(OpTag::Sink), MissingSinkSnafu { last: last.map_or_else(|| "nothing".to_string(), |t| t.to_string()) });

    let mut bad_ops: Vec<OpTag> = uops
        .iter()
        .map(|u| u.tag())
        .filter(|t| matches!(t, OpTag::Expand | OpTag::Contract | OpTag::Reduce | OpTag::Unmul))
        .collect();
    bad_ops.sort_unstable();
    bad_ops.dedup();
    ensure!(bad_ops.is_empty(), BadOpsSnafu { ops: bad_ops });

    // repeated stores to a DEFINE_LOCAL are fine
    let stores: Vec<Vec<u64>> = uops
        .iter()
        .filter(|u| u.tag() == OpTag::Store && u.src()[0].tag() != OpTag::DefineLocal)
        .map(|u| u.src()[..2].iter().chain(u.src().iter().skip(3)).map(|s| s.id).collect())
        .collect();
    let unique: HashSet<&Vec<u64>> = stores.iter().collect();
    ensure!(unique.len() == stores.len(), RepeatedStoresSnafu);
    Ok(())
}

/// One line per instruction: index, op, dtype, sources (constants inline), argument.
pub fn format_listing(uops: &[Arc<UOp>]) -> String {
    let mut out = String::new();
    for (i, u) in uops.iter().enumerate() {
        let srcs: Vec<String> = u
            .src()
            .iter()
            .map(|x| match x.const_value() {
                Some(c) => c.to_string(),
                None => position(uops, x).map_or_else(|| "?".to_string(), |p| p.to_string()),
            })
            .collect();
        let _ = writeln!(out, "{i:4} {:<16} {:<24} [{}] {:?}", u.tag().to_string(), u.dtype_ref().to_string(), srcs.join(", "), u.op());
    }
    out
}
