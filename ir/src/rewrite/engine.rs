//! Graph rewrite engine implementation.
//!
//! # Algorithm
//!
//! Each node is visited once, children first. After a node's sources have
//! been rewritten it is rebuilt over the new sources and looked up in the
//! pass cache by `(op, dtype, source ids)`: structurally identical nodes
//! collapse into one. A node not seen before is offered to the matcher; when
//! a rule fires, its result is rewritten the same way before being recorded.
//! The cache lives for one call only.
//!
//! The traversal uses an explicit stack, so graph depth never translates into
//! native recursion.
//!
//! # Pattern Context
//!
//! Context is passed at rewrite-time through `graph_rewrite()`. Rules that
//! don't need it are written against `PatternMatcher<()>` and called with
//! `&mut ()`.

use std::collections::HashMap;
use std::sync::Arc;

use kernc_dtype::DType;
use smallvec::SmallVec;

use crate::op::Op;
use crate::pattern::PatternMatcher;
use crate::UOp;

/// Nested rewrite chains deeper than this are cut off.
const MAX_REWRITE_DEPTH: usize = 4096;

type NodeKey = (Op, DType, SmallVec<[u64; 4]>);

/// Per-call state of [`graph_rewrite`].
#[derive(Default)]
pub struct RewriteCache {
    /// Structural key of a rebuilt node -> its final rewrite.
    nodes: HashMap<NodeKey, Arc<UOp>>,
    /// Original node id -> its final rewrite.
    replace: HashMap<u64, Arc<UOp>>,
}

impl RewriteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Final rewrite of an already visited node.
    pub fn get(&self, uop: &UOp) -> Option<&Arc<UOp>> {
        self.replace.get(&uop.id)
    }
}

enum Frame {
    /// Schedule the node's sources.
    Enter { node: Arc<UOp>, depth: usize },
    /// Sources are done: rebuild, dedup and match.
    Rebuild { node: Arc<UOp>, depth: usize },
    /// A rule fired for `node`; `replacement` has now been rewritten too.
    Link { node: Arc<UOp>, key: NodeKey, replacement: Arc<UOp> },
}

/// Rewrite `sink` and everything it depends on with `pm` until no rule fires.
pub fn graph_rewrite<C>(pm: &PatternMatcher<C>, sink: &Arc<UOp>, ctx: &mut C) -> Arc<UOp> {
    let mut cache = RewriteCache::new();
    graph_rewrite_with_cache(pm, sink, ctx, &mut cache)
}

/// [`graph_rewrite`] with a caller-owned cache.
pub fn graph_rewrite_with_cache<C>(
    pm: &PatternMatcher<C>,
    sink: &Arc<UOp>,
    ctx: &mut C,
    cache: &mut RewriteCache,
) -> Arc<UOp> {
    let mut stack = vec![Frame::Enter { node: sink.clone(), depth: 0 }];
    let mut cutoff_warned = false;

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter { node, depth } => {
                if cache.replace.contains_key(&node.id) {
                    continue;
                }
                let pending: SmallVec<[Arc<UOp>; 4]> =
                    node.src().iter().filter(|s| !cache.replace.contains_key(&s.id)).cloned().collect();
                stack.push(Frame::Rebuild { node, depth });
                for src in pending.into_iter().rev() {
                    stack.push(Frame::Enter { node: src, depth });
                }
            }

            Frame::Rebuild { node, depth } => {
                if cache.replace.contains_key(&node.id) {
                    continue;
                }
                let mut new_src: SmallVec<[Arc<UOp>; 4]> = SmallVec::with_capacity(node.src().len());
                for s in node.src() {
                    match cache.replace.get(&s.id) {
                        Some(r) => new_src.push(r.clone()),
                        // Source was queued after this frame; retry once it lands.
                        None => {
                            stack.push(Frame::Rebuild { node: node.clone(), depth });
                            stack.push(Frame::Enter { node: s.clone(), depth });
                            break;
                        }
                    }
                }
                if new_src.len() != node.src().len() {
                    continue;
                }

                let key: NodeKey = (node.op().clone(), node.dtype(), new_src.iter().map(|s| s.id).collect());
                if let Some(found) = cache.nodes.get(&key) {
                    let found = found.clone();
                    cache.replace.insert(node.id, found);
                    continue;
                }

                let rebuilt = node.with_sources(new_src);
                match pm.rewrite(&rebuilt, ctx) {
                    Some(replacement) if depth < MAX_REWRITE_DEPTH => {
                        stack.push(Frame::Link { node, key, replacement: replacement.clone() });
                        stack.push(Frame::Enter { node: replacement, depth: depth + 1 });
                    }
                    Some(_) => {
                        if !cutoff_warned {
                            tracing::warn!(uop.id = node.id, op = ?node.tag(), depth, "rewrite chain too deep, keeping node");
                            cutoff_warned = true;
                        }
                        cache.nodes.insert(key, rebuilt.clone());
                        cache.replace.insert(rebuilt.id, rebuilt.clone());
                        cache.replace.insert(node.id, rebuilt);
                    }
                    None => {
                        cache.nodes.insert(key, rebuilt.clone());
                        if rebuilt.id != node.id {
                            cache.replace.insert(rebuilt.id, rebuilt.clone());
                        }
                        cache.replace.insert(node.id, rebuilt);
                    }
                }
            }

            Frame::Link { node, key, replacement } => {
                let result = cache.replace.get(&replacement.id).cloned().unwrap_or(replacement);
                cache.nodes.insert(key, result.clone());
                cache.replace.insert(node.id, result);
            }
        }
    }

    cache.replace.get(&sink.id).cloned().unwrap_or_else(|| sink.clone())
}
