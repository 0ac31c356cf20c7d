use std::sync::Arc;

use crate::op::OpTag;
use crate::pattern::{PatternMatcher, UPat};
use crate::rewrite::{graph_rewrite, graph_rewrite_with_cache, RewriteCache};
use crate::UOp;

fn identities() -> PatternMatcher {
    let mut pm = PatternMatcher::new();
    pattern!(pm, UPat::var("x") + 0i64 => |x| Some(x.clone()));
    pattern!(pm, UPat::var("x") * 1i64 => |x| Some(x.clone()));
    pm
}

fn idx() -> Arc<UOp> {
    UOp::range(0, 8, false)
}

#[test]
fn structurally_equal_nodes_collapse() {
    let r = idx();
    let a = r.add(1i64);
    let b = r.add(1i64);
    assert_ne!(a.id, b.id);

    let sink = UOp::sink([a, b]);
    let out = graph_rewrite(&PatternMatcher::<()>::new(), &sink, &mut ());
    assert_eq!(out.src()[0].id, out.src()[1].id);
}

#[test]
fn rewrites_reach_fixed_point() {
    let r = idx();
    let e = r.add(0i64).mul(1i64).add(0i64);
    let out = graph_rewrite(&identities(), &e, &mut ());
    assert_eq!(out.id, r.id);
}

#[test]
fn rewriting_twice_is_a_no_op() {
    let r = idx();
    let e = UOp::sink([r.add(0i64).mul(3i64), r.mul(1i64)]);
    let once = graph_rewrite(&identities(), &e, &mut ());
    let twice = graph_rewrite(&identities(), &once, &mut ());
    assert_eq!(once.id, twice.id);
}

#[test]
fn untouched_graph_is_returned_as_is() {
    let e = idx().mul(2i64);
    let out = graph_rewrite(&identities(), &e, &mut ());
    assert_eq!(out.id, e.id);
}

#[test]
fn replacement_is_rewritten_too() {
    // The first rule produces a node only the second rule simplifies.
    let mut pm = identities();
    pattern!(pm, UPat::var("x") - UPat::var("y") => |x, y| Some(x.add(y.mul(-1i64)).add(0i64)));
    let r = idx();
    let out = graph_rewrite(&pm, &r.sub(r.clone()), &mut ());
    assert_eq!(out.tag(), OpTag::Binary);
    assert!(!out.toposort().iter().any(|n| n.tag() == OpTag::Binary && n.src()[1].const_value().is_some_and(|c| c.as_i64() == Some(0))));
}

#[test]
fn cache_maps_original_nodes() {
    let r = idx();
    let e = r.add(0i64);
    let mut cache = RewriteCache::new();
    let out = graph_rewrite_with_cache(&identities(), &e, &mut (), &mut cache);
    assert_eq!(cache.get(&e).map(|u| u.id), Some(out.id));
    assert_eq!(out.id, r.id);
}

#[test]
fn deep_chains_do_not_overflow_the_stack() {
    let mut e = idx();
    for _ in 0..2_000 {
        e = e.add(0i64);
    }
    let out = graph_rewrite(&identities(), &e, &mut ());
    assert_eq!(out.tag(), OpTag::Range);
}
