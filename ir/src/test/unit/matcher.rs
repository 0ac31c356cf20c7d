use std::sync::Arc;

use crate::pattern::{PatternMatcher, UPat};
use crate::UOp;

fn x() -> Arc<UOp> {
    UOp::range(0, 16, false)
}

#[test]
fn first_declared_rule_wins() {
    let mut pm: PatternMatcher<()> = PatternMatcher::new();
    pattern!(pm, UPat::var("x") + 0i64 => |x| Some(x.clone()));
    pattern!(pm, UPat::var("x") + UPat::var("y") => |x, y| Some(x.mul(y.clone())));

    let x = x();
    let out = pm.rewrite(&x.add(0i64), &mut ());
    assert_eq!(out.map(|u| u.id), Some(x.id));
}

#[test]
fn declining_rule_falls_through() {
    let mut pm: PatternMatcher<()> = PatternMatcher::new();
    pattern!(pm, UPat::var("x") + UPat::cvar("c") => |_x, _c| None);
    pattern!(pm, UPat::var("x") + 0i64 => |x| Some(x.clone()));

    let x = x();
    assert_eq!(pm.rewrite(&x.add(0i64), &mut ()).map(|u| u.id), Some(x.id));
}

#[test]
fn wildcards_and_indexed_rules_keep_declaration_order() {
    let mut pm: PatternMatcher<Vec<&'static str>> = PatternMatcher::new();
    pm.add(UPat::var("x") + 0i64, |_, log: &mut Vec<&'static str>| {
        log.push("add");
        None
    });
    pm.add(UPat::var("x"), |_, log: &mut Vec<&'static str>| {
        log.push("any");
        None
    });

    let mut log = Vec::new();
    assert!(pm.rewrite(&x().add(0i64), &mut log).is_none());
    assert_eq!(log, vec!["add", "any"]);
}

#[test]
fn context_is_threaded_through() {
    let mut pm: PatternMatcher<usize> = PatternMatcher::new();
    pattern!(pm, UPat::var("x") * 1i64 => |x; count| {
        *count += 1;
        Some(x.clone())
    });
    let mut count = 0;
    pm.rewrite(&x().mul(1i64), &mut count);
    assert_eq!(count, 1);
}

#[test]
fn combined_matchers_append_rules() {
    let mut a: PatternMatcher<()> = PatternMatcher::new();
    pattern!(a, UPat::var("x") + 0i64 => |x| Some(x.clone()));
    let mut b: PatternMatcher<()> = PatternMatcher::new();
    pattern!(b, UPat::var("x") * 1i64 => |x| Some(x.clone()));
    let pm = a + b;
    assert_eq!(pm.len(), 2);
    assert!(pm.rewrite(&x().mul(1i64), &mut ()).is_some());
}
