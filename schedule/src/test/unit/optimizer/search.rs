//! Beam search, MCTS and the action space, timed by a deterministic fake.

use kernc_ir::DType;

use crate::optimizer::{
    actions, beam_search, get_kernel_actions, mcts_search, optimize_kernel_with_search, Kernel, OptOps,
    OptStrategy, OptimizerConfig, PlainRender, Program, Renderer, SearchCacheKey, SearchConfig, BEAM_ACTIONS,
};
use crate::test::helpers::*;

/// Fewer instructions is faster.
fn uop_count(p: &Program) -> Option<f64> {
    Some(p.uops.len() as f64)
}

fn clang_add() -> Kernel {
    kernel(elementwise_add(&[64, 64], DType::Float32), Renderer::clang())
}

#[test]
fn action_keys_map_to_action_index() {
    let k = clang_add();
    let config = SearchConfig::default();
    let acted = get_kernel_actions(&k, true, &config);
    assert_eq!(acted[&0].applied_opts.len(), 0);
    for (&key, candidate) in acted.iter().filter(|(&key, _)| key > 0) {
        assert_eq!(candidate.applied_opts.as_slice(), &[BEAM_ACTIONS[key - 1]]);
    }
    assert!(acted.len() > 1);
}

#[test]
fn clang_actions_never_use_locals() {
    let acted = get_kernel_actions(&clang_add(), false, &SearchConfig::default());
    assert!(acted.values().all(|k| k.local_dims == 0 && k.group_for_reduces == 0));
    assert!(acted.values().all(|k| k.applied_opts[0].op != OptOps::LOCAL));
}

#[test]
fn upcast_cap_filters_candidates() {
    let k = clang_add();
    let config = SearchConfig { max_upcast: 2, ..SearchConfig::default() };
    let acted = get_kernel_actions(&k, false, &config);
    assert!(!acted.is_empty());
    assert!(acted.values().all(|k| k.upcast_size() <= 2));
}

#[test]
fn nolocals_extends_the_action_space() {
    let config = SearchConfig { nolocals: true, ..SearchConfig::default() };
    assert_eq!(actions(&config).len(), BEAM_ACTIONS.len() + 1);
    assert_eq!(actions(&config).last().map(|o| o.op), Some(OptOps::NOLOCALS));
}

#[test]
fn beam_search_picks_a_timed_candidate() {
    let k = clang_add();
    let config = SearchConfig { beam_width: 2, ..SearchConfig::default() };
    let result = beam_search(k, &config, &PlainRender, uop_count);
    assert!(result.time.is_finite());
    assert!(!result.kernel.applied_opts.is_empty());
    let program = result.kernel.to_program(&PlainRender).unwrap();
    assert_eq!(program.uops.len() as f64, result.time);
    assert!(result.iterations >= 2);
    assert!(result.candidates_evaluated > 0);
}

#[test]
fn beam_search_without_timings_keeps_the_kernel() {
    let k = clang_add();
    let result = beam_search(k, &SearchConfig::default(), &PlainRender, |_| None);
    assert!(result.kernel.applied_opts.is_empty());
    assert!(result.time.is_infinite());
    assert_eq!(result.iterations, 1);
}

#[test]
fn beam_search_result_replays() {
    let k = clang_add();
    let config = SearchConfig { beam_width: 2, ..SearchConfig::default() };
    let result = beam_search(k.clone(), &config, &PlainRender, uop_count);
    let replayed = crate::optimizer::replay_opts(k, &result.kernel.applied_opts).unwrap();
    assert_eq!(replayed.sts, result.kernel.sts);
}

#[test]
fn mcts_is_reproducible_for_a_seed() {
    let config = SearchConfig { seed: 42, ..SearchConfig::default() };
    let a = mcts_search(clang_add(), 10, &config, &PlainRender, uop_count);
    let b = mcts_search(clang_add(), 10, &config, &PlainRender, uop_count);
    assert_eq!(a.kernel.applied_opts, b.kernel.applied_opts);
    assert_eq!(a.time, b.time);
    assert_eq!(a.iterations, 10);
}

#[test]
fn mcts_without_timings_keeps_the_kernel() {
    let result = mcts_search(clang_add(), 5, &SearchConfig::default(), &PlainRender, |_| None);
    assert!(result.kernel.applied_opts.is_empty());
    assert!(result.time.is_infinite());
}

#[test]
fn heuristic_strategy_ignores_the_timer() {
    let k = clang_add();
    let config = OptimizerConfig { strategy: OptStrategy::Heuristic, ..OptimizerConfig::default() };
    let optimized = optimize_kernel_with_search(&k, &config, &PlainRender, |_| panic!("timer must not run")).unwrap();
    assert!(!optimized.applied_opts.is_empty());
}

#[test]
fn beam_strategy_searches() {
    let k = clang_add();
    let config = OptimizerConfig { strategy: OptStrategy::Beam { width: 2 }, ..OptimizerConfig::default() };
    let mut calls = 0;
    let optimized = optimize_kernel_with_search(&k, &config, &PlainRender, |p| {
        calls += 1;
        uop_count(p)
    })
    .unwrap();
    assert!(calls > 0);
    assert!(optimized.to_program(&PlainRender).is_ok());
}

// ============================================================================
// Cache key
// ============================================================================

#[test]
fn cache_key_tracks_ast_and_budget() {
    let k = clang_add();
    let key = SearchCacheKey::new(&k, 4);
    assert_eq!(key, SearchCacheKey::new(&clang_add(), 4));
    assert_eq!(key.hash64(), SearchCacheKey::new(&clang_add(), 4).hash64());
    assert_ne!(key.hash64(), SearchCacheKey::new(&k, 8).hash64());
    assert_eq!(key.device, "CLANG");

    let other = kernel(elementwise_add(&[64, 32], DType::Float32), Renderer::clang());
    assert_ne!(key, SearchCacheKey::new(&other, 4));
}

#[test]
fn cache_key_bytes_are_stable() {
    let key = SearchCacheKey::new(&clang_add(), 3);
    let bytes = key.to_bytes();
    assert_eq!(&bytes[..8], &key.ast.0.to_le_bytes());
    assert_eq!(&bytes[8..16], &3u64.to_le_bytes());
    assert_eq!(&bytes[16..21], b"CLANG");
    assert_eq!(bytes[21], 0);
}
