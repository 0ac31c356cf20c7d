//! Beam search over opt sequences.
//!
//! The search never runs kernels itself: candidates are rendered with the
//! caller's [`Render`] and timed by a caller-supplied closure returning
//! seconds, or `None` when the candidate failed to compile or run.
//!
//! # Algorithm
//!
//! 1. Start from the given kernel with an infinite time
//! 2. Apply every action to every kernel in the beam
//! 3. Render and time each candidate, skipping duplicate sources
//! 4. Keep the fastest `beam_width`
//! 5. Stop when a step gains less than `min_progress`

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use kernc_ir::AstKey;
use once_cell::sync::Lazy;
use tracing::{debug, trace};
use xxhash_rust::xxh64::xxh64;

use super::config::{OptStrategy, OptimizerConfig, SearchConfig};
use super::heuristics::{optimize_kernel, required_optimizations};
use super::kernel::Kernel;
use super::program::Program;
use super::renderer::Render;
use super::types::{Opt, OptOps};
use crate::error::Result;
use crate::helpers::prod;

/// Function name candidates are rendered under, so equal kernels render equal.
pub(crate) const SEARCH_NAME: &str = "test";

// ============================================================================
// ACTION SPACE
// ============================================================================

/// Every opt the search may try at one step.
///
/// NOLOCALS is appended by [`actions`] when configured.
pub static BEAM_ACTIONS: Lazy<Vec<Opt>> = Lazy::new(|| {
    let mut actions = Vec::with_capacity(256);
    for axis in 0..6 {
        actions.extend([0, 2, 3, 4, 5, 7].map(|amt| Opt::upcast(axis, amt)));
    }
    for axis in 0..5 {
        actions.extend([0, 4, 7].map(|amt| Opt::unroll(axis, amt)));
    }
    for axis in 0..6 {
        actions.extend([2, 3, 4, 8, 13, 16, 29].map(|amt| Opt::local(axis, amt)));
    }
    for axis in 0..3 {
        actions.extend([13, 16, 28, 29, 32, 49, 64, 256].map(|amt| Opt::grouptop(axis, amt)));
    }
    for axis in 0..3 {
        actions.extend([0, 4, 8, 16].map(|amt| Opt::group(axis, amt)));
    }
    actions.extend((0..7).map(|axis| Opt::padto(axis, 32)));
    actions.extend([Opt::local(0, 32), Opt::upcastmid(1, 4), Opt::tc(0, 0)]);
    actions.extend((0..9).map(|axis| Opt::tc(axis, 2)));
    for axis in 0..5 {
        actions.extend((axis + 1..5).map(|other| Opt::swap(axis, other)));
    }
    actions
});

static NOLOCALS_ACTIONS: Lazy<Vec<Opt>> =
    Lazy::new(|| BEAM_ACTIONS.iter().copied().chain(std::iter::once(Opt::nolocals())).collect());

/// The action space for `config`.
pub fn actions(config: &SearchConfig) -> &'static [Opt] {
    if config.nolocals {
        &NOLOCALS_ACTIONS
    } else {
        &BEAM_ACTIONS
    }
}

/// Every kernel one action away from `k`, keyed by action index + 1.
///
/// Key 0 holds `k` itself when `include_0` is set. Candidates whose upcast
/// or workgroup size exceeds the configured caps are dropped.
pub fn get_kernel_actions(k: &Kernel, include_0: bool, config: &SearchConfig) -> BTreeMap<usize, Kernel> {
    let actions = actions(config);
    let mut acted = BTreeMap::new();
    if include_0 {
        acted.insert(0, k.clone());
    }
    for (i, &action) in actions.iter().enumerate() {
        if let (Some(_), false) = (action.axis, action.op == OptOps::TC) {
            let Some(ax) = action.real_axis(k) else { continue };
            if ax >= k.shape_len() {
                continue;
            }
            // the whole-axis variant covers it
            if action.amt == Some(k.full_shape()[ax]) && actions.contains(&Opt::new(action.op, ax, 0)) {
                continue;
            }
        }
        let mut candidate = k.clone();
        if let Err(err) = candidate.apply_opt(action, true) {
            trace!(%action, %err, "action rejected");
            continue;
        }
        let tc_up = candidate.tensor_core.as_ref().map_or(1, |tc| prod(tc.dims.into_iter()) / tc.num_threads().max(1));
        let (mut up, mut lcl) = (1, 1);
        for (&s, kind) in candidate.full_shape().iter().zip(candidate.colors()) {
            if kind.is_upcast() {
                up *= s;
            } else if kind.is_local() {
                lcl *= s;
            }
        }
        if up / tc_up.max(1) > config.max_upcast || lcl > config.max_local {
            continue;
        }
        acted.insert(i + 1, candidate);
    }
    acted
}

// ============================================================================
// BEAM SEARCH
// ============================================================================

/// Outcome of a search.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub kernel: Kernel,
    /// Best time in seconds, infinite when nothing could be timed.
    pub time: f64,
    pub iterations: usize,
    pub candidates_evaluated: usize,
}

/// Beam search from `k`.
///
/// `time` is called once per distinct rendered candidate. Once
/// `config.timeout` has passed no new candidates are submitted.
#[tracing::instrument(skip_all, fields(kernel = %k.base_name(), width = config.beam_width))]
pub fn beam_search<F>(k: Kernel, config: &SearchConfig, render: &dyn Render, mut time: F) -> SearchResult
where
    F: FnMut(&Program) -> Option<f64>,
{
    let start = Instant::now();
    let timed_out = || config.timeout.is_some_and(|t| start.elapsed() > t);
    let mut beam: Vec<(Kernel, f64)> = vec![(k, f64::INFINITY)];
    let mut seen_srcs: HashSet<String> = HashSet::new();
    let (mut iterations, mut candidates_evaluated) = (0, 0);

    loop {
        iterations += 1;
        let candidates: Vec<Kernel> =
            beam.iter().flat_map(|(k, _)| get_kernel_actions(k, false, config).into_values()).collect();

        let mut timed: Vec<(Kernel, f64)> = Vec::new();
        for candidate in candidates {
            if timed_out() {
                debug!("search timeout");
                break;
            }
            let program = match candidate.to_program_named(render, SEARCH_NAME) {
                Ok(p) => p,
                Err(err) => {
                    debug!(%err, opts = ?candidate.applied_opts, "candidate failed to compile");
                    continue;
                }
            };
            if !seen_srcs.insert(program.src.clone()) {
                continue;
            }
            candidates_evaluated += 1;
            if let Some(tm) = time(&program) {
                timed.push((candidate, tm));
            }
        }

        timed.sort_by(|a, b| a.1.total_cmp(&b.1));
        let best_old = beam[0].1;
        let exiting = match timed.first() {
            None => true,
            Some(&(_, best_new)) => best_new < config.min_progress || best_old - best_new < config.min_progress,
        };
        if !exiting {
            timed.truncate(config.beam_width.max(1));
            beam = timed;
            debug!(time = beam[0].1, opts = ?beam[0].0.applied_opts, "beam step");
            if timed_out() {
                break;
            }
            continue;
        }
        if let Some(best) = timed.into_iter().next().filter(|(_, tm)| *tm < best_old) {
            beam = vec![best];
        }
        break;
    }

    let (kernel, time) = beam.swap_remove(0);
    debug!(time, iterations, candidates_evaluated, opts = ?kernel.applied_opts, "beam search done");
    SearchResult { kernel, time, iterations, candidates_evaluated }
}

/// Optimize `k` according to `config`, searching when a beam is requested.
pub fn optimize_kernel_with_search<F>(
    k: &Kernel,
    config: &OptimizerConfig,
    render: &dyn Render,
    time: F,
) -> Result<Kernel>
where
    F: FnMut(&Program) -> Option<f64>,
{
    let mut k = k.clone();
    match config.strategy {
        OptStrategy::Beam { width } => {
            required_optimizations(&mut k)?;
            let search = SearchConfig { beam_width: width, ..config.search.clone() };
            Ok(beam_search(k, &search, render, time).kernel)
        }
        OptStrategy::None | OptStrategy::Heuristic => {
            optimize_kernel(&mut k, config)?;
            Ok(k)
        }
    }
}

/// Re-apply a cached opt sequence to a fresh kernel.
pub fn replay_opts(mut k: Kernel, opts: &[Opt]) -> Result<Kernel> {
    for &opt in opts {
        k.apply_opt(opt, true)?;
    }
    Ok(k)
}

// ============================================================================
// CACHE KEY
// ============================================================================

/// Key under which an external cache stores the opts a search chose.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchCacheKey {
    pub ast: AstKey,
    /// Search budget: beam width or MCTS iterations.
    pub amt: usize,
    pub device: String,
    pub suffix: String,
}

impl SearchCacheKey {
    pub fn new(k: &Kernel, amt: usize) -> Self {
        Self { ast: k.ast.key(), amt, device: k.opts.device.clone(), suffix: k.opts.suffix.clone() }
    }

    /// Stable byte encoding, usable as a database key.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + self.device.len() + self.suffix.len() + 1);
        bytes.extend_from_slice(&self.ast.0.to_le_bytes());
        bytes.extend_from_slice(&(self.amt as u64).to_le_bytes());
        bytes.extend_from_slice(self.device.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(self.suffix.as_bytes());
        bytes
    }

    pub fn hash64(&self) -> u64 {
        xxh64(&self.to_bytes(), 0)
    }
}
