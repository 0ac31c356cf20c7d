//! Monte-Carlo tree search over opt sequences.
//!
//! Nodes live in an arena and refer to each other by index. A node's `t` is
//! the negated sum of the times seen below it, so a higher UCB score means
//! a faster subtree.

use std::collections::HashMap;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, trace};

use super::config::SearchConfig;
use super::kernel::Kernel;
use super::program::Program;
use super::renderer::Render;
use super::search::{get_kernel_actions, SearchResult, SEARCH_NAME};

/// Exploration constant of the UCB score.
const C: f64 = std::f64::consts::SQRT_2;

#[derive(Debug)]
struct Node {
    kernel: Kernel,
    t: f64,
    n: u32,
    parent: Option<usize>,
    /// `None` until expanded.
    children: Option<Vec<usize>>,
}

struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn push(&mut self, kernel: Kernel, parent: Option<usize>) -> usize {
        self.nodes.push(Node { kernel, t: 0.0, n: 0, parent, children: None });
        self.nodes.len() - 1
    }

    fn ucb(&self, idx: usize, best_tm: f64) -> f64 {
        let node = &self.nodes[idx];
        if node.n == 0 {
            return f64::INFINITY;
        }
        let parent_n = node.parent.map_or(node.n, |p| self.nodes[p].n).max(1);
        let n = f64::from(node.n);
        (node.t / n) / best_tm + C * (f64::from(parent_n).ln() / n).sqrt()
    }

    /// Walk down by UCB to a node without expanded children.
    fn select(&self, best_tm: f64) -> usize {
        let mut idx = 0;
        while let Some(children) = self.nodes[idx].children.as_ref().filter(|c| !c.is_empty()) {
            let mut best = children[0];
            let mut best_score = self.ucb(best, best_tm);
            for &c in &children[1..] {
                let score = self.ucb(c, best_tm);
                if score > best_score {
                    best = c;
                    best_score = score;
                }
            }
            idx = best;
        }
        idx
    }

    fn remove(&mut self, idx: usize) {
        if let Some(parent) = self.nodes[idx].parent {
            if let Some(children) = self.nodes[parent].children.as_mut() {
                children.retain(|&c| c != idx);
            }
        }
    }

    fn backprop(&mut self, mut idx: usize, tm: f64) {
        loop {
            let node = &mut self.nodes[idx];
            node.t -= tm;
            node.n += 1;
            match node.parent {
                Some(p) => idx = p,
                None => break,
            }
        }
    }
}

/// MCTS from `k` for `amt` rollouts.
///
/// Children are expanded in a shuffled order seeded by `config.seed`, so a
/// run is reproducible for a deterministic timer. Failed candidates are
/// pruned from the tree.
#[tracing::instrument(skip_all, fields(kernel = %k.base_name(), amt = amt))]
pub fn mcts_search<F>(k: Kernel, amt: usize, config: &SearchConfig, render: &dyn Render, mut time: F) -> SearchResult
where
    F: FnMut(&Program) -> Option<f64>,
{
    let start = Instant::now();
    let mut rng = SmallRng::seed_from_u64(config.seed);
    let mut tree = Tree { nodes: Vec::new() };
    tree.push(k.clone(), None);

    let mut best = k;
    let mut best_tm = f64::INFINITY;
    let mut seen_srcs: HashMap<String, f64> = HashMap::new();
    let (mut iterations, mut candidates_evaluated) = (0, 0);

    for _ in 0..amt {
        if config.timeout.is_some_and(|t| start.elapsed() > t) {
            debug!("search timeout");
            break;
        }
        iterations += 1;

        let mut node = tree.select(best_tm);
        if tree.nodes[node].children.is_none() {
            let mut actions: Vec<Kernel> =
                get_kernel_actions(&tree.nodes[node].kernel, false, config).into_values().collect();
            actions.shuffle(&mut rng);
            let children: Vec<usize> = actions.into_iter().map(|kernel| tree.push(kernel, Some(node))).collect();
            let first = children.first().copied();
            tree.nodes[node].children = Some(children);
            if let Some(first) = first {
                node = first;
            }
        }

        let program = match tree.nodes[node].kernel.to_program_named(render, SEARCH_NAME) {
            Ok(p) => p,
            Err(err) => {
                trace!(%err, "rollout failed to compile");
                tree.remove(node);
                continue;
            }
        };
        let tm = match seen_srcs.get(&program.src) {
            Some(&tm) => Some(tm),
            None => {
                candidates_evaluated += 1;
                let tm = time(&program);
                if let Some(tm) = tm {
                    seen_srcs.insert(program.src.clone(), tm);
                }
                tm
            }
        };
        let Some(tm) = tm else {
            tree.remove(node);
            continue;
        };

        if tm < best_tm {
            best = tree.nodes[node].kernel.clone();
            best_tm = tm;
            debug!(time = tm, opts = ?best.applied_opts, "mcts improved");
        }
        tree.backprop(node, tm);
    }

    SearchResult { kernel: best, time: best_tm, iterations, candidates_evaluated }
}
