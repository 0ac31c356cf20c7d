//! Graph rewriting to a fixed point.

mod engine;

pub use engine::{graph_rewrite, graph_rewrite_with_cache, RewriteCache};
