//! Kernel compiler passes: from a kernel AST to a linear program.
//!
//! # Module Organization
//!
//! - [`symbolic`] - constant folding and algebraic simplification
//! - [`expand`] - unrolling of upcast/unroll axes into vector lanes
//! - [`linearize`] - rewrite to a fixed point and order the graph
//! - [`lower`] - AST to UOp graph, with launch dims and accumulators
//! - [`optimizer`] - shape optimizations, heuristics, tensor cores and search
//! - [`estimate`] - op and memory cost of a linear program
//!
//! # Pipeline
//!
//! ```text
//! AstNode ──Kernel::new──► Kernel ──apply_opt*──► Kernel
//!    ──get_optimized_ast──► AstNode ──lower──► UOp graph
//!    ──linearize──► Vec<UOp> ──Render──► Program
//! ```

pub mod error;
pub mod estimate;
pub mod expand;
pub mod helpers;
pub mod linearize;
pub mod lower;
pub mod optimizer;
pub mod symbolic;

#[cfg(test)]
pub mod test;

pub use error::{CompileError, Result};
pub use estimate::flops_mem;
pub use linearize::{LinearizeError, format_listing, linearize};
pub use lower::{LowerError, lower};
pub use optimizer::{
    Kernel, OptError, OptStrategy, OptimizerConfig, Program, Renderer, beam_search, mcts_search, optimize_kernel,
    optimize_kernel_with_search,
};

pub use kernc_ir::{PatternMatcher, UOp, UPat, graph_rewrite};
