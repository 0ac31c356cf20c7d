//! Kernel optimization layer.
//!
//! A [`Kernel`] holds the shape state of one kernel AST on one target
//! ([`Renderer`]). Optimizations are [`Opt`]s applied through
//! [`Kernel::apply_opt`]; each one splits or moves axes between zones:
//!
//! ```text
//! | global | local | group | reduce | unroll/upcast |
//! ```
//!
//! # Pipeline
//!
//! 1. **Construction**: verify the AST, collect buffers and reduces, move
//!    reduce axes last and simplify
//! 2. **Optimization**: tensor cores, then hand-coded heuristics
//!    ([`optimize_kernel`]), or a search ([`beam_search`], [`mcts_search`])
//! 3. **Fixup**: [`Kernel::get_optimized_ast`] rebinds every view
//! 4. **Lowering**: [`Kernel::linearize`] and [`Kernel::to_program`]
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kernc_schedule::optimizer::{Kernel, Opt, PlainRender, Renderer};
//!
//! let mut k = Kernel::new(ast, Arc::new(Renderer::gpu()))?;
//! k.apply_opt(Opt::upcast(0, 4), true)?;
//! k.apply_opt(Opt::local(0, 16), true)?;
//! let program = k.to_program(&PlainRender)?;
//! ```

pub mod config;
pub mod error;
pub mod fixup;
pub mod heuristics;
pub mod kernel;
pub mod mcts;
pub mod opts;
pub mod program;
pub mod renderer;
pub mod search;
pub mod tc;
pub mod types;

pub use config::{HeuristicsConfig, OptStrategy, OptimizerConfig, SearchConfig, TcOpt, TcUsage};
pub use error::OptError;
pub use heuristics::{hand_coded_optimizations, optimize_kernel, required_optimizations};
pub use kernel::{AxisKind, Kernel, KernelBuffer};
pub use mcts::mcts_search;
pub use opts::{MAX_UNROLL, MAX_UPCAST};
pub use program::{LinearKernel, Program};
pub use renderer::{PlainRender, Render, Renderer, TensorCore};
pub use search::{
    actions, beam_search, get_kernel_actions, optimize_kernel_with_search, replay_opts, SearchCacheKey, SearchResult,
    BEAM_ACTIONS,
};
pub use tc::TensorCoreOptions;
pub use types::{Opt, OptOps};
