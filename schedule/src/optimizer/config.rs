//! Optimizer configuration types.
//!
//! Provides typed configuration for kernel optimization with bon builders.
//! Supports both explicit configuration and environment variable fallbacks.

use std::time::Duration;

use bon::bon;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_flag(name: &str) -> bool {
    env_parse::<u64>(name).is_some_and(|v| v != 0)
}

// ============================================================================
// OPTIMIZATION STRATEGY
// ============================================================================

/// How a kernel picks its opts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OptStrategy {
    /// No optimization (for debugging/regression testing).
    None,

    /// Hand-coded heuristics (default).
    #[default]
    Heuristic,

    /// Beam search from the unoptimized kernel.
    Beam {
        /// Number of candidates kept at each step.
        width: usize,
    },
}

impl OptStrategy {
    /// Get optimization strategy from environment variables.
    ///
    /// * `KERNC_NOOPT=1` - Disable all optimizations
    /// * `KERNC_BEAM=N` - Use beam search with width N
    pub fn from_env() -> Self {
        if env_flag("KERNC_NOOPT") {
            return Self::None;
        }
        match env_parse::<usize>("KERNC_BEAM") {
            Some(width) if width > 0 => Self::Beam { width },
            _ => Self::Heuristic,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

// ============================================================================
// TENSOR CORE SETTINGS
// ============================================================================

/// Tensor core usage level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TcUsage {
    Disabled,

    /// Emit WMMA instructions (default).
    #[default]
    Enabled,

    /// Shape the kernel for tensor cores without emitting WMMA.
    ShapeOnly,
}

impl TcUsage {
    pub fn from_level(level: usize) -> Self {
        match level {
            0 => Self::Disabled,
            1 => Self::Enabled,
            _ => Self::ShapeOnly,
        }
    }

    pub fn as_usize(&self) -> usize {
        match self {
            Self::Disabled => 0,
            Self::Enabled => 1,
            Self::ShapeOnly => 2,
        }
    }
}

/// How loosely a reduction may match a tensor core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TcOpt {
    /// Loads of the exact input dtype and a single reduce axis (default).
    #[default]
    Strict,

    /// Casted loads and several reduce axes.
    Relaxed,

    /// Like relaxed, and axes not divisible by the tile get padded.
    Padded,
}

impl TcOpt {
    pub fn from_level(level: usize) -> Self {
        match level {
            0 => Self::Strict,
            1 => Self::Relaxed,
            _ => Self::Padded,
        }
    }

    pub fn as_usize(&self) -> usize {
        match self {
            Self::Strict => 0,
            Self::Relaxed => 1,
            Self::Padded => 2,
        }
    }
}

// ============================================================================
// HEURISTICS CONFIGURATION
// ============================================================================

/// Knobs of the hand-coded optimizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeuristicsConfig {
    /// Tensor core usage level.
    pub tc_enabled: TcUsage,
    /// Tensor core matching level.
    pub tc_opt: TcOpt,

    /// Enable the matrix-vector specialization.
    pub matvec_enabled: bool,
    /// Rows per workgroup of the matrix-vector kernel.
    pub matvec_blocksize: usize,
    /// Threads cooperating on one row.
    pub matvec_threads_per_row: usize,
    /// Rows computed by one thread.
    pub matvec_rows_per_thread: usize,

    /// Launch without workgroups when nothing else needs them.
    pub disable_locals: bool,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            tc_enabled: TcUsage::Enabled,
            tc_opt: TcOpt::Strict,
            matvec_enabled: true,
            matvec_blocksize: 4,
            matvec_threads_per_row: 8,
            matvec_rows_per_thread: 4,
            disable_locals: false,
        }
    }
}

impl HeuristicsConfig {
    /// Create configuration from environment variables.
    ///
    /// * `KERNC_USE_TC` - tensor core usage, 0/1/2 (default: 1)
    /// * `KERNC_TC_OPT` - tensor core matching level, 0/1/2 (default: 0)
    /// * `KERNC_MV` - matrix-vector specialization (default: 1)
    /// * `KERNC_MV_BLOCKSIZE`, `KERNC_MV_THREADS_PER_ROW`, `KERNC_MV_ROWS_PER_THREAD`
    /// * `KERNC_NOLOCALS` - launch without workgroups
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tc_enabled: env_parse("KERNC_USE_TC").map(TcUsage::from_level).unwrap_or(defaults.tc_enabled),
            tc_opt: env_parse("KERNC_TC_OPT").map(TcOpt::from_level).unwrap_or(defaults.tc_opt),
            matvec_enabled: env_parse::<u64>("KERNC_MV").map(|v| v != 0).unwrap_or(defaults.matvec_enabled),
            matvec_blocksize: env_parse("KERNC_MV_BLOCKSIZE").unwrap_or(defaults.matvec_blocksize),
            matvec_threads_per_row: env_parse("KERNC_MV_THREADS_PER_ROW").unwrap_or(defaults.matvec_threads_per_row),
            matvec_rows_per_thread: env_parse("KERNC_MV_ROWS_PER_THREAD").unwrap_or(defaults.matvec_rows_per_thread),
            disable_locals: env_flag("KERNC_NOLOCALS"),
        }
    }
}

#[bon]
impl HeuristicsConfig {
    #[builder]
    pub fn builder(
        #[builder(default)] tc_enabled: TcUsage,
        #[builder(default)] tc_opt: TcOpt,
        #[builder(default = true)] matvec_enabled: bool,
        #[builder(default = 4)] matvec_blocksize: usize,
        #[builder(default = 8)] matvec_threads_per_row: usize,
        #[builder(default = 4)] matvec_rows_per_thread: usize,
        #[builder(default = false)] disable_locals: bool,
    ) -> Self {
        Self {
            tc_enabled,
            tc_opt,
            matvec_enabled,
            matvec_blocksize,
            matvec_threads_per_row,
            matvec_rows_per_thread,
            disable_locals,
        }
    }
}

// ============================================================================
// SEARCH CONFIGURATION
// ============================================================================

/// Limits of beam search and MCTS.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// Candidates kept per beam step.
    pub beam_width: usize,
    /// Stop submitting candidates after this long.
    pub timeout: Option<Duration>,
    /// Maximum product of upcast and unroll amounts.
    pub max_upcast: usize,
    /// Maximum workgroup size.
    pub max_local: usize,
    /// Seconds a step must gain to keep searching.
    pub min_progress: f64,
    /// Offer NOLOCALS as an action.
    pub nolocals: bool,
    /// Seed of the MCTS expansion shuffle.
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            beam_width: 4,
            timeout: None,
            max_upcast: 256,
            max_local: 1024,
            min_progress: 0.01e-6,
            nolocals: false,
            seed: 0,
        }
    }
}

#[bon]
impl SearchConfig {
    #[builder]
    pub fn builder(
        #[builder(default = 4)] beam_width: usize,
        timeout_secs: Option<u64>,
        #[builder(default = 256)] max_upcast: usize,
        #[builder(default = 1024)] max_local: usize,
        #[builder(default = 0.01e-6)] min_progress: f64,
        #[builder(default = false)] nolocals: bool,
        #[builder(default = 0)] seed: u64,
    ) -> Self {
        Self {
            beam_width,
            timeout: timeout_secs.map(Duration::from_secs),
            max_upcast,
            max_local,
            min_progress,
            nolocals,
            seed,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// * `KERNC_BEAM` - Beam width (default: 4)
    /// * `KERNC_BEAM_TIMEOUT` - Search budget in seconds
    /// * `KERNC_BEAM_UPCAST_MAX` - Max upcast product (default: 256)
    /// * `KERNC_BEAM_LOCAL_MAX` - Max workgroup size (default: 1024)
    /// * `KERNC_BEAM_MIN_PROGRESS` - Minimum gain per step in microseconds (default: 0.01)
    /// * `KERNC_NOLOCALS` - Offer NOLOCALS as an action
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            beam_width: env_parse("KERNC_BEAM").filter(|&w: &usize| w > 0).unwrap_or(defaults.beam_width),
            timeout: env_parse("KERNC_BEAM_TIMEOUT").map(Duration::from_secs),
            max_upcast: env_parse("KERNC_BEAM_UPCAST_MAX").unwrap_or(defaults.max_upcast),
            max_local: env_parse("KERNC_BEAM_LOCAL_MAX").unwrap_or(defaults.max_local),
            min_progress: env_parse::<f64>("KERNC_BEAM_MIN_PROGRESS").map(|us| us * 1e-6).unwrap_or(defaults.min_progress),
            nolocals: env_flag("KERNC_NOLOCALS"),
            seed: defaults.seed,
        }
    }
}

// ============================================================================
// TOP-LEVEL OPTIMIZER CONFIGURATION
// ============================================================================

/// Top-level optimizer configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerConfig {
    pub strategy: OptStrategy,
    pub heuristics: HeuristicsConfig,
    pub search: SearchConfig,
}

#[bon]
impl OptimizerConfig {
    #[builder]
    pub fn builder(
        #[builder(default)] strategy: OptStrategy,
        #[builder(default)] heuristics: HeuristicsConfig,
        #[builder(default)] search: SearchConfig,
    ) -> Self {
        Self { strategy, heuristics, search }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let strategy = OptStrategy::from_env();
        let mut search = SearchConfig::from_env();
        if let OptStrategy::Beam { width } = strategy {
            search.beam_width = width;
        }
        Self { strategy, heuristics: HeuristicsConfig::from_env(), search }
    }
}
