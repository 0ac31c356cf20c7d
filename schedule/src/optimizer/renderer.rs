//! Target capability profiles and the rendering seam.
//!
//! A [`Renderer`] tells the optimizer what a device can do: whether it has
//! workgroups and shared memory, how large its launch grid may be, and which
//! tensor core instructions it exposes. Source generation itself lives behind
//! the [`Render`] trait.

use std::fmt;
use std::sync::Arc;

use kernc_ir::prelude::*;

use crate::helpers::prod;
use crate::linearize::format_listing;

/// Default limit of each launch dimension.
const DEFAULT_DIM_MAX: usize = 0x8FFF_FFFF;

/// Device capability profile consumed by the optimizer and the lowerer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renderer {
    /// Device family, e.g. "CUDA". Selects tensor core recipes.
    pub device: String,

    /// Extra qualifier of the device profile, part of the search cache key.
    pub suffix: String,

    /// Kernels run in workgroups indexed by local ids.
    ///
    /// Without it global and local axes become plain loops.
    pub has_local: bool,

    /// Workgroups can share memory. Needed for GROUP/GROUPTOP.
    pub has_shared: bool,

    /// Four-wide vector loads and stores are available.
    pub supports_float4: bool,

    /// Shared memory per workgroup in bytes.
    pub shared_max: usize,

    /// Maximum global size per launch dimension.
    ///
    /// `None` for targets without a launch grid.
    pub global_max: Option<Vec<usize>>,

    /// Maximum local size per launch dimension.
    pub local_max: Option<Vec<usize>>,

    /// Tensor core instructions, tried in order.
    pub tensor_cores: Vec<TensorCore>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            device: String::new(),
            suffix: String::new(),
            has_local: true,
            has_shared: true,
            supports_float4: true,
            shared_max: 32768,
            global_max: Some(vec![DEFAULT_DIM_MAX; 3]),
            local_max: Some(vec![DEFAULT_DIM_MAX; 3]),
            tensor_cores: Vec::new(),
        }
    }
}

impl Renderer {
    /// Plain C target: no workgroups, no vector memory.
    pub fn clang() -> Self {
        Self {
            device: "CLANG".to_string(),
            has_local: false,
            has_shared: false,
            supports_float4: false,
            global_max: None,
            local_max: None,
            ..Default::default()
        }
    }

    /// Generic OpenCL-style GPU.
    pub fn gpu() -> Self {
        Self { device: "GPU".to_string(), ..Default::default() }
    }

    pub fn cuda() -> Self {
        Self {
            device: "CUDA".to_string(),
            shared_max: 49152,
            global_max: Some(vec![2147483647, 65535, 65535]),
            local_max: Some(vec![1024, 1024, 64]),
            tensor_cores: TensorCore::cuda(),
            ..Default::default()
        }
    }

    pub fn metal() -> Self {
        Self { device: "METAL".to_string(), tensor_cores: TensorCore::metal(), ..Default::default() }
    }

    pub fn amd() -> Self {
        Self {
            device: "AMD".to_string(),
            shared_max: 65536,
            tensor_cores: TensorCore::amd(),
            ..Default::default()
        }
    }
}

/// A fixed-shape matrix multiply-accumulate instruction.
///
/// Computes an `N x M` tile of `C += A * B` with a reduce length of `K`,
/// spread over the threads of one workgroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorCore {
    /// Tile dimensions (N, M, K).
    pub dims: [usize; 3],
    pub dtype_in: DType,
    pub dtype_out: DType,
    /// Local splits of the N (0) or M (1) axis, as `(dim, amount)`.
    pub threads: Vec<(usize, usize)>,
    /// Per-thread upcast splits of the A, B and C operands.
    pub thread_local_sizes: Vec<Vec<usize>>,
}

impl TensorCore {
    /// Product of every thread split: threads per instruction.
    pub fn num_threads(&self) -> usize {
        prod(self.threads.iter().map(|&(_, amt)| amt))
    }

    /// Elements of each operand held by one thread.
    pub fn wmma_sizes(&self) -> [usize; 3] {
        let size = |i: usize| self.thread_local_sizes.get(i).map_or(1, |s| prod(s.iter().copied()));
        [size(0), size(1), size(2)]
    }

    fn table(
        dims: [usize; 3],
        threads: &[(usize, usize)],
        thread_local_sizes: &[&[usize]],
        dtypes: &[(DType, DType)],
    ) -> Vec<Self> {
        dtypes
            .iter()
            .map(|(dtype_in, dtype_out)| Self {
                dims,
                dtype_in: dtype_in.clone(),
                dtype_out: dtype_out.clone(),
                threads: threads.to_vec(),
                thread_local_sizes: thread_local_sizes.iter().map(|s| s.to_vec()).collect(),
            })
            .collect()
    }

    pub fn metal() -> Vec<Self> {
        Self::table(
            [8, 8, 8],
            &[(0, 2), (1, 4), (0, 2), (1, 2)],
            &[&[2], &[2], &[2]],
            &[
                (DType::Float32, DType::Float32),
                (DType::Float16, DType::Float32),
                (DType::Float16, DType::Float16),
                (DType::BFloat16, DType::Float32),
                (DType::BFloat16, DType::BFloat16),
            ],
        )
    }

    pub fn cuda() -> Vec<Self> {
        Self::table(
            [8, 16, 16],
            &[(0, 2), (0, 2), (1, 2), (1, 2), (1, 2)],
            &[&[2, 2, 2], &[2, 2], &[2, 2]],
            &[
                (DType::Float16, DType::Float32),
                (DType::BFloat16, DType::Float32),
                (DType::Float16, DType::Float16),
            ],
        )
    }

    pub fn amd() -> Vec<Self> {
        Self::table(
            [16, 16, 16],
            &[(0, 8), (0, 2), (1, 2)],
            &[&[16], &[16], &[4, 2]],
            &[(DType::Float16, DType::Float32), (DType::Float16, DType::Float16)],
        )
    }
}

impl fmt::Display for TensorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [n, m, k] = self.dims;
        write!(f, "WMMA_{n}_{m}_{k}_{}_{}", self.dtype_in, self.dtype_out)
    }
}

/// Turns a linearized kernel into device source text.
pub trait Render {
    fn render(&self, name: &str, uops: &[Arc<UOp>]) -> String;
}

/// Renders the instruction listing itself, for inspection and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRender;

impl Render for PlainRender {
    fn render(&self, name: &str, uops: &[Arc<UOp>]) -> String {
        format!("kernel {name}\n{}", format_listing(uops))
    }
}
