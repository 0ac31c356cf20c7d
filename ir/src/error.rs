use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by shape manipulation.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Reshape size mismatch.
    #[snafu(display("reshape size mismatch: {from:?} -> {to:?}"))]
    ReshapeSizeMismatch { from: Vec<usize>, to: Vec<usize> },

    /// Permutation is not a permutation of `0..rank`.
    #[snafu(display("invalid permutation {permutation:?} for rank {rank}"))]
    InvalidPermutation { permutation: Vec<usize>, rank: usize },

    /// Argument rank does not match the shape rank.
    #[snafu(display("rank mismatch: expected {expected}, got {actual}"))]
    RankMismatch { expected: usize, actual: usize },

    /// Shrink bounds violation.
    #[snafu(display("shrink bounds violation: dimension {dim} has range [{begin}, {end}) but size is {size}"))]
    ShrinkOutOfBounds { dim: usize, begin: usize, end: usize, size: usize },

    /// Expand of a dimension that is neither equal nor broadcastable.
    #[snafu(display("cannot expand dimension {dim} from {from} to {to}"))]
    InvalidExpand { dim: usize, from: usize, to: usize },
}

/// A kernel AST that violates its structural invariants.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum AstError {
    /// Kernel root is not a KERNEL node.
    #[snafu(display("kernel AST root must be KERNEL, got {op}"))]
    NotAKernel { op: String },

    /// Output store buffer indices must be `0..n` in order.
    #[snafu(display("unexpected output buffer idx {actual} != {expected}"))]
    OutputIndex { expected: isize, actual: isize },

    /// Kernel sources must all be stores.
    #[snafu(display("kernels must have stores as the output, got {op}"))]
    OutputNotStore { op: String },

    #[snafu(display("store must have exactly one source, got {count}"))]
    StoreSources { count: usize },

    #[snafu(display("outputs must have the same size, got {first} and {other}"))]
    OutputSizeMismatch { first: usize, other: usize },

    /// A non-reduce op whose sources disagree on shape.
    #[snafu(display("found implicit movement op {op}: {src:?} != {expected:?}"))]
    ImplicitMovement { op: String, src: Vec<usize>, expected: Vec<usize> },

    #[snafu(display("reduce axis {axis} out of range for rank {rank}"))]
    ReduceAxisOutOfRange { axis: usize, rank: usize },

    #[snafu(display("shapes must have either 1 or n in each dimension, {dims:?}"))]
    IncompatibleShapes { dims: Vec<Vec<usize>> },

    #[snafu(display("all views must have the same rank, expected {expected} got {actual}"))]
    ViewRank { expected: usize, actual: usize },

    /// Meta operations are scheduled elsewhere and never reach a kernel.
    #[snafu(display("meta op {op} is not allowed inside a kernel"))]
    MetaOpInKernel { op: String },
}
