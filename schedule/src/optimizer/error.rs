use snafu::Snafu;

use super::types::OptOps;

/// A requested [`Opt`](super::Opt) cannot be applied to the kernel.
///
/// Search treats every variant as "try the next candidate"; only
/// [`OptError::UnsupportedDevice`], [`OptError::TensorCoreLayout`] and
/// [`OptError::Shape`] indicate a bug or an unusable target.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum OptError {
    // ========== Generic ==========
    #[snafu(display("{op} needs an axis"))]
    MissingAxis { op: OptOps },
    #[snafu(display("{op} needs an amount"))]
    MissingAmount { op: OptOps },
    #[snafu(display("invalid axis {axis} for a kernel of {len} dims"))]
    InvalidAxis { axis: usize, len: usize },
    #[snafu(display("{op} by 1 is meaningless"))]
    AmountOne { op: OptOps },
    #[snafu(display("no {op} with a non-divisible amount: {size} % {amount} != 0"))]
    NotDivisible { op: OptOps, size: usize, amount: usize },
    #[snafu(display("{op} is not allowed on a kernel that doesn't use locals"))]
    LocalsDisabled { op: OptOps },
    #[snafu(display("exceeds maximum shared memory size: needs {needed}, max {max}"))]
    SharedMemoryExceeded { needed: usize, max: usize },
    #[snafu(display("can't upcast a dimension of size 1"))]
    UpcastSizeOne,

    // ========== Tensor cores ==========
    #[snafu(display("tensor core opts must be first"))]
    TensorCoreNotFirst,
    #[snafu(display("tensor core opts need both an axis and an amount"))]
    TensorCoreArgs,
    #[snafu(display("target has no tensor cores"))]
    NoTensorCores,
    #[snafu(display("no tensor core available for this kernel"))]
    TensorCoreNotApplicable,
    #[snafu(display("tensor core layout mismatch: {detail}"))]
    TensorCoreLayout { detail: String },
    #[snafu(display("no tensor core recipe for device {device}"))]
    UnsupportedDevice { device: String },

    // ========== LOCAL / GROUP ==========
    #[snafu(display("target does not support local"))]
    NoLocal,
    #[snafu(display("local is for globals, axis {axis} is not below {global_dims}"))]
    LocalNotGlobal { axis: usize, global_dims: usize },
    #[snafu(display("target does not support local or shared mem"))]
    NoShared,
    #[snafu(display("must be reduce axis to group"))]
    GroupNotReduce,
    #[snafu(display("can't group with tensor cores"))]
    GroupWithTensorCores,
    #[snafu(display("can't group with multiple reduces"))]
    GroupMultipleReduces,

    // ========== UNROLL / UPCAST ==========
    #[snafu(display("can't unroll an upcasted axis"))]
    UnrollUpcasted,
    #[snafu(display("don't unroll more than 32, got {amt}"))]
    UnrollTooLarge { amt: usize },
    #[snafu(display("upcast is for non-reduce axes"))]
    UpcastReduce,
    #[snafu(display("can't upcast tensor core local dim {axis}"))]
    UpcastTensorCoreLocal { axis: usize },
    #[snafu(display("don't upcast more than 8, got {amt}"))]
    UpcastTooLarge { amt: usize },
    #[snafu(display("invalid UPCASTMID: {reason}"))]
    InvalidUpcastMid { reason: &'static str },

    // ========== NOLOCALS / SWAP / MERGE ==========
    #[snafu(display("NOLOCALS is meaningless without locals"))]
    NoLocalsMeaningless,
    #[snafu(display("can't have no locals with locals"))]
    NoLocalsWithLocals,
    #[snafu(display("invalid swap of {axis} and {other} with {global_dims} global dims"))]
    InvalidSwap { axis: usize, other: usize, global_dims: usize },
    #[snafu(display("can only merge upcasted"))]
    MergeNotUpcasted,
    #[snafu(display("can't merge reduces"))]
    MergeReduces,

    // ========== PADTO ==========
    #[snafu(display("can't pad an upcasted axis"))]
    PadUpcasted,
    #[snafu(display("can't pad a reduce that is not a safe SUM"))]
    PadUnsafe,
    #[snafu(display("pad adds more than quadruple the work: {size} to {amt}"))]
    PadTooMuch { size: usize, amt: usize },
    #[snafu(display("nothing was padded"))]
    NothingPadded,

    #[snafu(display("malformed kernel ast: {detail}"))]
    Malformed { detail: &'static str },

    // ========== Heuristics ==========
    #[snafu(display("image output has no unit stride axis divisible by 4"))]
    ImageNoUnitStride,

    /// A view could not express the requested movement.
    #[snafu(context(false), display("view error: {source}"))]
    Shape { source: kernc_ir::Error },
}
