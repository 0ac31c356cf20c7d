//! Optimization vocabulary: [`OptOps`] and the [`Opt`] descriptor.
use std::fmt;

use super::kernel::Kernel;

/// Shape transforms the kernel optimizer understands.
///
/// Declaration order is the canonical sort order of applied opts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumIter, serde::Serialize, serde::Deserialize)]
pub enum OptOps {
    /// Tensor core selection, always the first opt of a kernel.
    TC,
    /// Unroll a non-reduce axis into per-lane copies.
    UPCAST,
    /// Upcast a reduce axis in the middle of a grouped reduce (images only).
    UPCASTMID,
    /// Unroll a reduce axis.
    UNROLL,
    /// Move a global axis into the workgroup.
    LOCAL,
    /// Stage a reduce axis through shared memory, inner split.
    GROUP,
    /// Stage a reduce axis through shared memory, outer split.
    GROUPTOP,
    /// Launch without a workgroup.
    NOLOCALS,
    /// Pad an axis up to a multiple of the amount.
    PADTO,
    /// Merge two adjacent upcast axes.
    MERGE,
    /// Swap two global axes.
    SWAP,
}

/// One shape transform: an op, the axis it targets and an amount.
///
/// `amt == 0` means "the whole axis". For [`OptOps::SWAP`] the amount is
/// the other axis and for [`OptOps::TC`] it is the tensor core opt level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Opt {
    pub op: OptOps,
    pub axis: Option<usize>,
    pub amt: Option<usize>,
}

impl Opt {
    pub fn new(op: OptOps, axis: impl Into<Option<usize>>, amt: impl Into<Option<usize>>) -> Self {
        Self { op, axis: axis.into(), amt: amt.into() }
    }

    pub fn tc(axis: usize, opt_level: usize) -> Self {
        Self::new(OptOps::TC, axis, opt_level)
    }

    pub fn upcast(axis: usize, amt: usize) -> Self {
        Self::new(OptOps::UPCAST, axis, amt)
    }

    pub fn upcastmid(axis: usize, amt: usize) -> Self {
        Self::new(OptOps::UPCASTMID, axis, amt)
    }

    pub fn unroll(axis: usize, amt: usize) -> Self {
        Self::new(OptOps::UNROLL, axis, amt)
    }

    pub fn local(axis: usize, amt: usize) -> Self {
        Self::new(OptOps::LOCAL, axis, amt)
    }

    pub fn group(axis: usize, amt: usize) -> Self {
        Self::new(OptOps::GROUP, axis, amt)
    }

    pub fn grouptop(axis: usize, amt: usize) -> Self {
        Self::new(OptOps::GROUPTOP, axis, amt)
    }

    pub fn nolocals() -> Self {
        Self::new(OptOps::NOLOCALS, None, None)
    }

    pub fn padto(axis: usize, amt: usize) -> Self {
        Self::new(OptOps::PADTO, axis, amt)
    }

    pub fn merge(axis: usize) -> Self {
        Self::new(OptOps::MERGE, axis, None)
    }

    pub fn swap(axis: usize, other: usize) -> Self {
        Self::new(OptOps::SWAP, axis, other)
    }

    /// The kernel axis this opt targets.
    ///
    /// UNROLL counts from the first reduce axis, GROUP/GROUPTOP from the
    /// first ungrouped reduce axis; every other op uses absolute axes.
    pub fn real_axis(&self, k: &Kernel) -> Option<usize> {
        let axis = self.axis?;
        Some(match self.op {
            OptOps::UNROLL => k.first_reduce() + axis,
            OptOps::GROUP | OptOps::GROUPTOP => k.first_reduce() + k.group_for_reduces + axis,
            _ => axis,
        })
    }
}

impl fmt::Display for Opt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<usize>| v.map_or_else(|| "None".to_string(), |v| v.to_string());
        write!(f, "Opt(op={}, axis={}, amt={})", self.op, show(self.axis), show(self.amt))
    }
}
