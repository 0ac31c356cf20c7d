//! Stack of views describing how a kernel shape addresses a buffer.

use std::sync::Arc;

use kernc_dtype::DType;
use snafu::ensure;

use crate::error::*;
use crate::UOp;

use super::view::View;

/// Point-by-point probing covers the whole index space up to this size.
const EXHAUSTIVE_PROBE_LIMIT: usize = 4096;

/// Views applied newest-last: the last view maps kernel coordinates to a flat
/// index, which every earlier view then reinterprets in its own shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeTracker {
    views: Arc<[View]>,
}

/// How one axis affects the final index and validity.
struct AxisProfile {
    /// Constant step of the index along the axis, `None` when not linear.
    stride: Option<i64>,
    masked: bool,
}

impl ShapeTracker {
    pub fn from_shape(shape: &[usize]) -> Self {
        Self::from_view(View::contiguous_of(shape))
    }

    pub fn from_view(view: View) -> Self {
        Self { views: Arc::from(vec![view]) }
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    /// The newest view; the stack is never empty.
    pub fn view(&self) -> &View {
        &self.views[self.views.len() - 1]
    }

    pub fn shape(&self) -> &[usize] {
        &self.view().shape
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn size(&self) -> usize {
        self.view().size()
    }

    pub fn contiguous(&self) -> bool {
        self.views.len() == 1 && self.view().contiguous
    }

    fn with_view(&self, view: View) -> Self {
        let mut views = self.views.to_vec();
        let last = views.len() - 1;
        views[last] = view;
        Self { views: views.into() }
    }

    fn push_view(&self, view: View) -> Self {
        let mut views = self.views.to_vec();
        views.push(view);
        Self { views: views.into() }
    }

    // =========================================================================
    // Movement
    // =========================================================================

    pub fn reshape(&self, new_shape: &[usize]) -> Result<Self> {
        let new_size: usize = new_shape.iter().product();
        ensure!(new_size == self.size(), ReshapeSizeMismatchSnafu { from: self.shape().to_vec(), to: new_shape.to_vec() });
        match self.view().reshape(new_shape) {
            Some(view) => Ok(self.with_view(view)),
            None => Ok(self.push_view(View::contiguous_of(new_shape))),
        }
    }

    pub fn permute(&self, axis: &[usize]) -> Result<Self> {
        let mut sorted = axis.to_vec();
        sorted.sort_unstable();
        ensure!(
            sorted.len() == self.ndim() && sorted.iter().enumerate().all(|(i, &a)| i == a),
            InvalidPermutationSnafu { permutation: axis.to_vec(), rank: self.ndim() }
        );
        Ok(self.with_view(self.view().permute(axis)))
    }

    pub fn pad(&self, arg: &[(usize, usize)]) -> Result<Self> {
        ensure!(arg.len() == self.ndim(), RankMismatchSnafu { expected: self.ndim(), actual: arg.len() });
        Ok(self.with_view(self.view().pad(arg)))
    }

    pub fn shrink(&self, arg: &[(usize, usize)]) -> Result<Self> {
        ensure!(arg.len() == self.ndim(), RankMismatchSnafu { expected: self.ndim(), actual: arg.len() });
        for (dim, (&(begin, end), &size)) in arg.iter().zip(self.shape()).enumerate() {
            ensure!(begin <= end && end <= size, ShrinkOutOfBoundsSnafu { dim, begin, end, size });
        }
        Ok(self.with_view(self.view().shrink(arg)))
    }

    pub fn expand(&self, new_shape: &[usize]) -> Result<Self> {
        ensure!(new_shape.len() == self.ndim(), RankMismatchSnafu { expected: self.ndim(), actual: new_shape.len() });
        for (dim, (&from, &to)) in self.shape().iter().zip(new_shape).enumerate() {
            ensure!(from == to || from == 1, InvalidExpandSnafu { dim, from, to });
        }
        Ok(self.with_view(self.view().expand(new_shape)))
    }

    /// Merge trailing views while they compose into one.
    pub fn simplify(&self) -> Self {
        let mut views = self.views.to_vec();
        while views.len() >= 2 {
            let n = views.len();
            match views[n - 2].merge(&views[n - 1]) {
                Some(merged) => {
                    views.truncate(n - 2);
                    views.push(merged);
                }
                None => break,
            }
        }
        Self { views: views.into() }
    }

    // =========================================================================
    // Index analysis
    // =========================================================================

    /// Flat index and validity of one kernel coordinate.
    pub fn expr_at(&self, idxs: &[i64]) -> (i64, bool) {
        let (mut idx, mut valid) = self.view().expr_at(idxs);
        for view in self.views[..self.views.len() - 1].iter().rev() {
            let view = view.minify();
            let mut coords = vec![0i64; view.ndim()];
            let mut acc = 1i64;
            for (d, &size) in view.shape.iter().enumerate().rev() {
                coords[d] = idx.div_euclid(acc).rem_euclid(size as i64);
                acc *= size as i64;
            }
            let (i, ok) = view.expr_at(&coords);
            idx = i;
            valid &= ok;
        }
        (idx, valid)
    }

    /// Number of buffer elements the tracker can touch: max index + 1.
    pub fn real_size(&self) -> usize {
        if self.shape().contains(&0) {
            return 0;
        }
        let empty_mask = |v: &View| v.mask.as_ref().is_some_and(|m| m.iter().any(|&(b, e)| b >= e));
        if self.views.iter().any(empty_mask) {
            return 0;
        }

        let (mut lo, mut hi) = self.view().index_bounds();
        for view in self.views[..self.views.len() - 1].iter().rev() {
            let view = view.minify();
            let (mut nlo, mut nhi) = (view.offset, view.offset);
            let mut acc = 1i64;
            for (&size, &st) in view.shape.iter().zip(&view.strides).rev() {
                let d = size as i64;
                let (q0, q1) = (lo.div_euclid(acc), hi.div_euclid(acc));
                let (c0, c1) = if q1 - q0 + 1 >= d || q0.rem_euclid(d) > q1.rem_euclid(d) {
                    (0, d - 1)
                } else {
                    (q0.rem_euclid(d), q1.rem_euclid(d))
                };
                nlo += (c0 * st).min(c1 * st);
                nhi += (c0 * st).max(c1 * st);
                acc *= d;
            }
            lo = nlo;
            hi = nhi;
        }
        (hi + 1).max(0) as usize
    }

    fn probe_bases(&self, axis: usize) -> Vec<Vec<i64>> {
        let shape = self.shape();
        if self.size() <= EXHAUSTIVE_PROBE_LIMIT {
            let mut out = Vec::new();
            let mut point = vec![0i64; shape.len()];
            loop {
                out.push(point.clone());
                let mut d = shape.len();
                loop {
                    if d == 0 {
                        return out;
                    }
                    d -= 1;
                    if d == axis {
                        continue;
                    }
                    point[d] += 1;
                    if point[d] < shape[d] as i64 {
                        break;
                    }
                    point[d] = 0;
                }
            }
        }
        let pick = |f: fn(usize) -> i64| -> Vec<i64> {
            shape.iter().enumerate().map(|(d, &s)| if d == axis { 0 } else { f(s) }).collect()
        };
        vec![pick(|_| 0), pick(|s| s as i64 / 2), pick(|s| s as i64 - 1)]
    }

    fn axis_profile(&self, axis: usize) -> AxisProfile {
        let size = self.shape()[axis] as i64;
        let steps: Vec<i64> = if self.size() <= EXHAUSTIVE_PROBE_LIMIT {
            (0..size).collect()
        } else {
            let mut s: Vec<i64> = (0..size.min(17)).chain([size / 2, size - 1]).collect();
            s.sort_unstable();
            s.dedup();
            s
        };

        let mut stride: Option<Option<i64>> = None;
        let mut masked = false;
        for mut point in self.probe_bases(axis) {
            point[axis] = 0;
            let (base, base_valid) = self.expr_at(&point);
            let mut step: Option<i64> = None;
            let mut linear = true;
            for &k in &steps {
                point[axis] = k;
                let (idx, valid) = self.expr_at(&point);
                masked |= valid != base_valid;
                if k == 0 {
                    continue;
                }
                let st = *step.get_or_insert((idx - base) / k);
                linear &= idx == base + st * k;
            }
            let this = if linear { Some(step.unwrap_or(0)) } else { None };
            stride = match stride {
                None => Some(this),
                Some(prev) if prev == this => Some(prev),
                Some(_) => Some(None),
            };
        }
        AxisProfile { stride: stride.unwrap_or(Some(0)), masked }
    }

    /// Per-axis stride of the flat index, `None` where it is not a constant
    /// stride or, unless `ignore_valid`, where the axis is masked.
    pub fn real_strides(&self, ignore_valid: bool) -> Vec<Option<i64>> {
        let view = self.view();
        if self.views.len() == 1 {
            return match view.mask.as_ref() {
                None => view.strides.iter().map(|&st| Some(st)).collect(),
                Some(mask) => view
                    .strides
                    .iter()
                    .zip(mask)
                    .zip(&view.shape)
                    .map(|((&st, &(b, e)), &s)| if !ignore_valid && (b != 0 || e != s) { None } else { Some(st) })
                    .collect(),
            };
        }
        (0..self.ndim())
            .map(|axis| {
                let profile = self.axis_profile(axis);
                if profile.masked && !ignore_valid {
                    None
                } else {
                    profile.stride
                }
            })
            .collect()
    }

    pub fn unit_stride_axes(&self, ignore_valid: bool) -> Vec<usize> {
        self.real_strides(ignore_valid).iter().enumerate().filter(|(_, st)| **st == Some(1)).map(|(i, _)| i).collect()
    }

    /// Whether the validity of an access depends on `axis`.
    pub fn axis_is_masked(&self, axis: usize) -> bool {
        if self.views.len() == 1 {
            let view = self.view();
            return view.mask.as_ref().is_some_and(|m| m[axis] != (0, view.shape[axis]));
        }
        self.axis_profile(axis).masked
    }

    // =========================================================================
    // Lowering
    // =========================================================================

    /// Index and validity expressions for kernel coordinates `idxs`.
    ///
    /// Image buffers get a `(x, y, lane)` index vector.
    pub fn to_uops(&self, idxs: &[Arc<UOp>], dtype: &DType) -> (Arc<UOp>, Arc<UOp>) {
        let (mut idx, mut valid) = view_to_uops(self.view(), idxs, UOp::const_(DType::Bool, true));
        for view in self.views[..self.views.len() - 1].iter().rev() {
            let view = view.minify();
            let mut coords = Vec::with_capacity(view.ndim());
            let mut acc = 1i64;
            for &size in view.shape.iter().rev() {
                coords.push(idx.idiv(acc).mod_(size as i64));
                acc *= size as i64;
            }
            coords.reverse();
            (idx, valid) = view_to_uops(&view, &coords, valid);
        }
        if let Some(shape) = dtype.image_shape() {
            let width = shape[1] as i64;
            idx = UOp::vectorize(DType::Int32.vec(3), [idx.idiv(4).mod_(width), idx.idiv(4 * width), idx.mod_(4)]);
        }
        (idx, valid)
    }
}

fn view_to_uops(view: &View, idxs: &[Arc<UOp>], valid: Arc<UOp>) -> (Arc<UOp>, Arc<UOp>) {
    let mut iexpr = UOp::index_const(view.offset);
    let mut valid = valid;
    for (d, (idx, (&size, &st))) in idxs.iter().zip(view.shape.iter().zip(&view.strides)).enumerate() {
        if size != 1 && st != 0 {
            iexpr = iexpr.add(idx.mul(st));
        }
        if let Some(mask) = view.mask.as_ref() {
            let (b, e) = mask[d];
            if b != 0 {
                valid = valid.and(UOp::index_const(b as i64 - 1).cmp_lt(idx));
            }
            if e != size {
                valid = valid.and(idx.cmp_lt(e as i64));
            }
        }
    }
    (iexpr, valid)
}
