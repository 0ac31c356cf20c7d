//! A single strided, offset, optionally masked view over a flat buffer.
//!
//! Views are always kept canonical: dimensions of size one carry stride
//! zero, a mask covering the whole shape is dropped, and masked dimensions
//! with at most one valid element are folded into the offset.

/// Valid half-open range `[begin, end)` per dimension.
pub type Mask = Vec<(usize, usize)>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct View {
    pub shape: Vec<usize>,
    pub strides: Vec<i64>,
    pub offset: i64,
    pub mask: Option<Mask>,
    pub contiguous: bool,
}

/// Zero the stride of every size-1 dimension.
pub fn canonicalize_strides(shape: &[usize], strides: &[i64]) -> Vec<i64> {
    shape.iter().zip(strides).map(|(&s, &st)| if s == 1 { 0 } else { st }).collect()
}

/// Row-major strides for `shape`.
pub fn strides_for_shape(shape: &[usize]) -> Vec<i64> {
    if shape.is_empty() {
        return Vec::new();
    }
    let mut strides = vec![1i64; shape.len()];
    for i in (0..shape.len() - 1).rev() {
        strides[i] = strides[i + 1] * shape[i + 1] as i64;
    }
    canonicalize_strides(shape, &strides)
}

/// Collapse adjacent dimensions that address memory as one.
///
/// Returns `(merged size, stride, real size)` triples, where the real size
/// is the extent of the merged dimension that is not broadcast.
pub fn merge_dims(shape: &[usize], strides: &[i64], mask: Option<&[(usize, usize)]>) -> Vec<(usize, i64, usize)> {
    if shape.is_empty() {
        return Vec::new();
    }
    let mut ret = vec![(shape[0], strides[0], if strides[0] != 0 { shape[0] } else { 0 })];
    // Whether the last merged dimension could be merged again with the next.
    let mut merging = match mask {
        Some(m) => m[0].1 - m[0].0 == 1,
        None => shape[0] == 1,
    };
    for i in 1..shape.len() {
        let (s, st) = (shape[i], strides[i]);
        if s == 1 {
            continue;
        }
        let last = ret.len() - 1;
        let (merged, last_st, real) = ret[last];
        if merging || last_st == s as i64 * st {
            ret[last] = (merged * s, st, if merging { s } else { real * s });
        } else {
            ret.push((s, st, if st != 0 { s } else { 0 }));
        }
        merging = match mask {
            Some(m) => m[i].1 - m[i].0 == 1,
            None => false,
        };
    }
    ret
}

/// Project `mask` over `old_shape` onto `new_shape`.
///
/// `None` means the mask cannot be expressed on the new shape.
pub fn reshape_mask(mask: Option<&[(usize, usize)]>, old_shape: &[usize], new_shape: &[usize]) -> Option<Mask> {
    let Some(mask) = mask else {
        return Some(new_shape.iter().map(|&s| (0, s)).collect());
    };
    if mask.iter().any(|&(b, e)| e <= b) {
        return Some(vec![(0, 0); new_shape.len()]);
    }

    let mut new_mask: Mask = Vec::with_capacity(new_shape.len());
    let mut r_masks = mask.iter().rev().copied();
    let mut r_shape = old_shape.iter().rev().copied();
    let mut r_new_shape = new_shape.iter().rev().copied();

    let mut curr_stride = 1usize;
    let mut old_dim = r_shape.next().unwrap_or(1);
    let mut new_dim = r_new_shape.next().unwrap_or(1);
    let mut m = r_masks.next().unwrap_or((0, 1));

    while new_mask.len() < new_shape.len() {
        let (l, r) = m;
        let next_stride = new_dim * curr_stride;

        if old_dim >= next_stride {
            if old_dim == next_stride {
                new_mask.push((l / curr_stride, (r - 1) / curr_stride + 1));
                curr_stride = 1;
                old_dim = r_shape.next().unwrap_or(1);
                new_dim = r_new_shape.next().unwrap_or(1);
                m = r_masks.next().unwrap_or((0, 1));
            } else {
                // The mask must be splittable across the new dimensions.
                let unaligned = (l % next_stride != 0 || r % next_stride != 0) && l / next_stride != (r - 1) / next_stride;
                if unaligned || old_dim % next_stride != 0 {
                    return None;
                }
                new_mask.push(((l % next_stride) / curr_stride, ((r - 1) % next_stride) / curr_stride + 1));
                curr_stride = next_stride;
                new_dim = r_new_shape.next().unwrap_or(1);
            }
        } else {
            let next_mask = r_masks.next().unwrap_or((0, 1));
            // Merging a partially masked dimension is only sound when the outer one is a single element.
            if m != (0, old_dim) && next_mask.1 - next_mask.0 != 1 {
                return None;
            }
            m = (next_mask.0 * old_dim + l, (next_mask.1 - 1) * old_dim + r);
            old_dim *= r_shape.next().unwrap_or(1);
        }
    }

    for rest in r_masks {
        if rest != (0, 1) {
            return Some(vec![(0, 0); new_shape.len()]);
        }
    }
    new_mask.reverse();
    Some(new_mask)
}

/// Unravel a flat offset into per-dimension coordinates of a contiguous `shape`.
pub fn un1d(shape: &[usize], offset: i64) -> Vec<i64> {
    let mut offs = offset;
    strides_for_shape(shape)
        .into_iter()
        .map(|stride| {
            let here = if stride > 0 { offs.div_euclid(stride) } else { 0 };
            offs -= here * stride;
            here
        })
        .collect()
}

impl View {
    /// Build a canonical view. `strides: None` means row-major.
    pub fn create(shape: Vec<usize>, strides: Option<Vec<i64>>, offset: i64, mask: Option<Mask>) -> Self {
        let mut strides = match strides {
            Some(st) if !st.is_empty() => canonicalize_strides(&shape, &st),
            _ => strides_for_shape(&shape),
        };
        let mut offset = offset;
        let mut mask = mask;

        // A zero-size dimension makes the whole view empty.
        if shape.contains(&0) {
            return Self { strides: vec![0; shape.len()], shape, offset: 0, mask: None, contiguous: true };
        }

        if let Some(m) = mask.as_ref() {
            if m.iter().zip(&shape).all(|(&(b, e), &s)| b == 0 && e == s) {
                mask = None;
            }
        }

        if let Some(m) = mask.clone() {
            let elim: Vec<bool> = m.iter().map(|&(b, e)| b + 1 >= e).collect();
            if elim.iter().any(|&x| x) {
                if m.iter().any(|&(b, e)| b >= e) {
                    strides = vec![0; shape.len()];
                    offset = 0;
                    mask = Some(vec![(0, 0); shape.len()]);
                }
                offset += m.iter().zip(&strides).zip(&elim).map(|((&(b, _), &st), &e)| if e { st * b as i64 } else { 0 }).sum::<i64>();
                for (st, &e) in strides.iter_mut().zip(&elim) {
                    if e {
                        *st = 0;
                    }
                }
            }
        }

        let contiguous = offset == 0 && mask.is_none() && strides == strides_for_shape(&shape);
        Self { shape, strides, offset, mask, contiguous }
    }

    /// Row-major, unmasked view of `shape`.
    pub fn contiguous_of(shape: &[usize]) -> Self {
        Self::create(shape.to_vec(), None, 0, None)
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Reshape to the smallest equivalent rank.
    pub fn minify(&self) -> Self {
        let min_shape: Vec<usize> = merge_dims(&self.shape, &self.strides, self.mask.as_deref()).into_iter().map(|(s, _, _)| s).collect();
        self.reshape(&min_shape).unwrap_or_else(|| self.clone())
    }

    /// Resize every dimension to `[begin, end)`; negative begins pad.
    fn unsafe_resize(&self, arg: &[(i64, i64)], mask: Option<Vec<(i64, i64)>>) -> Self {
        let offset: i64 = self.strides.iter().zip(arg).map(|(&st, &(b, _))| st * b).sum();
        let mut mask = mask;
        if let Some(m) = self.mask.as_ref() {
            // Move the old mask into the new coordinates and intersect.
            let nmask: Vec<(i64, i64)> = m
                .iter()
                .zip(arg)
                .map(|(&(mx, my), &(ax, ay))| {
                    let (mx, my) = (mx as i64, my as i64);
                    ((mx - ax).min(ay - ax).max(0), (my - ax).min(ay - ax).max(0))
                })
                .collect();
            mask = Some(match mask {
                Some(given) => given.iter().zip(&nmask).map(|(&(mx1, my1), &(mx2, my2))| (mx1.max(mx2), my1.min(my2))).collect(),
                None => nmask,
            });
        }
        let shape: Vec<usize> = arg.iter().map(|&(b, e)| (e - b) as usize).collect();
        let mask = mask.map(|m| m.into_iter().map(|(b, e)| (b.max(0) as usize, e.max(b).max(0) as usize)).collect::<Mask>());
        let mask = match mask {
            Some(m) if m.iter().zip(&shape).all(|(&(b, e), &s)| b == 0 && e == s) => None,
            other => other,
        };
        Self::create(shape, Some(self.strides.clone()), self.offset + offset, mask)
    }

    /// Pad each dimension by `(before, after)`.
    pub fn pad(&self, arg: &[(usize, usize)]) -> Self {
        if arg.iter().all(|&(b, e)| b == 0 && e == 0) {
            return self.clone();
        }
        let zvarg: Vec<(i64, i64)> =
            self.shape.iter().zip(arg).map(|(&s, &(b, e))| (-(b as i64), s as i64 + e as i64)).collect();
        let mask: Vec<(i64, i64)> = self.shape.iter().zip(arg).map(|(&s, &(b, _))| (b as i64, (s + b) as i64)).collect();
        self.unsafe_resize(&zvarg, Some(mask))
    }

    /// Keep `[begin, end)` of each dimension.
    pub fn shrink(&self, arg: &[(usize, usize)]) -> Self {
        let arg: Vec<(i64, i64)> = arg.iter().map(|&(b, e)| (b as i64, e as i64)).collect();
        self.unsafe_resize(&arg, None)
    }

    /// Broadcast size-1 dimensions to `new_shape`.
    pub fn expand(&self, new_shape: &[usize]) -> Self {
        if self.size() == 0 {
            return Self::contiguous_of(new_shape);
        }
        let mask = self.mask.as_ref().map(|m| {
            m.iter()
                .zip(&self.shape)
                .zip(new_shape)
                .map(|((&m, &s), &ns)| match (s != ns, m == (0, 1)) {
                    (true, true) => (0, ns),
                    (true, false) => (0, 0),
                    (false, _) => m,
                })
                .collect()
        });
        Self::create(new_shape.to_vec(), Some(self.strides.clone()), self.offset, mask)
    }

    pub fn permute(&self, axis: &[usize]) -> Self {
        let shape = axis.iter().map(|&a| self.shape[a]).collect();
        let strides = axis.iter().map(|&a| self.strides[a]).collect();
        let mask = self.mask.as_ref().map(|m| axis.iter().map(|&a| m[a]).collect());
        Self::create(shape, Some(strides), self.offset, mask)
    }

    /// Reshape without materializing. `None` when the new shape cannot be
    /// expressed as a single view over the same memory.
    pub fn reshape(&self, new_shape: &[usize]) -> Option<Self> {
        if self.shape == new_shape {
            return Some(self.clone());
        }
        if self.shape.contains(&0) {
            return Some(Self::create(new_shape.to_vec(), None, 0, None));
        }
        if new_shape.is_empty() {
            if let Some(m) = self.mask.as_ref() {
                if m.iter().any(|&(b, e)| b == e) {
                    return None;
                }
            }
        }

        // After the asserts, it's okay to check contiguous.
        if self.contiguous {
            return Some(Self::create(new_shape.to_vec(), None, 0, None));
        }

        let mut strides: Vec<i64> = Vec::with_capacity(new_shape.len());
        let mut r_new_shape = new_shape.iter().rev().copied();
        let mut complete = true;
        for (merged_dim, new_stride, real_dim) in merge_dims(&self.shape, &self.strides, self.mask.as_deref()).into_iter().rev() {
            let mut acc = 1usize;
            let mut new_stride = new_stride;
            while acc < merged_dim {
                let Some(new_dim) = r_new_shape.next() else { break };
                strides.push(new_stride);
                if new_dim != 1 {
                    acc *= new_dim;
                    new_stride *= if acc < real_dim { new_dim as i64 } else { 0 };
                }
            }
            if acc != merged_dim {
                complete = false;
                break;
            }
        }
        if !complete {
            return None;
        }
        strides.resize(new_shape.len(), 0);
        strides.reverse();

        let new_mask = reshape_mask(self.mask.as_deref(), &self.shape, new_shape)?;
        let sizes: Vec<usize> = new_mask.iter().map(|&(b, e)| e - b).collect();
        let new_strides = canonicalize_strides(&sizes, &strides);
        let old_base: i64 = match self.mask.as_ref() {
            Some(m) => m.iter().zip(&self.strides).map(|(&(b, _), &st)| b as i64 * st).sum(),
            None => 0,
        };
        let new_base: i64 = new_mask.iter().zip(&new_strides).map(|(&(b, _), &st)| b as i64 * st).sum();
        Some(Self::create(new_shape.to_vec(), Some(new_strides), self.offset + old_base - new_base, Some(new_mask)))
    }

    /// Memory index and validity of one coordinate.
    pub fn expr_at(&self, idxs: &[i64]) -> (i64, bool) {
        let idx = self.offset + idxs.iter().zip(&self.strides).map(|(&i, &st)| i * st).sum::<i64>();
        let valid = match self.mask.as_ref() {
            Some(m) => idxs.iter().zip(m).all(|(&i, &(b, e))| i >= b as i64 && i < e as i64),
            None => true,
        };
        (idx, valid)
    }

    /// Bounds of the memory index over every coordinate, ignoring the mask.
    pub fn index_bounds(&self) -> (i64, i64) {
        let mut lo = self.offset;
        let mut hi = self.offset;
        for (&s, &st) in self.shape.iter().zip(&self.strides) {
            let span = st * (s as i64 - 1);
            lo += span.min(0);
            hi += span.max(0);
        }
        (lo, hi)
    }

    /// Compose `self` (applied second) over `inner` (applied first).
    ///
    /// Returns `None` when the pair cannot be expressed as one view.
    pub fn merge(&self, inner: &View) -> Option<View> {
        let vm2 = self;
        let vm1 = inner;
        if vm2.contiguous {
            return Some(vm1.clone());
        }
        if vm1.contiguous && vm1.shape == vm2.shape {
            return Some(vm2.clone());
        }
        if vm1.contiguous && vm1.size() == vm2.size() {
            if let Some(ret) = vm2.reshape(&vm1.shape) {
                return Some(ret);
            }
        }
        if let Some(m) = vm1.mask.as_ref() {
            if m.iter().any(|&(b, e)| b >= e) {
                return Some(View::create(vm1.shape.clone(), Some(vec![0; vm1.ndim()]), 0, Some(vec![(0, 0); vm1.ndim()])));
            }
            let unmasked = vm1.shrink(m);
            let merged = vm2.merge(&unmasked)?;
            let padding: Vec<(usize, usize)> = m.iter().zip(&vm1.shape).map(|(&(b, e), &s)| (b, s - e)).collect();
            return Some(merged.pad(&padding));
        }
        if vm1.offset < 0 {
            return None;
        }

        // Project vm1's offset and strides onto vm2's coordinates.
        let origin = un1d(&vm2.shape, vm1.offset);
        let mut terms: Vec<Vec<(usize, i64)>> = vec![Vec::new(); origin.len()];
        let mut strides = vec![0i64; vm1.ndim()];
        for (d1, &st) in vm1.strides.iter().enumerate() {
            if st == 0 {
                continue;
            }
            for (d2, (o, s1)) in origin.iter().zip(un1d(&vm2.shape, vm1.offset + st)).enumerate() {
                let s1 = s1 - o;
                if s1 == 0 {
                    continue;
                }
                terms[d2].push((d1, s1));
                strides[d1] += s1 * vm2.strides[d2];
            }
        }

        // Merge vm2 dimensions only where a projected term overflows one.
        let mut merged_size = 1i64;
        let (mut lo, mut hi) = (0i64, 0i64);
        let mut extents: Vec<usize> = Vec::new();
        for ((term, &s), &o) in terms.iter().rev().zip(vm2.shape.iter().rev()).zip(origin.iter().rev()) {
            for &(d1, s1) in term {
                let span = s1 * merged_size * (vm1.shape[d1] as i64 - 1);
                lo += span.min(0);
                hi += span.max(0);
            }
            lo += o * merged_size;
            hi += o * merged_size;
            merged_size *= s as i64;
            if lo >= 0 && hi < merged_size {
                extents.push(merged_size as usize);
                merged_size = 1;
                lo = 0;
                hi = 0;
            }
        }
        if lo != 0 || hi != 0 {
            return None;
        }
        extents.reverse();
        if extents != vm2.shape {
            let reshaped = vm2.reshape(&extents)?;
            return reshaped.merge(vm1);
        }

        // Projecting a masked outer view is not attempted.
        if vm2.mask.is_some() {
            return None;
        }
        let offset = origin.iter().zip(&vm2.strides).map(|(&o, &st)| o * st).sum::<i64>() + vm2.offset;
        Some(View::create(vm1.shape.clone(), Some(strides), offset, None))
    }
}
