//! Small shape utilities shared by the optimizer and the lowerer.

/// Product of a dimension list, `1` when empty.
pub fn prod(dims: impl IntoIterator<Item = usize>) -> usize {
    dims.into_iter().product()
}

pub fn round_up(n: usize, amt: usize) -> usize {
    n.div_ceil(amt) * amt
}

/// Which `old_shape` axes fold into each `new_shape` axis.
///
/// Returns `None` when `new_shape` is not a grouping of adjacent `old_shape`
/// axes (every prefix product of `new_shape` must also be one of `old_shape`).
pub fn get_contraction(old_shape: &[usize], new_shape: &[usize]) -> Option<Vec<Vec<usize>>> {
    let acc_old: Vec<usize> = old_shape
        .iter()
        .scan(1usize, |acc, &s| {
            *acc *= s;
            Some(*acc)
        })
        .collect();
    let mut split = Vec::with_capacity(new_shape.len());
    let mut acc = 1usize;
    for &s in new_shape {
        acc *= s;
        split.push(if acc == 1 { 0 } else { acc_old.iter().position(|&a| a == acc)? + 1 });
    }
    let mut groups = Vec::with_capacity(split.len());
    let mut start = 0;
    for (i, &end) in split.iter().enumerate() {
        let end = if i + 1 == split.len() { old_shape.len() } else { end };
        groups.push((start..end).collect());
        start = end;
    }
    Some(groups)
}

/// Merge adjacent dims until `dims` fits in `max_sizes`.
///
/// Returns `None` when no merge can make the dims fit.
pub fn limit_dims(dims: &[usize], max_sizes: &[usize]) -> Option<Vec<usize>> {
    let mut dims = dims.to_vec();
    while dims.len() > max_sizes.len() || dims.iter().zip(max_sizes).any(|(d, m)| d > m) {
        let merge_at = (0..max_sizes.len()).find(|&i| i + 1 < dims.len() && dims[i] * dims[i + 1] <= max_sizes[i])?;
        let merged = dims[merge_at] * dims[merge_at + 1];
        dims.splice(merge_at..merge_at + 2, [merged]);
    }
    Some(dims)
}
