//! Strategies shared by the property tests.

use proptest::prelude::*;

/// Shapes of rank 1..=4 with small dimensions.
pub fn small_shape() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..=5, 1..=4)
}

/// A shape together with a permutation of its axes.
pub fn shape_and_permutation() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    small_shape().prop_flat_map(|shape| {
        let axes: Vec<usize> = (0..shape.len()).collect();
        (Just(shape), Just(axes).prop_shuffle())
    })
}

/// A shape with one `(begin, end)` window per axis.
pub fn shape_and_window() -> impl Strategy<Value = (Vec<usize>, Vec<(usize, usize)>)> {
    small_shape().prop_flat_map(|shape| {
        let windows: Vec<_> = shape
            .iter()
            .map(|&s| (0..=s).prop_flat_map(move |b| (Just(b), b..=s)))
            .collect();
        (Just(shape), windows)
    })
}

pub fn int32_operand() -> impl Strategy<Value = i64> {
    (i32::MIN..=i32::MAX).prop_map(i64::from)
}
