use proptest::prelude::*;

use super::generators::{shape_and_permutation, shape_and_window, small_shape};
use crate::shape::ShapeTracker;

/// Every coordinate of `shape` in row-major order.
fn coords(shape: &[usize]) -> Vec<Vec<i64>> {
    let mut out = vec![vec![]];
    for &s in shape {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..s as i64).map(move |i| {
                    let mut p = prefix.clone();
                    p.push(i);
                    p
                })
            })
            .collect();
    }
    out
}

proptest! {
    #[test]
    fn contiguous_tracker_enumerates_buffer(shape in small_shape()) {
        let st = ShapeTracker::from_shape(&shape);
        prop_assert_eq!(st.real_size(), st.size());
        for (flat, c) in coords(&shape).iter().enumerate() {
            prop_assert_eq!(st.expr_at(c), (flat as i64, true));
        }
    }

    #[test]
    fn permute_moves_coordinates((shape, perm) in shape_and_permutation()) {
        let st = ShapeTracker::from_shape(&shape);
        let permuted = st.permute(&perm).unwrap();
        let new_shape: Vec<usize> = perm.iter().map(|&p| shape[p]).collect();
        prop_assert_eq!(permuted.shape(), &new_shape[..]);
        for c in coords(&new_shape) {
            let mut orig = vec![0i64; shape.len()];
            for (i, &p) in perm.iter().enumerate() {
                orig[p] = c[i];
            }
            prop_assert_eq!(permuted.expr_at(&c), st.expr_at(&orig));
        }
    }

    #[test]
    fn reshape_after_permute_keeps_addresses((shape, perm) in shape_and_permutation()) {
        let permuted = ShapeTracker::from_shape(&shape).permute(&perm).unwrap();
        let flat = permuted.reshape(&[permuted.size()]).unwrap();
        let new_shape = permuted.shape().to_vec();
        for (i, c) in coords(&new_shape).iter().enumerate() {
            prop_assert_eq!(flat.expr_at(&[i as i64]), permuted.expr_at(c));
        }
        let simplified = flat.simplify();
        prop_assert!(simplified.views().len() <= flat.views().len());
        for i in 0..flat.size() as i64 {
            prop_assert_eq!(simplified.expr_at(&[i]), flat.expr_at(&[i]));
        }
    }

    #[test]
    fn shrink_then_pad_masks_outside((shape, window) in shape_and_window()) {
        let st = ShapeTracker::from_shape(&shape);
        let shrunk = st.shrink(&window).unwrap();
        let pad: Vec<(usize, usize)> = window.iter().zip(&shape).map(|(&(b, e), &s)| (b, s - e)).collect();
        let restored = shrunk.pad(&pad).unwrap();
        prop_assert_eq!(restored.shape(), &shape[..]);
        for c in coords(&shape) {
            let inside = c.iter().zip(&window).all(|(&i, &(b, e))| (b as i64) <= i && i < e as i64);
            let (idx, valid) = restored.expr_at(&c);
            prop_assert_eq!(valid, inside);
            if inside {
                prop_assert_eq!(idx, st.expr_at(&c).0);
            }
        }
    }
}
