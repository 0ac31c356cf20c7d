use crate::helpers::{get_contraction, limit_dims, round_up};

#[test]
fn contraction_groups_adjacent_axes() {
    assert_eq!(get_contraction(&[2, 3, 4], &[6, 4]), Some(vec![vec![0, 1], vec![2]]));
    assert_eq!(get_contraction(&[2, 3, 4], &[2, 12]), Some(vec![vec![0], vec![1, 2]]));
    assert_eq!(get_contraction(&[2, 3, 4], &[4, 6]), None);
}

#[test]
fn contraction_leading_ones() {
    assert_eq!(get_contraction(&[1, 4], &[1, 4]), Some(vec![vec![], vec![0, 1]]));
}

#[test]
fn limit_dims_merges_until_fit() {
    assert_eq!(limit_dims(&[2, 3, 4, 5], &[16, 16, 16]), Some(vec![6, 4, 5]));
    assert_eq!(limit_dims(&[4, 4], &[16, 16, 16]), Some(vec![4, 4]));
    assert_eq!(limit_dims(&[100, 100], &[16, 16]), None);
}

#[test]
fn round_up_to_multiple() {
    assert_eq!(round_up(30, 32), 32);
    assert_eq!(round_up(64, 32), 64);
}
