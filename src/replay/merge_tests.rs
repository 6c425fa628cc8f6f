//! Unit tests for the k-way ordered merge.

use crate::replay::merge::OrderedMerge;

fn merge_vecs(sources: Vec<Vec<i64>>) -> Vec<i64> {
    let iters: Vec<_> = sources.into_iter().map(|v| v.into_iter()).collect();
    OrderedMerge::new(iters, |x: &i64| *x).collect()
}

#[test]
fn test_merges_in_key_order() {
    let merged = merge_vecs(vec![vec![1, 4, 7], vec![2, 5, 8], vec![3, 6, 9]]);
    assert_eq!(merged, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn test_empty_and_uneven_sources() {
    let merged = merge_vecs(vec![vec![], vec![10], vec![1, 2, 3]]);
    assert_eq!(merged, vec![1, 2, 3, 10]);
    assert!(merge_vecs(vec![]).is_empty());
    assert!(merge_vecs(vec![vec![], vec![]]).is_empty());
}

#[test]
fn test_ties_resolve_by_insertion_order() {
    // Two sources with identical keys; values identify the source.
    let a = vec![(10, "a1"), (20, "a2")];
    let b = vec![(10, "b1"), (20, "b2")];
    let merged: Vec<_> =
        OrderedMerge::new(vec![a.into_iter(), b.into_iter()], |x: &(i64, &str)| x.0)
            .map(|(_, tag)| tag)
            .collect();
    // Source a was primed first, so it wins every tie.
    assert_eq!(merged, vec!["a1", "b1", "a2", "b2"]);
}

#[test]
fn test_merge_is_deterministic() {
    let sources = vec![vec![1, 1, 3, 3], vec![1, 2, 3, 4], vec![0, 1, 3]];
    let first = merge_vecs(sources.clone());
    let second = merge_vecs(sources);
    assert_eq!(first, second);
}

#[test]
fn test_non_decreasing_invariant() {
    let merged = merge_vecs(vec![vec![5, 5, 6], vec![1, 5, 9], vec![5, 7]]);
    for window in merged.windows(2) {
        assert!(window[0] <= window[1]);
    }
    assert_eq!(merged.len(), 8);
}
