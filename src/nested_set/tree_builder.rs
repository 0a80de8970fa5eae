//! Reconstructs a forest from raw `(left, right)` coordinates, or reports
//! that the coordinates are not a valid nested set.

use thiserror::Error;

use super::NodeInterval;

/// A reconstructed node together with its children, in left-coordinate
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub interval: NodeInterval,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    const fn leaf(interval: NodeInterval) -> Self {
        Self {
            interval,
            children: Vec::new(),
        }
    }
}

/// The reconstructed forest. An empty input yields an empty forest, which
/// is vacuously valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest {
    pub roots: Vec<TreeNode>,
}

impl Forest {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TreeBuilderError {
    #[error("intervals {a} and {b} overlap without containment")]
    Overlap { a: NodeInterval, b: NodeInterval },

    #[error("interval {0} appears more than once")]
    Duplicate(NodeInterval),
}

/// Rebuilds the forest encoded by `intervals`.
///
/// Every interval must satisfy `left < right`; any two intervals must be
/// disjoint or strictly nested. Sorting by ascending `left` and descending
/// `right` places each node immediately before all of its descendants, so a
/// single stack of open ancestors suffices: a node that neither fits inside
/// the innermost open ancestor nor starts after it closes is an overlap.
///
/// Equal `left` coordinates are accepted only when one interval strictly
/// contains the other; duplicate intervals are rejected.
pub fn build_forest(intervals: &[NodeInterval]) -> Result<Forest, TreeBuilderError> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by(|a, b| a.left.cmp(&b.left).then(b.right.cmp(&a.right)));

    let mut stack: Vec<TreeNode> = Vec::new();
    let mut roots: Vec<TreeNode> = Vec::new();

    for interval in sorted {
        // Close every ancestor that ends before this node starts.
        while stack
            .last()
            .is_some_and(|top| top.interval.right < interval.left)
        {
            let done = stack.pop().expect("stack top was just observed");
            attach(&mut stack, &mut roots, done);
        }

        match stack.last() {
            None => stack.push(TreeNode::leaf(interval)),
            Some(top) if interval.right < top.interval.right => {
                stack.push(TreeNode::leaf(interval));
            }
            Some(top) if top.interval == interval => {
                return Err(TreeBuilderError::Duplicate(interval));
            }
            Some(top) => {
                return Err(TreeBuilderError::Overlap {
                    a: top.interval,
                    b: interval,
                });
            }
        }
    }

    while let Some(done) = stack.pop() {
        attach(&mut stack, &mut roots, done);
    }

    Ok(Forest { roots })
}

fn attach(stack: &mut Vec<TreeNode>, roots: &mut Vec<TreeNode>, node: TreeNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn intervals(pairs: &[(i32, i32)]) -> Vec<NodeInterval> {
        pairs
            .iter()
            .map(|&(left, right)| NodeInterval::new(left, right))
            .collect()
    }

    #[test]
    fn empty_input_is_a_valid_empty_forest() {
        let forest = build_forest(&[]).unwrap();
        assert!(forest.is_empty());
    }

    #[test]
    fn single_interval_is_a_single_root() {
        let forest = build_forest(&intervals(&[(1, 2)])).unwrap();
        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.roots[0].interval, NodeInterval::new(1, 2));
        assert!(forest.roots[0].children.is_empty());
    }

    #[test]
    fn nested_interval_becomes_a_child() {
        let forest = build_forest(&intervals(&[(1, 4), (2, 3)])).unwrap();
        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.roots[0].children.len(), 1);
        assert_eq!(
            forest.roots[0].children[0].interval,
            NodeInterval::new(2, 3)
        );
    }

    #[test]
    fn disjoint_intervals_become_sibling_roots() {
        let forest = build_forest(&intervals(&[(3, 4), (1, 2)])).unwrap();
        assert_eq!(forest.roots.len(), 2);
        assert_eq!(forest.roots[0].interval, NodeInterval::new(1, 2));
        assert_eq!(forest.roots[1].interval, NodeInterval::new(3, 4));
    }

    #[test]
    fn deep_tree_keeps_children_in_left_order() {
        let forest = build_forest(&intervals(&[(6, 7), (1, 8), (3, 4), (2, 5)])).unwrap();
        assert_eq!(forest.roots.len(), 1);

        let root = &forest.roots[0];
        assert_eq!(root.interval, NodeInterval::new(1, 8));
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].interval, NodeInterval::new(2, 5));
        assert_eq!(root.children[1].interval, NodeInterval::new(6, 7));
        assert_eq!(
            root.children[0].children[0].interval,
            NodeInterval::new(3, 4)
        );
    }

    #[test]
    fn equal_left_requires_strict_containment() {
        let forest = build_forest(&intervals(&[(1, 10), (1, 5)])).unwrap();
        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.roots[0].children.len(), 1);
    }

    #[test_case(&[(1, 3), (2, 4)]; "partial overlap")]
    #[test_case(&[(1, 4), (2, 4)]; "shared right endpoint")]
    #[test_case(&[(1, 2), (2, 3)]; "shared boundary coordinate")]
    fn overlapping_intervals_are_rejected(pairs: &[(i32, i32)]) {
        assert!(matches!(
            build_forest(&intervals(pairs)),
            Err(TreeBuilderError::Overlap { .. })
        ));
    }

    #[test]
    fn duplicate_intervals_are_rejected() {
        assert_eq!(
            build_forest(&intervals(&[(1, 2), (1, 2)])),
            Err(TreeBuilderError::Duplicate(NodeInterval::new(1, 2)))
        );
    }

    /// Pairwise oracle for validity: two intervals may be disjoint or
    /// nested, where nesting may share the left endpoint but never the
    /// right one (the sort order resolves equal lefts widest-first).
    fn pairwise_valid(a: NodeInterval, b: NodeInterval) -> bool {
        let disjoint = a.right < b.left || b.right < a.left;
        let a_contains_b = a.left <= b.left && b.right < a.right;
        let b_contains_a = b.left <= a.left && a.right < b.right;
        disjoint || a_contains_b || b_contains_a
    }

    fn count_nodes(node: &TreeNode) -> usize {
        1 + node.children.iter().map(count_nodes).sum::<usize>()
    }

    proptest! {
        #[test]
        fn builder_accepts_exactly_pairwise_disjoint_or_nested(
            pairs in proptest::collection::vec(
                (0i32..12).prop_flat_map(|left| (Just(left), left + 1..14)),
                0..7,
            )
        ) {
            let input = intervals(&pairs);
            let expected = input.iter().enumerate().all(|(i, a)| {
                input[i + 1..].iter().all(|b| pairwise_valid(*a, *b))
            });

            match build_forest(&input) {
                Ok(forest) => {
                    prop_assert!(expected);
                    let total: usize = forest.roots.iter().map(count_nodes).sum();
                    prop_assert_eq!(total, input.len());
                }
                Err(_) => prop_assert!(!expected),
            }
        }
    }
}
