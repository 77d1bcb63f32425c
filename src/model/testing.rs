//! Fixtures shared by the model and handle tests.

use super::{ClassifierNode, LabelTree, LossType, NodeRecord};
use crate::{FeatureVector, Index, IndexValueVec};
use rand::prelude::*;
use rand::seq::index::sample;

pub fn classifier(weights: &[(Index, f32)], bias: f32) -> ClassifierNode {
    ClassifierNode::new(weights.to_vec(), bias, LossType::Log)
}

pub fn sigmoid(x: f64) -> f64 {
    1. / (1. + (-x).exp())
}

/// Root with two internal children, each with two leaves of two labels, over 4 features.
///
/// With `scenario_features()` the edge margins are:
/// - 0->1: 1, 0->2: -0.5
/// - 1->3: 1, 1->4: -1, 2->5: 2, 2->6: -1
/// - labels 0..8: 2, -2, 10, 0.5, 2.5, 0, 3, -1
pub fn scenario_records() -> Vec<NodeRecord> {
    vec![
        NodeRecord::Internal {
            id: 0,
            children: vec![
                (1, classifier(&[(0, 1.)], 0.)),
                (2, classifier(&[(1, -1.)], 0.)),
            ],
        },
        NodeRecord::Internal {
            id: 1,
            children: vec![
                (3, classifier(&[(3, 0.5)], 0.)),
                (4, classifier(&[(0, -1.)], 0.)),
            ],
        },
        NodeRecord::Internal {
            id: 2,
            children: vec![
                (5, classifier(&[(3, 1.)], 0.)),
                (6, classifier(&[(1, 2.)], -2.)),
            ],
        },
        NodeRecord::Leaf {
            id: 3,
            labels: vec![(0, classifier(&[(0, 2.)], 0.)), (1, classifier(&[(3, -1.)], 0.))],
        },
        NodeRecord::Leaf {
            id: 4,
            labels: vec![(2, classifier(&[], 10.)), (3, classifier(&[(1, 1.)], 0.))],
        },
        NodeRecord::Leaf {
            id: 5,
            labels: vec![
                (4, classifier(&[(1, 1.), (3, 1.)], 0.)),
                (5, classifier(&[], 0.)),
            ],
        },
        NodeRecord::Leaf {
            id: 6,
            labels: vec![(6, classifier(&[(0, 3.)], 0.)), (7, classifier(&[], -1.))],
        },
    ]
}

pub fn scenario_tree() -> LabelTree {
    LabelTree::from_records(4, scenario_records()).unwrap()
}

pub fn scenario_features() -> FeatureVector {
    FeatureVector::new(vec![3, 0, 1], vec![2., 1., 0.5]).unwrap()
}

fn random_classifier(rng: &mut StdRng, n_features: usize, nnz: usize) -> ClassifierNode {
    let weights = sample(rng, n_features, nnz.min(n_features))
        .into_iter()
        .map(|i| (i as Index, rng.gen_range(-2.0..2.0)))
        .collect::<Vec<_>>();
    ClassifierNode::new(weights, rng.gen_range(-1.0..1.0), LossType::Log)
}

/// A random tree whose leaves may sit at different depths.
pub fn random_tree(rng: &mut StdRng, n_features: usize, max_depth: usize) -> LabelTree {
    let mut records = Vec::new();
    let mut next_id: Index = 1;
    let mut next_label: Index = 0;
    let mut pending = vec![(0 as Index, 0)];
    while let Some((id, depth)) = pending.pop() {
        if depth == max_depth || (depth > 0 && rng.gen_bool(0.2)) {
            let n_labels = rng.gen_range(1..5);
            let labels = (0..n_labels)
                .map(|_| {
                    next_label += 1;
                    (next_label - 1, random_classifier(rng, n_features, 3))
                })
                .collect();
            records.push(NodeRecord::Leaf { id, labels });
        } else {
            let n_children = rng.gen_range(2..5);
            let children = (0..n_children)
                .map(|_| {
                    next_id += 1;
                    pending.push((next_id - 1, depth + 1));
                    (next_id - 1, random_classifier(rng, n_features, 3))
                })
                .collect();
            records.push(NodeRecord::Internal { id, children });
        }
    }
    records.shuffle(rng);
    LabelTree::from_records(n_features, records).unwrap()
}

pub fn random_features(rng: &mut StdRng, n_features: usize, nnz: usize) -> FeatureVector {
    let pairs = sample(rng, n_features, nnz.min(n_features))
        .into_iter()
        .map(|i| (i as Index, rng.gen_range(0.0..1.0)))
        .collect::<Vec<_>>();
    FeatureVector::from_pairs(&pairs).unwrap()
}

/// Score every label by walking the whole tree, then keep the best `k`.
pub fn exhaustive_top_k(tree: &LabelTree, features: &FeatureVector, k: usize) -> IndexValueVec {
    use super::tree::TreeNode;

    let feature_vec = features.to_sparse_vec(tree.n_features());
    let mut label_scores = Vec::new();
    let mut stack = vec![(LabelTree::ROOT, 0f32)];
    while let Some((node, score)) = stack.pop() {
        match tree.node(node) {
            TreeNode::BranchNode {
                child_classifier_pairs,
            } => {
                for (child, classifier) in child_classifier_pairs {
                    stack.push((*child, score + classifier.score(&feature_vec)));
                }
            }
            TreeNode::LeafNode {
                label_classifier_pairs,
            } => {
                for (label, classifier) in label_classifier_pairs {
                    label_scores.push((*label, score + classifier.score(&feature_vec)));
                }
            }
        }
    }
    label_scores.sort_by(|(l1, s1), (l2, s2)| s2.total_cmp(s1).then(l1.cmp(l2)));
    label_scores.truncate(k);
    label_scores
        .into_iter()
        .map(|(label, score)| (label, score.exp()))
        .collect()
}
