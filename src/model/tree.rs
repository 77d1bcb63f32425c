use super::classifier::ClassifierNode;
use crate::{Error, Index, Result};
use hashbrown::{HashMap, HashSet};
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// ID of the root node in serialized models.
pub const ROOT_ID: Index = 0;

const SETTINGS_FILE_NAME: &str = "settings.json";
const TREE_FILE_NAME: &str = "tree.cbor";

/// Serialized form of a single tree node, addressed by a stable ID.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeRecord {
    Internal {
        id: Index,
        children: Vec<(Index, ClassifierNode)>,
    },
    Leaf {
        id: Index,
        labels: Vec<(Index, ClassifierNode)>,
    },
}

impl NodeRecord {
    pub fn id(&self) -> Index {
        match self {
            NodeRecord::Internal { id, .. } | NodeRecord::Leaf { id, .. } => *id,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Settings {
    n_features: usize,
}

/// Tree node with children addressed by their position in the tree's node list.
#[derive(Clone, Debug)]
pub(crate) enum TreeNode {
    BranchNode {
        child_classifier_pairs: Vec<(usize, ClassifierNode)>,
    },
    LeafNode {
        label_classifier_pairs: Vec<(Index, ClassifierNode)>,
    },
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::LeafNode { .. })
    }

    fn classifiers_mut(&mut self) -> Box<dyn Iterator<Item = &mut ClassifierNode> + '_> {
        match self {
            TreeNode::BranchNode {
                child_classifier_pairs,
            } => Box::new(child_classifier_pairs.iter_mut().map(|(_, c)| c)),
            TreeNode::LeafNode {
                label_classifier_pairs,
            } => Box::new(label_classifier_pairs.iter_mut().map(|(_, c)| c)),
        }
    }
}

/// An immutable label tree.
///
/// Nodes are stored in breadth-first order, so the root is always at position 0 and children
/// always come after their parents.
#[derive(Clone, Debug)]
pub struct LabelTree {
    n_features: usize,
    n_labels: usize,
    depth: usize,
    nodes: Vec<TreeNode>,
    ids: Vec<Index>,
}

impl LabelTree {
    pub(crate) const ROOT: usize = 0;

    /// Build a tree from node records, validating its structure.
    ///
    /// The records must form a tree rooted at [`ROOT_ID`] where every other node has exactly one
    /// parent and every label appears in exactly one leaf.
    pub fn from_records(n_features: usize, records: Vec<NodeRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::model_load("the tree has no nodes"));
        }

        let mut id_to_record = HashMap::<Index, usize>::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if id_to_record.insert(record.id(), i).is_some() {
                return Err(Error::model_load(format!(
                    "node ID {} appears more than once",
                    record.id()
                )));
            }
        }
        if !id_to_record.contains_key(&ROOT_ID) {
            return Err(Error::model_load(format!(
                "root node with ID {} is missing",
                ROOT_ID
            )));
        }

        let mut has_parent = HashSet::<Index>::with_capacity(records.len());
        let mut labels = HashSet::<Index>::new();
        for record in &records {
            match record {
                NodeRecord::Internal { id, children } => {
                    if children.is_empty() {
                        return Err(Error::model_load(format!(
                            "internal node {} has no children",
                            id
                        )));
                    }
                    let mut seen = HashSet::<Index>::with_capacity(children.len());
                    for (child, classifier) in children {
                        if !seen.insert(*child) {
                            return Err(Error::model_load(format!(
                                "node {} lists child {} more than once",
                                id, child
                            )));
                        }
                        if !id_to_record.contains_key(child) {
                            return Err(Error::model_load(format!(
                                "node {} references non-existent child {}",
                                id, child
                            )));
                        }
                        if *child == ROOT_ID {
                            return Err(Error::model_load(format!(
                                "node {} references the root as a child",
                                id
                            )));
                        }
                        if !has_parent.insert(*child) {
                            return Err(Error::model_load(format!(
                                "node {} has more than one parent",
                                child
                            )));
                        }
                        classifier.validate(n_features).map_err(|e| {
                            Error::model_load(format!("classifier for edge {}->{}: {}", id, child, e))
                        })?;
                    }
                }
                NodeRecord::Leaf { id, labels: leaf_labels } => {
                    for (label, classifier) in leaf_labels {
                        if !labels.insert(*label) {
                            return Err(Error::model_load(format!(
                                "label {} appears more than once",
                                label
                            )));
                        }
                        classifier.validate(n_features).map_err(|e| {
                            Error::model_load(format!(
                                "classifier for label {} in leaf {}: {}",
                                label, id, e
                            ))
                        })?;
                    }
                }
            }
        }

        // Assign positions in breadth-first order. Since the root has no parent and every other
        // node has at most one, any node not reached here is disconnected or on a cycle.
        let mut order = Vec::<usize>::with_capacity(records.len());
        let mut depth = 0;
        let mut queue = VecDeque::new();
        queue.push_back((id_to_record[&ROOT_ID], 0));
        while let Some((i, d)) = queue.pop_front() {
            order.push(i);
            depth = depth.max(d);
            if let NodeRecord::Internal { children, .. } = &records[i] {
                for (child, _) in children {
                    queue.push_back((id_to_record[child], d + 1));
                }
            }
        }
        if order.len() != records.len() {
            return Err(Error::model_load(format!(
                "{} of {} nodes are not reachable from the root",
                records.len() - order.len(),
                records.len()
            )));
        }

        let id_to_position: HashMap<Index, usize> = order
            .iter()
            .enumerate()
            .map(|(position, &i)| (records[i].id(), position))
            .collect();

        let mut records: Vec<Option<NodeRecord>> = records.into_iter().map(Some).collect();
        let mut nodes = Vec::with_capacity(order.len());
        let mut ids = Vec::with_capacity(order.len());
        for i in order {
            let record = records[i].take().ok_or_else(|| {
                Error::InternalInvariant(format!("node record {} visited twice", i))
            })?;
            ids.push(record.id());
            nodes.push(match record {
                NodeRecord::Internal { children, .. } => TreeNode::BranchNode {
                    child_classifier_pairs: children
                        .into_iter()
                        .map(|(child, classifier)| (id_to_position[&child], classifier))
                        .collect(),
                },
                NodeRecord::Leaf { labels, .. } => TreeNode::LeafNode {
                    label_classifier_pairs: labels,
                },
            });
        }

        Ok(Self {
            n_features,
            n_labels: labels.len(),
            depth,
            nodes,
            ids,
        })
    }

    /// Convert back to node records, preserving the original node IDs.
    pub fn to_records(&self) -> Vec<NodeRecord> {
        self.nodes
            .iter()
            .zip(&self.ids)
            .map(|(node, &id)| match node {
                TreeNode::BranchNode {
                    child_classifier_pairs,
                } => NodeRecord::Internal {
                    id,
                    children: child_classifier_pairs
                        .iter()
                        .map(|(child, classifier)| (self.ids[*child], classifier.clone()))
                        .collect(),
                },
                TreeNode::LeafNode {
                    label_classifier_pairs,
                } => NodeRecord::Leaf {
                    id,
                    labels: label_classifier_pairs.clone(),
                },
            })
            .collect()
    }

    /// Load a model from the given directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading model from {}", path.display());
        let start_t = time::precise_time_s();

        let settings: Settings = {
            let file = File::open(path.join(SETTINGS_FILE_NAME)).map_err(|e| {
                Error::model_load(format!("failed to open {}: {}", SETTINGS_FILE_NAME, e))
            })?;
            serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                Error::model_load(format!("failed to parse {}: {}", SETTINGS_FILE_NAME, e))
            })?
        };
        let records: Vec<NodeRecord> = {
            let file = File::open(path.join(TREE_FILE_NAME)).map_err(|e| {
                Error::model_load(format!("failed to open {}: {}", TREE_FILE_NAME, e))
            })?;
            serde_cbor::from_reader(BufReader::new(file)).map_err(|e| {
                Error::model_load(format!("failed to parse {}: {}", TREE_FILE_NAME, e))
            })?
        };

        let tree = Self::from_records(settings.n_features, records)?;
        info!(
            "Loaded tree with {} nodes, {} labels and depth {}; it took {:.2}s",
            tree.n_nodes(),
            tree.n_labels(),
            tree.depth(),
            time::precise_time_s() - start_t
        );
        Ok(tree)
    }

    /// Save the model to the given directory, creating it if necessary.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Saving model to {}", path.display());
        let start_t = time::precise_time_s();

        fs::create_dir_all(path)?;
        {
            let writer = BufWriter::new(File::create(path.join(SETTINGS_FILE_NAME))?);
            serde_json::to_writer_pretty(
                writer,
                &Settings {
                    n_features: self.n_features,
                },
            )
            .map_err(|e| Error::ModelSave(e.to_string()))?;
        }
        {
            let writer = BufWriter::new(File::create(path.join(TREE_FILE_NAME))?);
            serde_cbor::to_writer(writer, &self.to_records())
                .map_err(|e| Error::ModelSave(e.to_string()))?;
        }

        info!(
            "Model saved; it took {:.2}s",
            time::precise_time_s() - start_t
        );
        Ok(())
    }

    /// Densify classifier weights to speed up prediction at the cost of more memory usage.
    pub fn densify_weights(&mut self, max_sparse_density: f32) {
        info!("Densifying model weights...");
        let start_t = time::precise_time_s();

        let n_features = self.n_features;
        self.nodes.par_iter_mut().for_each(|node| {
            for classifier in node.classifiers_mut() {
                classifier.densify(n_features, max_sparse_density);
            }
        });

        info!(
            "Model weights densified; it took {:.2}s",
            time::precise_time_s() - start_t
        );
    }

    /// The expected dimension of feature vectors.
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_labels(&self) -> usize {
        self.n_labels
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn node(&self, position: usize) -> &TreeNode {
        &self.nodes[position]
    }

    #[cfg(test)]
    pub(crate) fn node_id(&self, position: usize) -> Index {
        self.ids[position]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{classifier, scenario_records, scenario_tree};

    fn leaf(id: Index, labels: &[Index]) -> NodeRecord {
        NodeRecord::Leaf {
            id,
            labels: labels.iter().map(|&l| (l, classifier(&[], 0.))).collect(),
        }
    }

    fn internal(id: Index, children: &[Index]) -> NodeRecord {
        NodeRecord::Internal {
            id,
            children: children.iter().map(|&c| (c, classifier(&[], 0.))).collect(),
        }
    }

    fn load_error(records: Vec<NodeRecord>) -> String {
        match LabelTree::from_records(4, records) {
            Err(Error::ModelLoad { reason }) => reason,
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("tree should have been rejected"),
        }
    }

    #[test]
    fn test_from_records() {
        let tree = scenario_tree();
        assert_eq!(4, tree.n_features());
        assert_eq!(8, tree.n_labels());
        assert_eq!(7, tree.n_nodes());
        assert_eq!(2, tree.depth());
        assert_eq!(ROOT_ID, tree.node_id(LabelTree::ROOT));
        assert!(!tree.node(LabelTree::ROOT).is_leaf());
    }

    #[test]
    fn test_from_records_reorders_breadth_first() {
        let tree = LabelTree::from_records(
            4,
            vec![leaf(5, &[1]), internal(3, &[5]), internal(0, &[3, 7]), leaf(7, &[2])],
        )
        .unwrap();
        assert_eq!(
            vec![0, 3, 7, 5],
            (0..tree.n_nodes()).map(|i| tree.node_id(i)).collect::<Vec<_>>()
        );
        assert_eq!(2, tree.depth());
    }

    #[test]
    fn test_single_leaf_tree() {
        let tree = LabelTree::from_records(4, vec![leaf(0, &[3, 1])]).unwrap();
        assert_eq!(0, tree.depth());
        assert_eq!(2, tree.n_labels());
        assert!(tree.node(LabelTree::ROOT).is_leaf());
    }

    #[test]
    fn test_rejects_empty_tree() {
        assert!(load_error(vec![]).contains("no nodes"));
    }

    #[test]
    fn test_rejects_missing_root() {
        assert!(load_error(vec![leaf(1, &[0])]).contains("root"));
    }

    #[test]
    fn test_rejects_duplicate_node_id() {
        assert!(load_error(vec![internal(0, &[1]), leaf(1, &[0]), leaf(1, &[2])])
            .contains("node ID 1"));
    }

    #[test]
    fn test_rejects_duplicate_label() {
        assert!(
            load_error(vec![internal(0, &[1, 2]), leaf(1, &[0, 1]), leaf(2, &[1])])
                .contains("label 1")
        );
    }

    #[test]
    fn test_rejects_missing_child() {
        assert!(load_error(vec![internal(0, &[1, 2]), leaf(1, &[0])]).contains("non-existent"));
    }

    #[test]
    fn test_rejects_childless_internal_node() {
        assert!(load_error(vec![internal(0, &[1]), internal(1, &[])]).contains("no children"));
    }

    #[test]
    fn test_rejects_repeated_child() {
        assert!(load_error(vec![internal(0, &[1, 1]), leaf(1, &[0])]).contains("more than once"));
    }

    #[test]
    fn test_rejects_multiple_parents() {
        assert!(load_error(vec![
            internal(0, &[1, 2]),
            internal(1, &[3]),
            internal(2, &[3]),
            leaf(3, &[0]),
        ])
        .contains("more than one parent"));
    }

    #[test]
    fn test_rejects_edge_into_root() {
        assert!(load_error(vec![internal(0, &[1]), internal(1, &[0])]).contains("root"));
    }

    #[test]
    fn test_rejects_detached_cycle() {
        assert!(load_error(vec![
            internal(0, &[1]),
            leaf(1, &[0]),
            internal(2, &[3]),
            internal(3, &[2]),
        ])
        .contains("not reachable"));
    }

    #[test]
    fn test_rejects_out_of_range_weights() {
        let records = vec![NodeRecord::Leaf {
            id: 0,
            labels: vec![(0, classifier(&[(4, 1.)], 0.))],
        }];
        assert!(load_error(records).contains("label 0"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let tree = scenario_tree();
        tree.save(dir.path()).unwrap();

        let loaded = LabelTree::load(dir.path()).unwrap();
        assert_eq!(tree.n_features(), loaded.n_features());
        assert_eq!(tree.to_records(), loaded.to_records());
        assert_eq!(
            scenario_records().len(),
            loaded.to_records().len()
        );
    }

    #[test]
    fn test_load_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            LabelTree::load(dir.path().join("nope")),
            Err(Error::ModelLoad { .. })
        ));
    }

    #[test]
    fn test_load_corrupted_tree_file() {
        let dir = tempfile::tempdir().unwrap();
        scenario_tree().save(dir.path()).unwrap();
        fs::write(dir.path().join(TREE_FILE_NAME), b"not cbor at all").unwrap();
        assert!(matches!(
            LabelTree::load(dir.path()),
            Err(Error::ModelLoad { .. })
        ));
    }

    #[test]
    fn test_densify_weights() {
        let mut tree = scenario_tree();
        tree.densify_weights(0.3);
        let dense_count = tree
            .nodes
            .iter_mut()
            .flat_map(|node| node.classifiers_mut().map(|c| c.is_dense()).collect::<Vec<_>>())
            .filter(|&dense| dense)
            .count();
        // Only the classifier with 2 of 4 features exceeds the density threshold
        assert_eq!(1, dense_count);
    }
}
