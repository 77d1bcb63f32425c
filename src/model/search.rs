use super::topk::TopKAggregator;
use super::tree::{LabelTree, TreeNode};
use crate::{Error, FeatureVector, Index, PredictionResult, Result, SparseVec, WorkerPool};
use const_default::ConstDefault;
use hashbrown::HashMap;
use itertools::Itertools;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-call search settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SearchParams {
    /// Maximum number of nodes kept at each tree level, across the whole frontier.
    pub beam_size: usize,
    /// Maximum number of labels returned.
    pub top_k: usize,
}

impl ConstDefault for SearchParams {
    const DEFAULT: Self = Self {
        beam_size: 10,
        top_k: 10,
    };
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl SearchParams {
    pub fn new(beam_size: usize, top_k: usize) -> Self {
        Self { beam_size, top_k }
    }

    pub fn validate(&self) -> Result<()> {
        if self.beam_size < 1 {
            return Err(Error::InvalidArgument(format!(
                "beam_size must be at least 1, got {}",
                self.beam_size
            )));
        }
        if self.top_k < 1 {
            return Err(Error::InvalidArgument(format!(
                "top_k must be at least 1, got {}",
                self.top_k
            )));
        }
        Ok(())
    }
}

/// Cancels the searches it is attached to. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress of a single search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchEvent {
    /// Candidates of one level were scored and cut down to the beam.
    LevelPruned {
        depth: usize,
        n_candidates: usize,
        n_kept: usize,
    },
    /// Labels of the final frontier were scored.
    LeavesScored { n_leaves: usize, n_labels: usize },
}

/// Receives search events.
///
/// Events are delivered on whichever thread runs the search. Under batch prediction that is a
/// pool worker, so events from different searches may arrive concurrently.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &SearchEvent);
}

impl<F> Observer for F
where
    F: Fn(&SearchEvent) + Send + Sync,
{
    fn on_event(&self, event: &SearchEvent) {
        self(event)
    }
}

/// Level-synchronous beam search over a label tree.
///
/// Node scores are log-domain and add up along a path. Each level's candidates from the whole
/// frontier are pruned together to the `beam_size` best before any deeper node is scored; only
/// the scoring within a level is spread across the worker pool. Reported label scores are the
/// exponentiated path sums.
pub struct BeamSearch<'a> {
    tree: &'a LabelTree,
    pool: &'a WorkerPool,
    observer: Option<&'a dyn Observer>,
    cancel_token: Option<&'a CancelToken>,
}

impl<'a> BeamSearch<'a> {
    pub fn new(tree: &'a LabelTree, pool: &'a WorkerPool) -> Self {
        Self {
            tree,
            pool,
            observer: None,
            cancel_token: None,
        }
    }

    pub fn with_observer(mut self, observer: Option<&'a dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancel_token(mut self, cancel_token: Option<&'a CancelToken>) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        match self.cancel_token {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    fn notify(&self, event: SearchEvent) {
        if let Some(observer) = self.observer {
            observer.on_event(&event);
        }
    }

    pub fn search(
        &self,
        features: &FeatureVector,
        params: &SearchParams,
    ) -> Result<PredictionResult> {
        params.validate()?;
        let feature_vec = features.to_sparse_vec(self.tree.n_features());

        let mut frontier = vec![(LabelTree::ROOT, 0f32)];
        let mut depth = 0;
        while frontier
            .iter()
            .any(|&(node, _)| !self.tree.node(node).is_leaf())
        {
            self.check_cancelled()?;
            depth += 1;

            let mut candidates = self
                .pool
                .submit(&frontier, |&(node, score)| {
                    self.expand(node, score, &feature_vec)
                })?
                .into_iter()
                .flatten_ok()
                .collect::<Result<Vec<_>>>()?;

            if candidates.is_empty() {
                return Err(Error::InternalInvariant(format!(
                    "frontier became empty at depth {}",
                    depth
                )));
            }
            if let Some(&(node, _)) = candidates.iter().find(|(_, score)| score.is_nan()) {
                return Err(Error::InternalInvariant(format!(
                    "score of node at position {} is NaN",
                    node
                )));
            }

            let n_candidates = candidates.len();
            if n_candidates > params.beam_size {
                candidates.sort_unstable_by(|(node1, score1), (node2, score2)| {
                    score2.total_cmp(score1).then(node1.cmp(node2))
                });
                candidates.truncate(params.beam_size);
            }
            self.notify(SearchEvent::LevelPruned {
                depth,
                n_candidates,
                n_kept: candidates.len(),
            });

            frontier = candidates;
        }

        self.check_cancelled()?;
        let label_score_pairs = self
            .pool
            .submit(&frontier, |&(leaf, score)| {
                self.score_labels(leaf, score, &feature_vec)
            })?
            .into_iter()
            .flatten_ok()
            .collect::<Result<Vec<_>>>()?;
        self.notify(SearchEvent::LeavesScored {
            n_leaves: frontier.len(),
            n_labels: label_score_pairs.len(),
        });

        // A label reached through more than one leaf keeps its best score
        let mut label_to_score = HashMap::<Index, f32>::with_capacity(label_score_pairs.len());
        for (label, score) in label_score_pairs {
            if score.is_nan() {
                return Err(Error::InternalInvariant(format!(
                    "score of label {} is NaN",
                    label
                )));
            }
            label_to_score
                .entry(label)
                .and_modify(|s| *s = s.max(score))
                .or_insert(score);
        }

        // Rank on log scores; exponentiating first can collapse distinct scores to 0 or 1
        let mut top_k = TopKAggregator::new(params.top_k)?;
        for (label, score) in label_to_score {
            top_k.offer(label, score);
        }
        Ok(top_k
            .drain()
            .into_iter()
            .map(|(label, score)| (label, score.exp()))
            .collect())
    }

    /// Score the children of a frontier entry; leaves are carried over unchanged.
    fn expand(&self, node: usize, score: f32, feature_vec: &SparseVec) -> Result<Vec<(usize, f32)>> {
        self.check_cancelled()?;
        Ok(match self.tree.node(node) {
            TreeNode::BranchNode {
                child_classifier_pairs,
            } => child_classifier_pairs
                .iter()
                .map(|(child, classifier)| (*child, score + classifier.score(feature_vec)))
                .collect_vec(),
            TreeNode::LeafNode { .. } => vec![(node, score)],
        })
    }

    fn score_labels(
        &self,
        leaf: usize,
        score: f32,
        feature_vec: &SparseVec,
    ) -> Result<Vec<(Index, f32)>> {
        self.check_cancelled()?;
        match self.tree.node(leaf) {
            TreeNode::LeafNode {
                label_classifier_pairs,
            } => Ok(label_classifier_pairs
                .iter()
                .map(|(label, classifier)| (*label, score + classifier.score(feature_vec)))
                .collect_vec()),
            TreeNode::BranchNode { .. } => Err(Error::InternalInvariant(format!(
                "node at position {} in the final frontier is not a leaf",
                leaf
            ))),
        }
    }
}
