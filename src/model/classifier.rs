use crate::mat_util::*;
use crate::{IndexValueVec, SparseVec};
use serde::{Deserialize, Serialize};

/// The loss function the classifier was trained with, which determines how raw margins are
/// turned into log-domain scores.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossType {
    /// Log loss: score is log(sigmoid(w^Tx + b))
    Log,
    /// Squared hinge loss: score is -max(0, 1 - (w^Tx + b))^2
    Hinge,
}

/// A binary linear classifier attached to a tree edge or a label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifierNode {
    weights: Vector,
    bias: f32,
    loss_type: LossType,
}

impl ClassifierNode {
    /// Create a classifier from potentially unsorted (index, weight) pairs.
    pub fn new(mut weights: IndexValueVec, bias: f32, loss_type: LossType) -> Self {
        weights.sort_by_index();
        weights.shrink_to_fit();
        Self {
            weights: Vector::Sparse(weights),
            bias,
            loss_type,
        }
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn loss_type(&self) -> LossType {
        self.loss_type
    }

    pub fn is_dense(&self) -> bool {
        self.weights.is_dense()
    }

    /// Raw margin w^Tx + b.
    pub fn margin(&self, feature_vec: &SparseVec) -> f32 {
        self.weights.dot(feature_vec) + self.bias
    }

    /// Compute the log-domain score (always <= 0) for a given example.
    pub fn score(&self, feature_vec: &SparseVec) -> f32 {
        let p = self.margin(feature_vec);
        match self.loss_type {
            // Split on sign so exp never overflows
            LossType::Log if p >= 0. => -(-p).exp().ln_1p(),
            LossType::Log => p - p.exp().ln_1p(),
            LossType::Hinge => -(1. - p).max(0.).powi(2),
        }
    }

    pub(crate) fn densify(&mut self, n_features: usize, max_sparse_density: f32) {
        self.weights.densify(n_features, max_sparse_density);
    }

    pub(crate) fn validate(&self, n_features: usize) -> Result<(), String> {
        if !self.bias.is_finite() {
            return Err(format!("bias {} is not finite", self.bias));
        }
        self.weights.validate(n_features)
    }
}
