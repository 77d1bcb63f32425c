use crate::{DenseVec, Index, IndexValueVec, SparseVec};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// A weight vector, can be either dense or sparse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Vector {
    Dense(DenseVec),
    /// Index-value pairs sorted by index.
    Sparse(IndexValueVec),
}

impl Vector {
    /// Dot product with a query whose dimension is the model's feature count.
    pub fn dot(&self, that: &SparseVec) -> f32 {
        match self {
            Vector::Dense(this) => that.dot_dense(this.view()),
            Vector::Sparse(this) => sparse_dot(this, that.indices(), that.data()),
        }
    }

    pub fn nnz(&self) -> usize {
        match self {
            Vector::Dense(this) => this.iter().filter(|v| **v != 0.).count(),
            Vector::Sparse(this) => this.len(),
        }
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, Vector::Dense(_))
    }

    /// Convert to dense representation if the fraction of non-zero entries exceeds the threshold.
    pub fn densify(&mut self, length: usize, max_sparse_density: f32) {
        if let Vector::Sparse(pairs) = self {
            if length == 0 || (pairs.len() as f32 / length as f32) <= max_sparse_density {
                return;
            }
            let mut dense = DenseVec::zeros(length);
            for &(i, v) in pairs.iter() {
                dense[i as usize] = v;
            }
            *self = Vector::Dense(dense);
        }
    }

    /// Check that the vector fits in a space of the given dimension and holds only finite values.
    pub fn validate(&self, length: usize) -> Result<(), String> {
        match self {
            Vector::Dense(this) => {
                if this.len() != length {
                    return Err(format!(
                        "dense weight vector has length {}, expected {}",
                        this.len(),
                        length
                    ));
                }
                if this.iter().any(|v| !v.is_finite()) {
                    return Err("dense weight vector has non-finite values".to_owned());
                }
            }
            Vector::Sparse(this) => {
                if !this.is_valid_sparse_vec(length) {
                    return Err(format!(
                        "sparse weight vector is unsorted, has duplicate indices, \
                         or has indices not smaller than {}",
                        length
                    ));
                }
                if this.iter().any(|(_, v)| !v.is_finite()) {
                    return Err("sparse weight vector has non-finite values".to_owned());
                }
            }
        }
        Ok(())
    }
}

pub trait IndexValuePairs<ValueT: Copy>: Deref<Target = [(Index, ValueT)]> {
    fn is_valid_sparse_vec(&self, length: usize) -> bool {
        // If empty, always valid
        if self.is_empty() {
            return true;
        }
        // Check if:
        // - All indices are smaller than max index
        // - Pairs are sorted by indices
        // - There are no duplicate indices
        if self[0].0 as usize >= length {
            return false;
        }
        if self.len() > 1 {
            for ((i, _), (j, _)) in self.iter().skip(1).zip(self.iter()) {
                if *i as usize >= length || i <= j {
                    return false;
                }
            }
        }

        true
    }
}

impl<ValueT, PairsT> IndexValuePairs<ValueT> for PairsT
where
    ValueT: Copy,
    PairsT: Deref<Target = [(Index, ValueT)]>,
{
}

pub trait IndexValuePairsMut<ValueT>: DerefMut<Target = [(Index, ValueT)]> {
    fn sort_by_index(&mut self) {
        self.sort_unstable_by(|l, r| l.0.cmp(&r.0));
    }
}

impl<ValueT, PairsT> IndexValuePairsMut<ValueT> for PairsT where
    PairsT: DerefMut<Target = [(Index, ValueT)]>
{
}

/// Dot product of sorted index-value pairs with a sparse vector given as sorted indices and data.
///
/// Merges the two index lists when they have similar lengths; otherwise binary-searches each
/// index of the shorter side in the longer one, which costs O(min * log(max)).
pub fn sparse_dot(pairs: &[(Index, f32)], indices: &[Index], data: &[f32]) -> f32 {
    debug_assert_eq!(indices.len(), data.len());
    if pairs.is_empty() || indices.is_empty() {
        return 0.;
    }

    let (short_len, long_len) = if pairs.len() < indices.len() {
        (pairs.len(), indices.len())
    } else {
        (indices.len(), pairs.len())
    };

    let mut sum = 0f32;
    if short_len + long_len < short_len * (long_len as f32).log2() as usize {
        let (mut i, mut j) = (0, 0);
        while i < pairs.len() && j < indices.len() {
            let (index, value) = pairs[i];
            if index == indices[j] {
                sum += value * data[j];
                i += 1;
                j += 1;
            } else if index < indices[j] {
                i += 1;
            } else {
                j += 1;
            }
        }
    } else if pairs.len() <= indices.len() {
        let mut offset = 0;
        for &(index, value) in pairs {
            match indices[offset..].binary_search(&index) {
                Ok(k) => {
                    sum += value * data[offset + k];
                    offset += k + 1;
                }
                Err(k) => offset += k,
            }
            if offset >= indices.len() {
                break;
            }
        }
    } else {
        let mut rest = pairs;
        for (&index, &value) in indices.iter().zip(data) {
            match rest.binary_search_by(|x| x.0.cmp(&index)) {
                Ok(k) => {
                    sum += rest[k].1 * value;
                    rest = &rest[k + 1..];
                }
                Err(k) => rest = &rest[k..],
            }
            if rest.is_empty() {
                break;
            }
        }
    }

    sum
}
