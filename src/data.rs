use crate::mat_util::*;
use crate::{Error, Index, IndexSet, IndexValueVec, Result, SparseVec};
use itertools::Itertools;
use log::info;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::Path;

/// A sparse input vector, validated on construction.
///
/// Indices are unique but may come in any order; absent indices are implicitly zero.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector {
    indices: Vec<Index>,
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(indices: Vec<Index>, values: Vec<f32>) -> Result<Self> {
        if indices.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "feature indices and values have different lengths ({} vs {})",
                indices.len(),
                values.len()
            )));
        }
        if let Some(v) = values.iter().find(|v| !v.is_finite()) {
            return Err(Error::InvalidArgument(format!(
                "feature value {} is not finite",
                v
            )));
        }
        if let Some(i) = indices.iter().duplicates().next() {
            return Err(Error::InvalidArgument(format!(
                "feature index {} appears more than once",
                i
            )));
        }
        Ok(Self { indices, values })
    }

    /// Build from slices, as received across a binding boundary.
    pub fn from_slices(indices: &[Index], values: &[f32]) -> Result<Self> {
        Self::new(indices.to_vec(), values.to_vec())
    }

    pub fn from_pairs(pairs: &[(Index, f32)]) -> Result<Self> {
        let (indices, values) = pairs.iter().cloned().unzip();
        Self::new(indices, values)
    }

    pub fn indices(&self) -> &[Index] {
        &self.indices
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Prepare for scoring against a model with the given number of features.
    ///
    /// Entries with indices outside the model's feature space are dropped since no weight can
    /// ever match them.
    pub(crate) fn to_sparse_vec(&self, n_features: usize) -> SparseVec {
        let mut pairs = self
            .indices
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .filter(|&(i, _)| (i as usize) < n_features)
            .collect_vec();
        pairs.sort_by_index();
        let (indices, data) = pairs.into_iter().unzip();
        SparseVec::new(n_features, indices, data)
    }
}

/// A labelled dataset loaded in memory, used for evaluating a model.
#[derive(Clone)]
pub struct DataSet {
    pub n_features: usize,
    pub n_labels: usize,
    pub feature_lists: Vec<FeatureVector>,
    pub label_sets: Vec<IndexSet>,
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Parse a line in a data file from the Extreme Classification Repository
///
/// The line should be in the following format:
/// label1,label2,...labelk ft1:ft1_val ft2:ft2_val ft3:ft3_val .. ftd:ftd_val
fn parse_xc_repo_data_line(line: &str, n_features: usize) -> io::Result<(IndexValueVec, IndexSet)> {
    let mut token_iter = line.split(' ');

    let mut labels = IndexSet::new();
    {
        let labels_str = token_iter
            .next()
            .ok_or_else(|| invalid_data(format!("Failed to find labels in line: \"{}\"", line)))?;
        for label_str in labels_str.split(',') {
            if !label_str.is_empty() {
                labels.insert(label_str.parse::<Index>().map_err(|_| {
                    invalid_data(format!(
                        "Failed to parse label {} in line \"{}\"",
                        label_str, line
                    ))
                })?);
            }
        }
        labels.shrink_to_fit();
    }

    let mut features = Vec::new();
    for feature_value_pair_str in token_iter.filter(|s| !s.is_empty()) {
        let mut feature_value_pair_iter = feature_value_pair_str.split(':');
        let feature = feature_value_pair_iter
            .next()
            .and_then(|s| s.parse::<Index>().ok())
            .ok_or_else(|| invalid_data(format!("Failed to parse feature {}", feature_value_pair_str)))?;
        let value = feature_value_pair_iter
            .next()
            .and_then(|s| s.parse::<f32>().ok())
            .ok_or_else(|| {
                invalid_data(format!(
                    "Failed to parse feature value {}",
                    feature_value_pair_str
                ))
            })?;
        if feature_value_pair_iter.next().is_some() {
            return Err(invalid_data(format!(
                "Failed to parse feature {}",
                feature_value_pair_str
            )));
        }
        features.push((feature, value));
    }
    features.sort_by_index();
    if !features.is_valid_sparse_vec(n_features) {
        return Err(invalid_data(format!(
            "Feature vector is invalid in line {}",
            line
        )));
    }

    Ok((features, labels))
}

fn parse_header_token(token: &str, name: &str) -> io::Result<usize> {
    token
        .parse::<usize>()
        .map_err(|_| invalid_data(format!("Failed to parse number of {}", name)))
}

impl DataSet {
    /// Load a data file from the Extreme Classification Repository
    pub fn load_xc_repo_data_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading data from {}", path.display());
        let start_t = time::precise_time_s();

        let file_content = fs::read_to_string(path)?;
        let lines: Vec<&str> = file_content.par_lines().collect();
        let (n_examples, n_features, n_labels) = {
            let header = lines
                .first()
                .ok_or_else(|| invalid_data("Data file is empty".to_owned()))?;
            let tokens = header.split_whitespace().collect_vec();
            if tokens.len() != 3 {
                return Err(invalid_data(format!(
                    "Expect header line with 3 space-separated tokens, found {} instead",
                    tokens.len()
                ))
                .into());
            }
            (
                parse_header_token(tokens[0], "examples")?,
                parse_header_token(tokens[1], "features")?,
                parse_header_token(tokens[2], "labels")?,
            )
        };

        let rows: Vec<_> = lines
            .into_par_iter()
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .map(|line| parse_xc_repo_data_line(line, n_features))
            .collect::<io::Result<_>>()?;
        let (pair_lists, label_sets): (Vec<_>, Vec<_>) = rows.into_iter().unzip();

        if n_examples != pair_lists.len() {
            return Err(invalid_data(format!(
                "Expected {} examples, but read {}",
                n_examples,
                pair_lists.len()
            ))
            .into());
        }

        let feature_lists = pair_lists
            .iter()
            .map(|pairs| FeatureVector::from_pairs(pairs))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Loaded {} examples; it took {:.2}s",
            n_examples,
            time::precise_time_s() - start_t
        );
        Ok(Self {
            n_features,
            n_labels,
            feature_lists,
            label_sets,
        })
    }
}
