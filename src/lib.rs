#[cfg(test)]
#[macro_use]
extern crate assert_approx_eq;

pub type Index = u32;
pub type IndexValueVec = Vec<(Index, f32)>;
pub type IndexSet = hashbrown::HashSet<Index>;
pub type SparseVec = sprs::CsVecI<f32, Index>;
pub type DenseVec = ndarray::Array1<f32>;

/// Labels with scores, sorted by score descending and then by label ascending.
pub type PredictionResult = IndexValueVec;

pub use data::{DataSet, FeatureVector};
pub use error::{Error, Result};
pub use handle::ModelHandle;
pub use model::{
    CancelToken, ClassifierNode, LabelTree, LossType, NodeRecord, Observer, SearchEvent,
    SearchParams, TopKAggregator,
};
pub use pool::WorkerPool;

pub mod data;
pub mod error;
pub mod handle;
mod mat_util;
pub mod model;
pub mod pool;
mod util;
