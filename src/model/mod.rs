mod classifier;
pub mod eval;
mod search;
#[cfg(test)]
pub(crate) mod testing;
mod topk;
mod tree;

pub use classifier::{ClassifierNode, LossType};
pub use search::{BeamSearch, CancelToken, Observer, SearchEvent, SearchParams};
pub use topk::TopKAggregator;
pub use tree::{LabelTree, NodeRecord, ROOT_ID};
