use super::SearchParams;
use crate::util::create_progress_bar;
use crate::{DataSet, Error, IndexSet, ModelHandle, PredictionResult, Result};
use itertools::izip;
use log::info;

/// Queries per batch between progress bar updates.
const BATCH_SIZE: usize = 1024;

/// Compute precision@1 through precision@`max_k`, averaged over examples.
///
/// An example with fewer than `k` predictions contributes nothing beyond its last prediction.
pub fn precision_at_k(
    max_k: usize,
    true_labels: &[IndexSet],
    predicted_labels: &[PredictionResult],
) -> Result<Vec<f32>> {
    if true_labels.len() != predicted_labels.len() {
        return Err(Error::InvalidArgument(format!(
            "got {} label sets but {} predictions",
            true_labels.len(),
            predicted_labels.len()
        )));
    }
    let mut ps = vec![0.; max_k];
    if predicted_labels.is_empty() {
        return Ok(ps);
    }
    for (truth, predictions) in izip!(true_labels, predicted_labels) {
        let mut n_correct = 0;
        for k in 0..max_k.min(predictions.len()) {
            if truth.contains(&predictions[k].0) {
                n_correct += 1;
            }
            ps[k] += n_correct as f32 / (k + 1) as f32;
        }
    }
    for p in &mut ps {
        *p /= predicted_labels.len() as f32;
    }
    Ok(ps)
}

/// Predict for every example in the dataset and report precision@[1, 3, 5].
pub fn test_all(
    handle: &ModelHandle,
    test_dataset: &DataSet,
    params: &SearchParams,
) -> Result<(Vec<PredictionResult>, Vec<f32>)> {
    params.validate()?;
    let n_examples = test_dataset.feature_lists.len();
    let mut pb = create_progress_bar(n_examples as u64);
    let start_t = time::precise_time_s();

    let mut predicted_labels = Vec::with_capacity(n_examples);
    for chunk in test_dataset.feature_lists.chunks(BATCH_SIZE) {
        predicted_labels.extend(handle.predict_batch(chunk, params)?);
        pb.add(chunk.len() as u64);
    }
    pb.finish();
    info!(
        "Done testing on {} examples; it took {:.2}s",
        n_examples,
        time::precise_time_s() - start_t
    );

    let precisions = precision_at_k(5, &test_dataset.label_sets, &predicted_labels)?;
    info!(
        "Precision@[1, 3, 5] = [{:.2}, {:.2}, {:.2}]",
        precisions[0] * 100.,
        precisions[2] * 100.,
        precisions[4] * 100.,
    );

    Ok((predicted_labels, precisions))
}
