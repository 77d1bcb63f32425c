use crate::model::{BeamSearch, CancelToken, LabelTree, Observer, SearchParams};
use crate::{Error, FeatureVector, Index, PredictionResult, Result, WorkerPool};
use const_default::ConstDefault;
use log::{info, warn};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

struct Engine {
    tree: LabelTree,
    pool: WorkerPool,
}

enum State {
    Unopened,
    /// Opening failed; the handle cannot be opened again.
    Failed,
    Open(Engine),
    Closed,
}

/// A loaded model together with the worker pool that serves its predictions.
///
/// The handle goes through `Unopened -> Open -> Closed`. Any number of threads may predict
/// concurrently while it is open; [`ModelHandle::close`] waits for in-flight predictions before
/// releasing the tree and the workers.
pub struct ModelHandle {
    state: RwLock<State>,
    observer: Option<Arc<dyn Observer>>,
}

impl Default for ModelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelHandle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::Unopened),
            observer: None,
        }
    }

    /// Attach a hook that receives progress events from every search run through this handle.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Create a handle and open the model saved in the given directory.
    pub fn load(path: impl AsRef<Path>, n_workers: usize) -> Result<Self> {
        let handle = Self::new();
        handle.open(path, n_workers)?;
        Ok(handle)
    }

    /// Load the model saved in the given directory and start `n_workers` worker threads.
    pub fn open(&self, path: impl AsRef<Path>, n_workers: usize) -> Result<()> {
        self.open_with(|| LabelTree::load(path), n_workers)
    }

    /// Serve an already loaded tree with `n_workers` worker threads.
    pub fn open_tree(&self, tree: LabelTree, n_workers: usize) -> Result<()> {
        self.open_with(|| Ok(tree), n_workers)
    }

    fn open_with<F>(&self, load_tree: F, n_workers: usize) -> Result<()>
    where
        F: FnOnce() -> Result<LabelTree>,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match *state {
            State::Unopened => {}
            State::Open(_) => return Err(Error::InvalidState("model is already open".to_owned())),
            State::Failed => {
                return Err(Error::InvalidState(
                    "model failed to open and cannot be reopened".to_owned(),
                ))
            }
            State::Closed => return Err(Error::InvalidState("model is closed".to_owned())),
        }

        let engine = load_tree().and_then(|tree| {
            let pool = WorkerPool::new(n_workers)?;
            Ok(Engine { tree, pool })
        });
        match engine {
            Ok(engine) => {
                info!(
                    "Opened model with {} features, {} labels and {} workers",
                    engine.tree.n_features(),
                    engine.tree.n_labels(),
                    engine.pool.n_workers()
                );
                *state = State::Open(engine);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open model: {}", e);
                *state = State::Failed;
                Err(e)
            }
        }
    }

    /// Wait for in-flight predictions, then release the tree and the workers.
    ///
    /// Closing an already closed handle does nothing.
    pub fn close(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let State::Open(engine) = std::mem::replace(&mut *state, State::Closed) {
            engine.pool.close();
            info!("Closed model");
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            *self.state.read().unwrap_or_else(PoisonError::into_inner),
            State::Open(_)
        )
    }

    /// Run `op` against the open model, keeping it open until `op` returns.
    fn with_engine<R>(&self, op: impl FnOnce(&Engine) -> Result<R>) -> Result<R> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            State::Open(engine) => op(engine),
            State::Unopened => Err(Error::InvalidState("model is not open".to_owned())),
            State::Failed => Err(Error::InvalidState("model failed to open".to_owned())),
            State::Closed => Err(Error::InvalidState("model is closed".to_owned())),
        }
    }

    fn search<'a>(&'a self, engine: &'a Engine, cancel_token: Option<&'a CancelToken>) -> BeamSearch<'a> {
        BeamSearch::new(&engine.tree, &engine.pool)
            .with_observer(self.observer.as_deref())
            .with_cancel_token(cancel_token)
    }

    /// The expected dimension of feature vectors.
    pub fn num_features(&self) -> Result<usize> {
        self.with_engine(|engine| Ok(engine.tree.n_features()))
    }

    pub fn num_labels(&self) -> Result<usize> {
        self.with_engine(|engine| Ok(engine.tree.n_labels()))
    }

    /// Return the `top_k` best labels found by a beam search of width `beam_size`.
    pub fn predict(
        &self,
        features: &FeatureVector,
        beam_size: usize,
        top_k: usize,
    ) -> Result<PredictionResult> {
        self.predict_with(features, &SearchParams::new(beam_size, top_k), None)
    }

    pub fn predict_default(&self, features: &FeatureVector) -> Result<PredictionResult> {
        self.predict_with(features, &SearchParams::DEFAULT, None)
    }

    /// Predict from parallel index and value arrays.
    pub fn predict_slices(
        &self,
        indices: &[Index],
        values: &[f32],
        beam_size: usize,
        top_k: usize,
    ) -> Result<PredictionResult> {
        self.with_engine(|engine| {
            let features = FeatureVector::from_slices(indices, values)?;
            self.search(engine, None)
                .search(&features, &SearchParams::new(beam_size, top_k))
        })
    }

    /// Predict with explicit parameters, optionally abandoning the search once `cancel_token`
    /// is triggered.
    pub fn predict_with(
        &self,
        features: &FeatureVector,
        params: &SearchParams,
        cancel_token: Option<&CancelToken>,
    ) -> Result<PredictionResult> {
        self.with_engine(|engine| self.search(engine, cancel_token).search(features, params))
    }

    /// Predict for many queries at once, spreading the queries across the workers.
    ///
    /// Results are in query order.
    pub fn predict_batch(
        &self,
        feature_vecs: &[FeatureVector],
        params: &SearchParams,
    ) -> Result<Vec<PredictionResult>> {
        self.with_engine(|engine| {
            params.validate()?;
            let search = self.search(engine, None);
            engine
                .pool
                .submit(feature_vecs, |features| search.search(features, params))?
                .into_iter()
                .collect()
        })
    }
}
