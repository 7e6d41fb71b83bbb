//! Predictor trait: the batch computation a [`PredictionCache`](crate::PredictionCache)
//! sits in front of.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::CacheError;

/// Boxed future returned by [`Predictor::predict`].
pub type PredictFuture<'a, V> =
    Pin<Box<dyn Future<Output = Result<Vec<Option<V>>, PredictError>> + Send + 'a>>;

#[derive(Error, Debug)]
pub enum PredictError {
    /// The model itself failed. Passed through the cache unchanged.
    #[error("{model} prediction failed: {message}")]
    Failed { model: String, message: String },
    /// The model returned a different number of results than it was asked for.
    #[error("{model} returned {actual} predictions for {expected} SMILES")]
    LengthMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },
    /// The batch could not be keyed, e.g. a blank model name.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// I/O failure while talking to an out-of-process model.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PredictError {
    pub fn failed(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            model: model.into(),
            message: message.into(),
        }
    }
}

/// A model that predicts one result per SMILES string for a whole batch.
///
/// `predict` must return exactly one entry per input, in input order. `None`
/// means "no prediction for this molecule" and is never cached.
pub trait Predictor<V>: Send + Sync {
    /// The model identity used as the second half of every cache key.
    fn model_name(&self) -> &str;

    /// Predict a batch of SMILES strings.
    fn predict<'a>(&'a self, smiles: &'a [String]) -> PredictFuture<'a, V>;
}

/// Adapts a synchronous closure into a [`Predictor`].
pub struct FnPredictor<F> {
    model_name: String,
    predict: F,
}

impl<F> FnPredictor<F> {
    pub fn new(model_name: impl Into<String>, predict: F) -> Self {
        Self {
            model_name: model_name.into(),
            predict,
        }
    }
}

impl<V, F> Predictor<V> for FnPredictor<F>
where
    V: Send + 'static,
    F: Fn(&[String]) -> Result<Vec<Option<V>>, PredictError> + Send + Sync,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn predict<'a>(&'a self, smiles: &'a [String]) -> PredictFuture<'a, V> {
        let result = (self.predict)(smiles);
        Box::pin(std::future::ready(result))
    }
}
