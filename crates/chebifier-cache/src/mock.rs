//! Mock predictor for testing.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::predictor::{PredictError, PredictFuture, Predictor};

/// A hand-rolled mock implementing [`Predictor<String>`] for tests.
///
/// For a batch `[s0, s1, ...]` it answers `"{model}_P0"`, `"{model}_P1"`, ...
/// so a test can tell from the value which position of which call produced
/// it. Supports:
/// - SMILES that always get no prediction (`None`).
/// - Forced failure of every call.
/// - Dropping the last result, to break the length contract.
/// - Optional per-call latency.
/// - Recording every batch it was called with.
pub struct MockPredictor {
    model_name: String,
    absent: HashSet<String>,
    failure: Option<String>,
    drop_last: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockPredictor {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            absent: HashSet::new(),
            failure: None,
            drop_last: false,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Return `None` for every occurrence of these SMILES.
    pub fn with_absent<I, S>(mut self, smiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.absent.extend(smiles.into_iter().map(Into::into));
        self
    }

    /// Fail every call with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Return one result fewer than requested.
    pub fn dropping_last(mut self) -> Self {
        self.drop_last = true;
        self
    }

    /// Set simulated inference latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn lock_calls(&self) -> MutexGuard<'_, Vec<Vec<String>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every batch passed to `predict()`, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.lock_calls().clone()
    }

    /// How many times `predict()` has been called.
    pub fn call_count(&self) -> usize {
        self.lock_calls().len()
    }

    fn answer(&self, smiles: &[String]) -> Result<Vec<Option<String>>, PredictError> {
        if let Some(message) = &self.failure {
            return Err(PredictError::failed(&self.model_name, message));
        }
        let mut out: Vec<Option<String>> = smiles
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if self.absent.contains(s) {
                    None
                } else {
                    Some(format!("{}_P{}", self.model_name, i))
                }
            })
            .collect();
        if self.drop_last {
            out.pop();
        }
        Ok(out)
    }
}

impl Predictor<String> for MockPredictor {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn predict<'a>(&'a self, smiles: &'a [String]) -> PredictFuture<'a, String> {
        self.lock_calls().push(smiles.to_vec());
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            self.answer(smiles)
        })
    }
}
