//! Batch reconciliation: answer a batch of SMILES from the cache where
//! possible and run the model only on the rest.
//!
//! Every input position is looked up exactly once, in input order. Misses are
//! collected in input order, duplicates included, handed to the model in a
//! single call, written back to the cache (unless the model returned `None`)
//! and slotted into their original positions.
//!
//! Lookup and write-back are separate critical sections. Two callers that
//! miss on the same key at the same time will both run the model and both
//! write the result; there is no single-flight de-duplication.

use std::sync::Arc;

use crate::cache::PredictionCache;
use crate::predictor::{PredictError, PredictFuture, Predictor};
use crate::CacheError;

/// The cache-lookup half of a reconciled batch.
///
/// Built by [`PredictionCache::plan_batch`]; finished by
/// [`resolve`](BatchPlan::resolve) once the missing SMILES have been
/// predicted.
#[derive(Debug)]
pub struct BatchPlan<V> {
    model: String,
    results: Vec<Option<V>>,
    missing: Vec<String>,
    missing_indices: Vec<usize>,
}

impl<V: Clone> PredictionCache<V> {
    /// Look up every SMILES of a batch for `model`.
    pub fn plan_batch<S: AsRef<str>>(&self, smiles: &[S], model: &str) -> BatchPlan<V> {
        let mut results = Vec::with_capacity(smiles.len());
        let mut missing = Vec::new();
        let mut missing_indices = Vec::new();

        for (idx, s) in smiles.iter().enumerate() {
            let s = s.as_ref();
            match self.get(s, model) {
                Some(cached) => results.push(Some(cached)),
                None => {
                    results.push(None);
                    missing.push(s.to_string());
                    missing_indices.push(idx);
                }
            }
        }

        BatchPlan {
            model: model.to_string(),
            results,
            missing,
            missing_indices,
        }
    }
}

impl<V: Clone> BatchPlan<V> {
    pub fn model(&self) -> &str {
        &self.model
    }

    /// SMILES the model still has to predict, in input order.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Number of input positions served from the cache.
    pub fn hit_count(&self) -> usize {
        self.results.len() - self.missing.len()
    }

    /// Whether every input position was a cache hit.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Merge freshly computed predictions (aligned with
    /// [`missing`](BatchPlan::missing)) into the batch, caching every
    /// non-`None` one.
    ///
    /// If `computed` has the wrong length nothing is cached and
    /// [`PredictError::LengthMismatch`] is returned.
    pub fn resolve(
        self,
        cache: &PredictionCache<V>,
        computed: Vec<Option<V>>,
    ) -> Result<Vec<Option<V>>, PredictError> {
        if computed.len() != self.missing.len() {
            return Err(PredictError::LengthMismatch {
                model: self.model,
                expected: self.missing.len(),
                actual: computed.len(),
            });
        }

        let Self {
            model,
            mut results,
            missing,
            missing_indices,
        } = self;

        for ((smiles, idx), prediction) in missing.iter().zip(missing_indices).zip(computed) {
            if let Some(value) = &prediction {
                cache.insert(smiles, &model, value.clone());
            }
            results[idx] = prediction;
        }
        Ok(results)
    }
}

/// Run a synchronous batch prediction through the cache.
///
/// `predict` is called at most once, with the cache misses only; it is not
/// called at all when every SMILES is cached. Errors from `predict` are
/// returned as-is and nothing from that batch is cached. A blank `model`
/// fails with [`CacheError::MissingModelName`] before any lookup.
pub fn cached_batch<V, S, F>(
    cache: &PredictionCache<V>,
    model: &str,
    smiles: &[S],
    predict: F,
) -> Result<Vec<Option<V>>, PredictError>
where
    V: Clone,
    S: AsRef<str>,
    F: FnOnce(&[String]) -> Result<Vec<Option<V>>, PredictError>,
{
    if model.trim().is_empty() {
        return Err(CacheError::MissingModelName.into());
    }
    let plan = cache.plan_batch(smiles, model);
    if plan.is_complete() {
        return plan.resolve(cache, Vec::new());
    }
    let computed = predict(plan.missing())?;
    plan.resolve(cache, computed)
}

/// A [`Predictor`] that consults a shared [`PredictionCache`] before running
/// the wrapped model.
///
/// It implements [`Predictor`] itself, so it can replace the uncached model
/// anywhere one is expected.
pub struct CachedPredictor<V> {
    inner: Arc<dyn Predictor<V>>,
    cache: Arc<PredictionCache<V>>,
}

impl<V> CachedPredictor<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Wrap `inner`, keying its predictions by its model name.
    ///
    /// Fails with [`CacheError::MissingModelName`] if the model name is blank.
    pub fn new(
        inner: Arc<dyn Predictor<V>>,
        cache: Arc<PredictionCache<V>>,
    ) -> Result<Self, CacheError> {
        if inner.model_name().trim().is_empty() {
            return Err(CacheError::MissingModelName);
        }
        Ok(Self { inner, cache })
    }

    pub fn cache(&self) -> &Arc<PredictionCache<V>> {
        &self.cache
    }

    pub fn inner(&self) -> &Arc<dyn Predictor<V>> {
        &self.inner
    }

    /// Predict a batch, serving cached SMILES from the cache.
    pub async fn predict_cached<S>(&self, smiles: &[S]) -> Result<Vec<Option<V>>, PredictError>
    where
        S: AsRef<str> + Sync,
    {
        let model = self.inner.model_name();
        let plan = self.cache.plan_batch(smiles, model);
        tracing::debug!(
            model,
            batch = smiles.len(),
            hits = plan.hit_count(),
            misses = plan.missing().len(),
            "prediction batch"
        );
        if plan.is_complete() {
            return plan.resolve(&self.cache, Vec::new());
        }
        let computed = self.inner.predict(plan.missing()).await?;
        plan.resolve(&self.cache, computed)
    }
}

impl<V> Predictor<V> for CachedPredictor<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn predict<'a>(&'a self, smiles: &'a [String]) -> PredictFuture<'a, V> {
        Box::pin(self.predict_cached(smiles))
    }
}

impl<V> std::fmt::Debug for CachedPredictor<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedPredictor")
            .field("model", &self.inner.model_name())
            .field("cache", &self.cache)
            .finish()
    }
}
