//! Gradient-boosted regressor glue.
//!
//! The policy talks to the learner through a deliberately small surface:
//! build a dataset from the CSR training buffer, train a fixed number of
//! iterations, predict one batch of candidate rows, drop. Everything else
//! (feature engineering, labels, sampling) lives in the policy.

use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;

use crate::error::CacheError;

/// Feature layout: slot 0 is the age at sample time, slots 1..=3 the past
/// inter-access distances (newest first), then size and frequency.
pub(crate) const MAX_PAST_TIMESTAMPS: usize = 4;
pub(crate) const N_FEATURE: usize = MAX_PAST_TIMESTAMPS + 2;

const FEATURE_FRACTION: f64 = 0.8;
const BAGGING_FRACTION: f64 = 0.8;

/// CSR-format sparse row builder for training data.
///
/// Rows are appended as they are labeled (on sampled hits and on shadow
/// evictions) and drained wholesale when a training round runs.
#[derive(Debug)]
pub(crate) struct TrainBuffer {
    indptr: Vec<usize>,
    indices: Vec<u32>,
    data: Vec<f32>,
    labels: Vec<f32>,
}

impl TrainBuffer {
    pub(crate) fn new() -> Self {
        Self {
            indptr: vec![0],
            indices: Vec::new(),
            data: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub(crate) fn push_row(&mut self, features: &[f32; N_FEATURE], label: f32) {
        for (i, &v) in features.iter().enumerate() {
            if v != 0.0 {
                self.indices.push(i as u32);
                self.data.push(v);
            }
        }
        self.indptr.push(self.indices.len());
        self.labels.push(label);
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.indptr.clear();
        self.indptr.push(0);
        self.indices.clear();
        self.data.clear();
        self.labels.clear();
    }

    fn dense_row(&self, row: usize) -> Vec<f32> {
        let mut out = vec![0.0; N_FEATURE];
        for k in self.indptr[row]..self.indptr[row + 1] {
            out[self.indices[k] as usize] = self.data[k];
        }
        out
    }
}

/// Static training parameters of the boosted ensemble.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LearnerParams {
    pub(crate) iterations: usize,
    pub(crate) learning_rate: f64,
    pub(crate) num_leaves: u32,
}

impl LearnerParams {
    /// The pure-Rust learner grows depth-bounded trees; a leaf budget of
    /// `n` maps to the equivalent depth `ceil(log2 n)`.
    fn max_depth(&self) -> u32 {
        let leaves = self.num_leaves.max(2);
        u32::BITS - (leaves - 1).leading_zeros()
    }
}

/// A trained reuse-distance regressor.
pub(crate) struct Learner {
    model: GBDT,
}

impl std::fmt::Debug for Learner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Learner").finish_non_exhaustive()
    }
}

impl Learner {
    /// Trains a fresh ensemble on the buffered rows. Returns the model and
    /// its mean-squared error on the training batch.
    pub(crate) fn train(
        params: &LearnerParams,
        buf: &TrainBuffer,
    ) -> Result<(Self, f64), CacheError> {
        if buf.is_empty() {
            return Err(CacheError::Learner("empty training batch".to_string()));
        }
        let mut cfg = Config::new();
        cfg.set_feature_size(N_FEATURE);
        cfg.set_max_depth(params.max_depth());
        cfg.set_iterations(params.iterations);
        cfg.set_shrinkage(params.learning_rate as f32);
        cfg.set_loss("SquaredError");
        cfg.set_debug(false);
        cfg.set_data_sample_ratio(BAGGING_FRACTION);
        cfg.set_feature_sample_ratio(FEATURE_FRACTION);
        cfg.set_training_optimization_level(2);

        let mut train_dv: DataVec = (0..buf.len())
            .map(|r| Data::new_training_data(buf.dense_row(r), 1.0, buf.labels[r], None))
            .collect();
        let mut model = GBDT::new(&cfg);
        model.fit(&mut train_dv);

        let preds = model.predict(&train_dv);
        if preds.len() != buf.len() {
            return Err(CacheError::Learner(
                "prediction count does not match training batch".to_string(),
            ));
        }
        let loss = preds
            .iter()
            .zip(buf.labels.iter())
            .map(|(p, l)| {
                let d = (p - l) as f64;
                d * d
            })
            .sum::<f64>()
            / buf.len() as f64;

        Ok((Self { model }, loss))
    }

    /// Batched inference over candidate feature rows.
    pub(crate) fn predict(&self, rows: &[[f32; N_FEATURE]]) -> Vec<f32> {
        let dv: DataVec = rows
            .iter()
            .map(|r| Data::new_test_data(r.to_vec(), None))
            .collect();
        self.model.predict(&dv)
    }
}
