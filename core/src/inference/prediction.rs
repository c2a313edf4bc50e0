//! Classification results.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Deref;

use crate::error::{Caffe2Error, Result};

/// A class index and its probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub index: usize,
    pub probability: f32,
}

impl Prediction {
    pub fn new(index: usize, probability: f32) -> Self {
        Self { index, probability }
    }
}

/// Highest probability first; ties go to the smaller index.
fn by_rank(a: &Prediction, b: &Prediction) -> Ordering {
    b.probability
        .total_cmp(&a.probability)
        .then(a.index.cmp(&b.index))
}

/// The `k` most probable predictions.
pub fn top_k(predictions: &[Prediction], k: usize) -> Vec<Prediction> {
    let mut sorted = predictions.to_vec();
    sorted.sort_by(by_rank);
    sorted.truncate(k);
    sorted
}

/// Per-sample predictions over all classes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Predictions(Vec<Prediction>);

impl Predictions {
    /// Index each probability by its position.
    pub fn from_probabilities(probabilities: &[f32]) -> Self {
        Self(
            probabilities
                .iter()
                .enumerate()
                .map(|(index, &probability)| Prediction { index, probability })
                .collect(),
        )
    }

    /// Split a `[batch, classes]` row-major buffer into the first `samples`
    /// rows.
    pub fn from_batch(probabilities: &[f32], batch_size: usize, samples: usize) -> Result<Vec<Self>> {
        if batch_size == 0 || probabilities.len() % batch_size != 0 {
            return Err(Caffe2Error::shape(format!(
                "{} probabilities cannot be split into {} rows",
                probabilities.len(),
                batch_size
            )));
        }
        if samples > batch_size {
            return Err(Caffe2Error::shape(format!(
                "{} samples exceed the batch size of {}",
                samples, batch_size
            )));
        }
        let classes = probabilities.len() / batch_size;
        Ok(probabilities
            .chunks(classes.max(1))
            .take(samples)
            .map(Self::from_probabilities)
            .collect())
    }

    /// Sort in place, most probable first.
    pub fn sort(&mut self) {
        self.0.sort_by(by_rank);
    }

    pub fn top_k(&self, k: usize) -> Vec<Prediction> {
        top_k(&self.0, k)
    }

    /// The single most probable prediction.
    pub fn best(&self) -> Option<Prediction> {
        self.top_k(1).into_iter().next()
    }

    pub fn into_inner(self) -> Vec<Prediction> {
        self.0
    }
}

impl Deref for Predictions {
    type Target = [Prediction];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Prediction>> for Predictions {
    fn from(value: Vec<Prediction>) -> Self {
        Self(value)
    }
}
