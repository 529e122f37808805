//! Isolation-forest anomaly model
//!
//! A single global, unsupervised outlier classifier over the five raw
//! district-day counts. It is trained once across all districts so that it
//! captures cross-district magnitude baselines, then shared read-only by
//! every district at inference.
//!
//! # Algorithm
//!
//! Each tree isolates a sub-sample of training rows by recursively picking a
//! random feature and a random split value between that feature's minimum and
//! maximum in the node. Outliers are isolated in fewer splits, so the mean
//! path length over the forest is short for them.
//!
//! ```text
//! s(x) = 2^(-E[h(x)] / c(ψ))
//! c(n) = 2·H(n-1) - 2(n-1)/n        H(i) ≈ ln(i) + γ
//! ```
//!
//! The decision threshold is the `(1 - contamination)` quantile of the
//! training scores, so roughly `contamination` of the training rows are
//! flagged. Features are used as raw counts; scale sensitivity comes from
//! the training distribution and must not be normalised away.

use crate::error::{Result, SurveillanceError};
use crate::features::{DistrictDayFeatureVector, FEATURE_COUNT, FEATURE_NAMES};
use chrono::{DateTime, Utc};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

/// Euler–Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Anything that can flag a feature vector as anomalous
pub trait AnomalyClassifier: Send + Sync {
    /// True when the vector is an outlier relative to the training data
    fn classify(&self, vector: &DistrictDayFeatureVector) -> bool;
}

/// Training parameters for the isolation forest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of isolation trees
    pub n_trees: usize,
    /// Maximum rows drawn (without replacement) per tree
    pub max_samples: usize,
    /// Expected outlier fraction in the training data
    pub contamination: f64,
    /// Seed for reproducible training
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            n_trees: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

impl ForestParams {
    pub fn with_n_trees(mut self, n: usize) -> Self {
        self.n_trees = n;
        self
    }

    pub fn with_max_samples(mut self, n: usize) -> Self {
        self.max_samples = n;
        self
    }

    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_trees == 0 {
            return Err(SurveillanceError::Training("n_trees must be positive".into()));
        }
        if self.max_samples == 0 {
            return Err(SurveillanceError::Training("max_samples must be positive".into()));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(SurveillanceError::Training(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        Ok(())
    }
}

/// A node of an isolation tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IsolationNode {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
}

impl IsolationNode {
    fn build(
        rows: &[[f64; FEATURE_COUNT]],
        indices: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut ChaCha20Rng,
    ) -> IsolationNode {
        if depth >= height_limit || indices.len() <= 1 {
            return IsolationNode::Leaf { size: indices.len() };
        }

        // Features that still vary inside this node
        let mut candidates = Vec::with_capacity(FEATURE_COUNT);
        for feature in 0..FEATURE_COUNT {
            let (min, max) = feature_range(rows, &indices, feature);
            if max > min {
                candidates.push((feature, min, max));
            }
        }

        if candidates.is_empty() {
            return IsolationNode::Leaf { size: indices.len() };
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(min..max);

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| rows[i][feature] < threshold);

        IsolationNode::Split {
            feature,
            threshold,
            left: Box::new(Self::build(rows, left, depth + 1, height_limit, rng)),
            right: Box::new(Self::build(rows, right, depth + 1, height_limit, rng)),
        }
    }

    /// Path length for a point, including the expected depth below the leaf
    fn path_length(&self, point: &[f64; FEATURE_COUNT]) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                IsolationNode::Leaf { size } => return depth + average_path_length(*size),
                IsolationNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

fn feature_range(rows: &[[f64; FEATURE_COUNT]], indices: &[usize], feature: usize) -> (f64, f64) {
    indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &i| {
        let v = rows[i][feature];
        (min.min(v), max.max(v))
    })
}

/// Average path length of an unsuccessful BST search over `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated quantile of unsorted values, `q` in [0, 1]
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// The trained anomaly model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyModel {
    /// Feature names the model was trained on, in order
    pub feature_names: Vec<String>,
    pub params: ForestParams,
    /// Sub-sample size actually used per tree
    pub sample_size: usize,
    /// Number of rows in the training matrix
    pub training_rows: usize,
    /// Scores strictly above this are anomalous
    pub threshold: f64,
    pub trained_at: DateTime<Utc>,
    trees: Vec<IsolationNode>,
}

impl AnomalyModel {
    /// Fit an isolation forest to a feature matrix.
    ///
    /// Row order does not matter beyond the seeded sub-sampling.
    pub fn fit(
        rows: &[[f64; FEATURE_COUNT]],
        params: ForestParams,
        trained_at: DateTime<Utc>,
    ) -> Result<Self> {
        params.validate()?;
        if rows.is_empty() {
            return Err(SurveillanceError::Training("training matrix is empty".into()));
        }

        let sample_size = params.max_samples.min(rows.len());
        let height_limit = (sample_size as f64).log2().ceil().max(0.0) as usize;
        let mut rng = ChaCha20Rng::seed_from_u64(params.seed);

        let trees: Vec<IsolationNode> = (0..params.n_trees)
            .map(|_| {
                let indices = sample(&mut rng, rows.len(), sample_size).into_vec();
                IsolationNode::build(rows, indices, 0, height_limit, &mut rng)
            })
            .collect();

        let mut model = AnomalyModel {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            params,
            sample_size,
            training_rows: rows.len(),
            threshold: 0.0,
            trained_at,
            trees,
        };

        let scores: Vec<f64> = rows.iter().map(|r| model.score_features(r)).collect();
        model.threshold = quantile(&scores, 1.0 - params.contamination);

        tracing::info!(
            trees = model.trees.len(),
            sample_size,
            training_rows = rows.len(),
            threshold = model.threshold,
            "isolation forest trained"
        );

        Ok(model)
    }

    /// Anomaly score in (0, 1]; higher means more isolated
    pub fn score_features(&self, point: &[f64; FEATURE_COUNT]) -> f64 {
        let normaliser = average_path_length(self.sample_size);
        if normaliser == 0.0 || self.trees.is_empty() {
            // Degenerate forest: every point looks the same
            return 0.5;
        }
        let mean_path: f64 = self.trees.iter().map(|t| t.path_length(point)).sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / normaliser)
    }

    /// Anomaly score of a feature vector
    pub fn anomaly_score(&self, vector: &DistrictDayFeatureVector) -> f64 {
        self.score_features(&vector.to_features())
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl AnomalyClassifier for AnomalyModel {
    fn classify(&self, vector: &DistrictDayFeatureVector) -> bool {
        self.anomaly_score(vector) > self.threshold
    }
}

/// Classifier with a fixed answer, for dry runs and tests
#[derive(Debug, Clone, Copy)]
pub struct FixedClassifier(pub bool);

impl AnomalyClassifier for FixedClassifier {
    fn classify(&self, _vector: &DistrictDayFeatureVector) -> bool {
        self.0
    }
}
