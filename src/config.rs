//! Model and training configuration.
//!
//! Both configs are plain data with chainable `with_*` builders and
//! serde derives so callers can load them from files. Training
//! hyperparameters that span orders of magnitude (init scale, learning
//! rate, Adam decay rates) are kept in log-space and exponentiated at
//! the point of use, which keeps them friendly to log-uniform
//! hyperparameter search done by outer tooling.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default atom feature width from the standard molecular featurizer
/// (element one-hot, degree, charge, hybridization, aromaticity).
pub const DEFAULT_NUM_ATOM_FEATURES: usize = 62;

/// Default bond feature width (bond order one-hot, conjugation, ring).
pub const DEFAULT_NUM_BOND_FEATURES: usize = 6;

/// Highest atom degree with a dedicated neighbor filter.
pub const DEFAULT_MAX_DEGREE: usize = 5;

/// Architecture of the fingerprint and prediction networks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Fingerprint dimension (default: 512).
    pub fp_length: usize,
    /// Hidden atom-feature width per message-passing layer (default: 20).
    pub fp_width: usize,
    /// Number of message-passing layers; there are `fp_depth + 1`
    /// readout layers (default: 3).
    pub fp_depth: usize,
    /// Hidden sizes of the prediction head. The realized stack is
    /// `[fp_length] ++ prediction_layer_sizes ++ [1]`.
    pub prediction_layer_sizes: Vec<usize>,
    /// L1 regularization coefficient (default: 0.0).
    pub l1_penalty: f64,
    /// L2 regularization coefficient (default: 0.0).
    pub l2_penalty: f64,
    /// Atom feature width the batch must provide (default: 62).
    pub num_atom_features: usize,
    /// Bond feature width the batch must provide (default: 6).
    pub num_bond_features: usize,
    /// Supported atom degrees are `0..=max_degree`; a batch containing
    /// a higher degree is a configuration error (default: 5).
    pub max_degree: usize,
    /// Radius for the fixed (hashed) fingerprint path. Recognized for
    /// config compatibility; the neural path does not read it.
    pub fp_radius: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            fp_length: 512,
            fp_width: 20,
            fp_depth: 3,
            prediction_layer_sizes: vec![100],
            l1_penalty: 0.0,
            l2_penalty: 0.0,
            num_atom_features: DEFAULT_NUM_ATOM_FEATURES,
            num_bond_features: DEFAULT_NUM_BOND_FEATURES,
            max_degree: DEFAULT_MAX_DEGREE,
            fp_radius: 4,
        }
    }
}

impl ModelConfig {
    pub fn with_fp_length(mut self, fp_length: usize) -> Self {
        self.fp_length = fp_length;
        self
    }

    pub fn with_fp_width(mut self, fp_width: usize) -> Self {
        self.fp_width = fp_width;
        self
    }

    pub fn with_fp_depth(mut self, fp_depth: usize) -> Self {
        self.fp_depth = fp_depth;
        self
    }

    pub fn with_prediction_layer_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.prediction_layer_sizes = sizes;
        self
    }

    pub fn with_l1_penalty(mut self, l1_penalty: f64) -> Self {
        self.l1_penalty = l1_penalty;
        self
    }

    pub fn with_l2_penalty(mut self, l2_penalty: f64) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    pub fn with_atom_features(mut self, num_atom_features: usize) -> Self {
        self.num_atom_features = num_atom_features;
        self
    }

    pub fn with_bond_features(mut self, num_bond_features: usize) -> Self {
        self.num_bond_features = num_bond_features;
        self
    }

    pub fn with_max_degree(mut self, max_degree: usize) -> Self {
        self.max_degree = max_degree;
        self
    }

    /// Atom-feature width entering message-passing layer `layer`.
    pub fn layer_input_width(&self, layer: usize) -> usize {
        if layer == 0 {
            self.num_atom_features
        } else {
            self.fp_width
        }
    }

    /// Layer sizes of the prediction head, input through scalar output.
    pub fn prediction_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.prediction_layer_sizes.len() + 2);
        sizes.push(self.fp_length);
        sizes.extend_from_slice(&self.prediction_layer_sizes);
        sizes.push(1);
        sizes
    }

    /// Reject configurations that cannot form a network.
    pub fn validate(&self) -> Result<()> {
        if self.fp_length == 0 {
            return Err(Error::InvalidConfig("fp_length must be positive".into()));
        }
        if self.fp_width == 0 {
            return Err(Error::InvalidConfig("fp_width must be positive".into()));
        }
        if self.num_atom_features == 0 {
            return Err(Error::InvalidConfig(
                "num_atom_features must be positive".into(),
            ));
        }
        if self.prediction_layer_sizes.iter().any(|&s| s == 0) {
            return Err(Error::InvalidConfig(
                "prediction_layer_sizes must be positive".into(),
            ));
        }
        if !self.l1_penalty.is_finite() || !self.l2_penalty.is_finite() {
            return Err(Error::InvalidConfig(
                "regularization penalties must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// Optimization hyperparameters, all log-space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Log of the initialization standard deviation (default: -4).
    pub log_init_scale: f64,
    /// Log of the Adam learning rate (default: -6).
    pub log_learning_rate: f64,
    /// Log of Adam's first-moment decay, i.e. `ln(beta1)`
    /// (default: `ln(0.9)`).
    pub log_b1: f64,
    /// Log of Adam's second-moment decay, i.e. `ln(beta2)`
    /// (default: `ln(0.999)`).
    pub log_b2: f64,
    /// Random seed for parameter initialization (default: 42).
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            log_init_scale: -4.0,
            log_learning_rate: -6.0,
            log_b1: 0.9f64.ln(),
            log_b2: 0.999f64.ln(),
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn with_log_init_scale(mut self, log_init_scale: f64) -> Self {
        self.log_init_scale = log_init_scale;
        self
    }

    pub fn with_log_learning_rate(mut self, log_learning_rate: f64) -> Self {
        self.log_learning_rate = log_learning_rate;
        self
    }

    pub fn with_log_b1(mut self, log_b1: f64) -> Self {
        self.log_b1 = log_b1;
        self
    }

    pub fn with_log_b2(mut self, log_b2: f64) -> Self {
        self.log_b2 = log_b2;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Initialization standard deviation in linear space.
    pub fn init_scale(&self) -> f64 {
        self.log_init_scale.exp()
    }
}
