//! Training driver: one gradient step per call.
//!
//! The networks themselves are pure; all parameter mutation happens
//! here, between forward passes, through candle's AdamW. Learning rate
//! and the two decay coefficients arrive in log-space (see
//! [`TrainingConfig`]) and are exponentiated when the optimizer is
//! built. Weight decay stays at zero: L1/L2 regularization is explicit
//! in the loss, not folded into the update rule.

use crate::config::{ModelConfig, TrainingConfig};
use crate::error::Result;
use crate::fingerprint::FingerprintNetwork;
use crate::graph::GraphBatch;
use crate::loss::{LossNetwork, LossOutput};
use crate::params::ParamStore;
use crate::prediction::PredictionNetwork;
use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

/// Interval between progress lines on stderr.
const REPORT_EVERY: usize = 10;

/// Result of one training step.
#[derive(Debug, Clone)]
pub struct StepMetrics {
    /// Scalar loss before the parameter update.
    pub loss: f32,
    /// De-normalized predictions, one per substance.
    pub predictions: Vec<f32>,
    /// Step counter after this update.
    pub step: usize,
}

/// Owns the parameter store and optimizer; runs forward passes and
/// gradient steps.
pub struct Trainer {
    model: ModelConfig,
    params: ParamStore,
    optimizer: AdamW,
    step: usize,
    loss_history: Vec<f32>,
}

impl Trainer {
    /// Allocate parameters for `model` and build the optimizer.
    pub fn new(model: ModelConfig, training: TrainingConfig, device: &Device) -> Result<Self> {
        model.validate()?;
        let params = ParamStore::for_model(&model, &training, device)?;
        let optimizer = AdamW::new(
            params.trainable_vars(),
            ParamsAdamW {
                lr: training.log_learning_rate.exp(),
                beta1: training.log_b1.exp(),
                beta2: training.log_b2.exp(),
                eps: 1e-8,
                weight_decay: 0.0,
            },
        )?;
        Ok(Self {
            model,
            params,
            optimizer,
            step: 0,
            loss_history: Vec::new(),
        })
    }

    /// Full forward pass without touching parameters.
    pub fn forward(&self, batch: &GraphBatch, labels: &Tensor) -> Result<LossOutput> {
        let fingerprints = FingerprintNetwork::new(&self.params, &self.model).forward(batch)?;
        let normed = PredictionNetwork::new(&self.params, &self.model).forward(&fingerprints)?;
        LossNetwork::new(&self.params, &self.model).forward(&normed, labels)
    }

    /// Normalized predictions for a batch (no labels involved).
    pub fn predict_normalized(&self, batch: &GraphBatch) -> Result<Vec<f32>> {
        let fingerprints = FingerprintNetwork::new(&self.params, &self.model).forward(batch)?;
        let normed = PredictionNetwork::new(&self.params, &self.model).forward(&fingerprints)?;
        Ok(normed.to_vec1::<f32>()?)
    }

    /// Per-substance fingerprints for a batch (feature-extraction surface).
    pub fn fingerprints(&self, batch: &GraphBatch) -> Result<Tensor> {
        FingerprintNetwork::new(&self.params, &self.model).forward(batch)
    }

    /// One forward/backward/update step.
    pub fn train_step(&mut self, batch: &GraphBatch, labels: &Tensor) -> Result<StepMetrics> {
        let out = self.forward(batch, labels)?;
        let grads = out.loss.backward()?;
        self.optimizer.step(&grads)?;
        self.step += 1;

        let loss = out.loss.to_scalar::<f32>()?;
        self.loss_history.push(loss);
        if self.step % REPORT_EVERY == 0 {
            eprintln!("step {}: loss = {loss:.4}", self.step);
        }

        Ok(StepMetrics {
            loss,
            predictions: out.predictions.to_vec1::<f32>()?,
            step: self.step,
        })
    }

    /// Read access to the parameter store (checkpointing surface).
    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    /// Model architecture this trainer was built for.
    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    /// Number of gradient steps taken.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Loss of every step taken so far, in order.
    pub fn loss_history(&self) -> &[f32] {
        &self.loss_history
    }
}
