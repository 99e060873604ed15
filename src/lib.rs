//! Differentiable neural molecular fingerprints.
//!
//! `neuralfp` learns a fixed-length vector embedding ("fingerprint") of
//! a molecule directly from its graph structure, then regresses that
//! embedding against a scalar property through a small feed-forward
//! head. The fingerprint is built by message passing: atoms repeatedly
//! mix their features with their neighbors' atom and bond features, and
//! every layer writes a softmax-pooled readout into the fingerprint
//! accumulator.
//!
//! Batches of variable-size molecules are packed into fixed-shape
//! tensors by bucketing atoms by degree ([`graph::GraphBatch`]), which
//! keeps every neighbor gather rectangular and lets the whole forward
//! pass run as dense tensor ops on candle.
//!
//! # Modules
//!
//! - [`config`]: model architecture + log-space training hyperparameters
//! - [`params`]: typed-key parameter store with L1/L2 accounting
//! - [`graph`]: degree-bucketed batch representation
//! - [`fingerprint`]: message-passing fingerprint network
//! - [`prediction`]: feed-forward regression head
//! - [`loss`]: de-normalization, RMSE, regularization
//! - [`training`]: AdamW driver, one gradient step per call
//!
//! # Example
//!
//! ```rust,ignore
//! use candle_core::{Device, Tensor};
//! use neuralfp::{GraphBatch, ModelConfig, Trainer, TrainingConfig};
//!
//! let device = Device::Cpu;
//! let model = ModelConfig::default()
//!     .with_fp_length(64)
//!     .with_fp_depth(2)
//!     .with_prediction_layer_sizes(vec![32]);
//! let mut trainer = Trainer::new(model, TrainingConfig::default(), &device)?;
//!
//! // Batch produced by a molecule-parsing front end:
//! let batch = GraphBatch::from_adjacency(
//!     &atom_features, &bond_features, 6, &neighbors, &substance_atoms, &device,
//! )?;
//! let labels = Tensor::from_vec(solubilities, n_substances, &device)?;
//!
//! for _ in 0..epochs {
//!     let metrics = trainer.train_step(&batch, &labels)?;
//!     println!("loss = {}", metrics.loss);
//! }
//! ```
//!
//! # Reference
//!
//! Duvenaud et al., "Convolutional Networks on Graphs for Learning
//! Molecular Fingerprints", NeurIPS 2015.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod loss;
pub mod ops;
pub mod params;
pub mod prediction;
pub mod training;

pub use config::{ModelConfig, TrainingConfig};
pub use error::{Error, Result};
pub use fingerprint::FingerprintNetwork;
pub use graph::{DegreeTable, GraphBatch};
pub use loss::{LossNetwork, LossOutput};
pub use params::{Init, ParamKey, ParamStore};
pub use prediction::PredictionNetwork;
pub use training::{StepMetrics, Trainer};
