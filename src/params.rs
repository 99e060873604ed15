//! Parameter store for the fingerprint and prediction networks.
//!
//! All learnable tensors live here, addressed by a typed [`ParamKey`]
//! rather than concatenated strings, so a typo'd layer index or degree
//! is a compile error or a fail-fast lookup error instead of a silent
//! shape mismatch. Allocation draws from a seeded RNG, which makes two
//! stores built from the same configs bitwise-identical.
//!
//! Every allocation is registered for regularization: [`ParamStore::l2_loss`]
//! and [`ParamStore::l1_loss`] return scalar tensors equal to the sum of
//! squares / absolute values over every allocated tensor. They are built
//! from the live variables, so the penalty both tracks optimizer updates
//! and contributes gradients when added to a loss.

use crate::config::{ModelConfig, TrainingConfig};
use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor, Var};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Uniform};
use std::collections::HashMap;
use std::fmt;

/// Address of a learnable tensor: component, layer, role, and (for
/// neighbor filters) degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    /// Readout projection for fingerprint layer `layer`
    /// (`[layer_input_width, fp_length]`).
    OutputWeights { layer: usize },
    /// Readout bias for fingerprint layer `layer` (`[fp_length]`).
    OutputBias { layer: usize },
    /// Message-passing bias for layer `layer` (`[fp_width]`).
    LayerBias { layer: usize },
    /// Same-layer atom transform for layer `layer`
    /// (`[layer_input_width, fp_width]`).
    SelfFilter { layer: usize },
    /// Degree-independent neighbor transform for layer `layer`
    /// (`[layer_input_width + num_bond_features, fp_width]`).
    NeighborFilter { layer: usize },
    /// Neighbor transform for atoms of degree `degree` at layer `layer`
    /// (same shape as [`ParamKey::NeighborFilter`]).
    DegreeFilter { layer: usize, degree: usize },
    /// Prediction-head projection for head layer `layer`.
    PredictionWeights { layer: usize },
    /// Prediction-head bias for head layer `layer`.
    PredictionBias { layer: usize },
}

impl fmt::Display for ParamKey {
    /// Stable hierarchical path, used by checkpointing collaborators.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::OutputWeights { layer } => {
                write!(f, "fingerprint/layer_{layer}/output_weights")
            }
            ParamKey::OutputBias { layer } => {
                write!(f, "fingerprint/layer_{layer}/output_bias")
            }
            ParamKey::LayerBias { layer } => write!(f, "fingerprint/layer_{layer}/bias"),
            ParamKey::SelfFilter { layer } => {
                write!(f, "fingerprint/layer_{layer}/self_filter")
            }
            ParamKey::NeighborFilter { layer } => {
                write!(f, "fingerprint/layer_{layer}/neighbor_filter")
            }
            ParamKey::DegreeFilter { layer, degree } => {
                write!(f, "fingerprint/layer_{layer}/neighbor_filter_degree_{degree}")
            }
            ParamKey::PredictionWeights { layer } => {
                write!(f, "prediction/layer_{layer}/weights")
            }
            ParamKey::PredictionBias { layer } => {
                write!(f, "prediction/layer_{layer}/bias")
            }
        }
    }
}

/// Initial-value distribution for an allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// Zero-mean normal with the store's standard deviation.
    Normal,
    /// Symmetric uniform over `[-scale, scale]` with the store's scale.
    Uniform,
}

/// Owns every learnable tensor of a model.
pub struct ParamStore {
    entries: Vec<(ParamKey, Var)>,
    index: HashMap<ParamKey, usize>,
    rng: ChaCha8Rng,
    init_scale: f64,
    device: Device,
}

impl ParamStore {
    /// Empty store drawing initial values at `exp(log_init_scale)`.
    pub fn new(training: &TrainingConfig, device: &Device) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(training.seed),
            init_scale: training.init_scale(),
            device: device.clone(),
        }
    }

    /// Build a store holding the full parameter set for `model`.
    ///
    /// The allocation plan, in order:
    /// 1. readout weights + bias for every layer `0..=fp_depth`;
    /// 2. per message-passing layer `0..fp_depth`: bias, self filter,
    ///    degree-independent neighbor filter, and one neighbor filter
    ///    per degree `0..=max_degree`;
    /// 3. prediction-head weights + bias over
    ///    `[fp_length] ++ prediction_layer_sizes ++ [1]`.
    pub fn for_model(
        model: &ModelConfig,
        training: &TrainingConfig,
        device: &Device,
    ) -> Result<Self> {
        model.validate()?;
        let mut store = Self::new(training, device);

        for layer in 0..=model.fp_depth {
            let in_width = model.layer_input_width(layer);
            store.allocate(
                ParamKey::OutputWeights { layer },
                &[in_width, model.fp_length],
            )?;
            store.allocate(ParamKey::OutputBias { layer }, &[model.fp_length])?;
        }

        for layer in 0..model.fp_depth {
            let in_width = model.layer_input_width(layer);
            let filter_shape = [in_width + model.num_bond_features, model.fp_width];
            store.allocate(ParamKey::LayerBias { layer }, &[model.fp_width])?;
            store.allocate(ParamKey::SelfFilter { layer }, &[in_width, model.fp_width])?;
            store.allocate(ParamKey::NeighborFilter { layer }, &filter_shape)?;
            for degree in 0..=model.max_degree {
                store.allocate(ParamKey::DegreeFilter { layer, degree }, &filter_shape)?;
            }
        }

        let sizes = model.prediction_sizes();
        for layer in 0..sizes.len() - 1 {
            store.allocate(
                ParamKey::PredictionWeights { layer },
                &[sizes[layer], sizes[layer + 1]],
            )?;
            store.allocate(ParamKey::PredictionBias { layer }, &[sizes[layer + 1]])?;
        }

        Ok(store)
    }

    /// Allocate a tensor with the default normal initializer.
    pub fn allocate(&mut self, key: ParamKey, shape: &[usize]) -> Result<Tensor> {
        self.allocate_with(key, shape, Init::Normal)
    }

    /// Allocate a named tensor, drawing initial values from `init`.
    ///
    /// Fails fast on a duplicate key; the tensor is registered for L1/L2
    /// regularization as a side effect.
    pub fn allocate_with(&mut self, key: ParamKey, shape: &[usize], init: Init) -> Result<Tensor> {
        if self.index.contains_key(&key) {
            return Err(Error::DuplicateParam { key });
        }

        let count: usize = shape.iter().product();
        let mut data = Vec::with_capacity(count);
        match init {
            Init::Normal => {
                let dist = Normal::new(0.0, self.init_scale)
                    .map_err(|e| Error::InvalidConfig(format!("bad init scale: {e}")))?;
                for _ in 0..count {
                    data.push(dist.sample(&mut self.rng) as f32);
                }
            }
            Init::Uniform => {
                let dist = Uniform::new_inclusive(-self.init_scale, self.init_scale);
                for _ in 0..count {
                    data.push(dist.sample(&mut self.rng) as f32);
                }
            }
        }

        let tensor = Tensor::from_vec(data, shape, &self.device)?;
        let var = Var::from_tensor(&tensor)?;
        let out = var.as_tensor().clone();
        self.index.insert(key, self.entries.len());
        self.entries.push((key, var));
        Ok(out)
    }

    /// Look up a parameter. Missing keys surface as a fatal
    /// configuration error.
    pub fn get(&self, key: ParamKey) -> Result<&Tensor> {
        self.index
            .get(&key)
            .map(|&i| self.entries[i].1.as_tensor())
            .ok_or(Error::MissingParam { key })
    }

    /// Sum of squared entries over every allocated tensor, as a scalar
    /// tensor in the autograd graph.
    pub fn l2_loss(&self) -> Result<Tensor> {
        let mut total = Tensor::zeros((), DType::F32, &self.device)?;
        for (_, var) in &self.entries {
            total = (total + var.as_tensor().sqr()?.sum_all()?)?;
        }
        Ok(total)
    }

    /// Sum of absolute entries over every allocated tensor, as a scalar
    /// tensor in the autograd graph.
    pub fn l1_loss(&self) -> Result<Tensor> {
        let mut total = Tensor::zeros((), DType::F32, &self.device)?;
        for (_, var) in &self.entries {
            total = (total + var.as_tensor().abs()?.sum_all()?)?;
        }
        Ok(total)
    }

    /// Variables for the optimizer, in allocation order.
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Iterate parameters in allocation order (checkpointing surface).
    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &Var)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Number of allocated tensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Device all parameters live on.
    pub fn device(&self) -> &Device {
        &self.device
    }
}
