//! Feed-forward prediction head over fingerprints.

use crate::config::ModelConfig;
use crate::error::Result;
use crate::ops::{batch_normalize, NORM_EPSILON};
use crate::params::{ParamKey, ParamStore};
use candle_core::{Tensor, D};

/// Regresses fingerprints to one normalized scalar per substance.
///
/// The stack runs over `[fp_length] ++ prediction_layer_sizes ++ [1]`:
/// every layer but the last is linear + batch-norm + ReLU; the last is
/// linear only, and the trailing singleton dimension is squeezed away.
/// Outputs are in normalized label space; the loss network rescales
/// them to label units.
pub struct PredictionNetwork<'a> {
    params: &'a ParamStore,
    config: &'a ModelConfig,
}

impl<'a> PredictionNetwork<'a> {
    pub fn new(params: &'a ParamStore, config: &'a ModelConfig) -> Self {
        Self { params, config }
    }

    /// Normalized predictions, `[n_substances]`.
    pub fn forward(&self, fingerprints: &Tensor) -> Result<Tensor> {
        let sizes = self.config.prediction_sizes();
        let mut hidden = fingerprints.clone();
        for layer in 0..sizes.len() - 1 {
            let weights = self.params.get(ParamKey::PredictionWeights { layer })?;
            let bias = self.params.get(ParamKey::PredictionBias { layer })?;
            let activations = hidden.matmul(weights)?.broadcast_add(bias)?;
            if layer < sizes.len() - 2 {
                let activations = batch_normalize(&activations, NORM_EPSILON)?;
                hidden = activations.relu()?;
            } else {
                hidden = activations;
            }
        }
        Ok(hidden.squeeze(D::Minus1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use candle_core::Device;

    #[test]
    fn test_output_is_one_scalar_per_substance() {
        let device = Device::Cpu;
        let config = ModelConfig::default()
            .with_fp_length(6)
            .with_fp_width(3)
            .with_fp_depth(1)
            .with_atom_features(4)
            .with_prediction_layer_sizes(vec![5, 3]);
        let store = ParamStore::for_model(&config, &TrainingConfig::default(), &device).unwrap();
        let net = PredictionNetwork::new(&store, &config);

        let fps = Tensor::randn(0f32, 1f32, (7, 6), &device).unwrap();
        let out = net.forward(&fps).unwrap();
        assert_eq!(out.dims(), &[7]);
        for v in out.to_vec1::<f32>().unwrap() {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn test_final_layer_is_affine() {
        // With an empty hidden stack the head is one affine map, so
        // f(x) + f(-x) = 2 f(0). A trailing ReLU or batch-norm on the
        // last layer would break this identity.
        let device = Device::Cpu;
        let config = ModelConfig::default()
            .with_fp_length(2)
            .with_prediction_layer_sizes(vec![]);
        let training = TrainingConfig::default().with_log_init_scale(0.0);
        let store = ParamStore::for_model(&config, &training, &device).unwrap();
        let net = PredictionNetwork::new(&store, &config);

        let x = Tensor::from_vec(vec![10f32, -3.0], (1, 2), &device).unwrap();
        let neg_x = Tensor::from_vec(vec![-10f32, 3.0], (1, 2), &device).unwrap();
        let zero = Tensor::zeros((1, 2), candle_core::DType::F32, &device).unwrap();

        let f = |t: &Tensor| net.forward(t).unwrap().to_vec1::<f32>().unwrap()[0];
        let lhs = f(&x) + f(&neg_x);
        let rhs = 2.0 * f(&zero);
        assert!((lhs - rhs).abs() < 1e-4, "head is not affine: {lhs} vs {rhs}");
    }
}
