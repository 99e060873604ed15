//! Loss assembly: de-normalization, RMSE, and regularization.

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::params::ParamStore;
use candle_core::Tensor;

/// Forward-pass outputs the training-loop collaborator consumes.
#[derive(Debug)]
pub struct LossOutput {
    /// De-normalized predictions in label units, `[n_substances]`.
    pub predictions: Tensor,
    /// Scalar training loss: RMSE plus L1/L2 penalties.
    pub loss: Tensor,
}

/// Turns normalized predictions and ground-truth labels into the
/// training loss.
///
/// The prediction head works in normalized label space; this network
/// computes the label batch's mean and (biased) standard deviation,
/// rescales predictions into label units, and assembles
/// `RMSE + l2_penalty * l2_loss + l1_penalty * l1_loss` with the
/// penalty accumulators read from the parameter store.
pub struct LossNetwork<'a> {
    params: &'a ParamStore,
    config: &'a ModelConfig,
}

impl<'a> LossNetwork<'a> {
    pub fn new(params: &'a ParamStore, config: &'a ModelConfig) -> Self {
        Self { params, config }
    }

    /// De-normalize predictions against `labels` and compute the loss.
    ///
    /// A zero-variance label batch cannot define the rescaling and is
    /// rejected with [`Error::DegenerateLabels`].
    pub fn forward(&self, normed_predictions: &Tensor, labels: &Tensor) -> Result<LossOutput> {
        let n = labels.dim(0)?;
        if normed_predictions.dim(0)? != n {
            return Err(Error::InvalidBatch(format!(
                "{} predictions for {n} labels",
                normed_predictions.dim(0)?
            )));
        }

        let mean = labels.mean_keepdim(0)?;
        let centered = labels.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(0)?;
        if variance.reshape(())?.to_scalar::<f32>()? <= 0.0 {
            return Err(Error::DegenerateLabels);
        }
        let std = variance.sqrt()?;

        let predictions = normed_predictions
            .broadcast_mul(&std)?
            .broadcast_add(&mean)?;

        let rmse = (predictions.clone() - labels)?.sqr()?.mean_all()?.sqrt()?;
        let l2_term = (self.params.l2_loss()? * self.config.l2_penalty)?;
        let l1_term = (self.params.l1_loss()? * self.config.l1_penalty)?;
        let loss = ((rmse + l2_term)? + l1_term)?;

        Ok(LossOutput { predictions, loss })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use candle_core::Device;

    fn setup(l1: f64, l2: f64) -> (ParamStore, ModelConfig) {
        let config = ModelConfig::default()
            .with_fp_length(3)
            .with_fp_width(2)
            .with_fp_depth(1)
            .with_atom_features(2)
            .with_prediction_layer_sizes(vec![2])
            .with_l1_penalty(l1)
            .with_l2_penalty(l2);
        let store =
            ParamStore::for_model(&config, &TrainingConfig::default(), &Device::Cpu).unwrap();
        (store, config)
    }

    #[test]
    fn test_perfect_normalized_predictions_give_zero_rmse() {
        let device = Device::Cpu;
        let (store, config) = setup(0.0, 0.0);
        let net = LossNetwork::new(&store, &config);

        let labels = Tensor::from_vec(vec![1.0f32, 2.0, 3.0], 3, &device).unwrap();
        // Normalized labels de-normalize back to the labels themselves.
        let mean = 2.0f32;
        let std = (2.0f32 / 3.0).sqrt();
        let normed: Vec<f32> = [1.0f32, 2.0, 3.0].iter().map(|l| (l - mean) / std).collect();
        let normed = Tensor::from_vec(normed, 3, &device).unwrap();

        let out = net.forward(&normed, &labels).unwrap();
        let loss = out.loss.to_scalar::<f32>().unwrap();
        assert!(loss.abs() < 1e-5, "expected ~0 loss, got {loss}");

        let preds = out.predictions.to_vec1::<f32>().unwrap();
        for (p, l) in preds.iter().zip([1.0f32, 2.0, 3.0]) {
            assert!((p - l).abs() < 1e-5);
        }
    }

    #[test]
    fn test_penalties_enter_the_loss() {
        let device = Device::Cpu;
        let (store, config) = setup(0.5, 0.25);
        let net = LossNetwork::new(&store, &config);

        let labels = Tensor::from_vec(vec![0.0f32, 1.0], 2, &device).unwrap();
        let normed = Tensor::from_vec(vec![-1.0f32, 1.0], 2, &device).unwrap();

        let loss = net
            .forward(&normed, &labels)
            .unwrap()
            .loss
            .to_scalar::<f32>()
            .unwrap();

        let l1 = store.l1_loss().unwrap().to_scalar::<f32>().unwrap();
        let l2 = store.l2_loss().unwrap().to_scalar::<f32>().unwrap();
        // normed [-1, 1] de-normalizes exactly onto the labels, so the
        // whole loss is regularization.
        let expected = 0.25 * l2 + 0.5 * l1;
        assert!(
            (loss - expected).abs() < 1e-5,
            "loss {loss} vs penalties {expected}"
        );
    }

    #[test]
    fn test_zero_variance_labels_rejected() {
        let device = Device::Cpu;
        let (store, config) = setup(0.0, 0.0);
        let net = LossNetwork::new(&store, &config);

        let labels = Tensor::from_vec(vec![2.0f32, 2.0, 2.0], 3, &device).unwrap();
        let normed = Tensor::from_vec(vec![0.0f32, 0.0, 0.0], 3, &device).unwrap();
        assert!(matches!(
            net.forward(&normed, &labels),
            Err(Error::DegenerateLabels)
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let device = Device::Cpu;
        let (store, config) = setup(0.0, 0.0);
        let net = LossNetwork::new(&store, &config);

        let labels = Tensor::from_vec(vec![1.0f32, 2.0], 2, &device).unwrap();
        let normed = Tensor::from_vec(vec![0.0f32; 3], 3, &device).unwrap();
        assert!(matches!(
            net.forward(&normed, &labels),
            Err(Error::InvalidBatch(_))
        ));
    }
}
