//! Neural fingerprint network.
//!
//! Maps a [`GraphBatch`] to one fixed-length vector per substance by
//! alternating two steps over `fp_depth + 1` layers:
//!
//! - **Readout**: project the current atom features through the layer's
//!   output weights, softmax row-wise, and pool per-atom outputs into
//!   per-substance sums through the membership matrix. Every layer's
//!   readout is added into the fingerprint accumulator, so shallow
//!   substructure and deep substructure both contribute.
//! - **Update**: message passing. Each atom combines its own features
//!   (self filter) with the sum of its neighbors' atom+bond features
//!   projected through the filter for its degree, then the result is
//!   batch-normalized and rectified.
//!
//! Neighbor aggregation sums over the neighbor axis, so the output is
//! invariant to neighbor order within a degree bucket. Degree-0 atoms
//! contribute a zero neighbor term (the sum over an empty neighbor set).
//!
//! ```text
//! h_i^{(l+1)} = ReLU(BN(h_i^{(l)} W_self + (Σ_j [h_j^{(l)} ‖ e_ij]) W_deg(i) + b))
//! fp          = Σ_l pool(softmax(h^{(l)} W_out^{(l)} + b_out^{(l)}))
//! ```

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::graph::GraphBatch;
use crate::ops::{batch_normalize, NORM_EPSILON};
use crate::params::{ParamKey, ParamStore};
use candle_core::{DType, Tensor, D};
use candle_nn::ops::softmax;

/// The message-passing fingerprint network.
///
/// Borrows the parameter store and config; owns no state, so one
/// instance can serve any number of forward passes.
pub struct FingerprintNetwork<'a> {
    params: &'a ParamStore,
    config: &'a ModelConfig,
}

impl<'a> FingerprintNetwork<'a> {
    pub fn new(params: &'a ParamStore, config: &'a ModelConfig) -> Self {
        Self { params, config }
    }

    /// Compute per-substance fingerprints, `[n_substances, fp_length]`.
    pub fn forward(&self, batch: &GraphBatch) -> Result<Tensor> {
        self.check_batch(batch)?;

        let mut atoms = batch.atom_features().clone();
        let mut fps = self.readout(0, &atoms, batch)?;
        for layer in 0..self.config.fp_depth {
            atoms = self.update(layer, &atoms, batch)?;
            fps = (fps + self.readout(layer + 1, &atoms, batch)?)?;
        }
        Ok(fps)
    }

    /// Shape compatibility between the batch and the configured model.
    fn check_batch(&self, batch: &GraphBatch) -> Result<()> {
        if batch.atom_width() != self.config.num_atom_features {
            return Err(Error::InvalidBatch(format!(
                "batch atom feature width {} does not match model ({})",
                batch.atom_width(),
                self.config.num_atom_features
            )));
        }
        if batch.n_bonds() > 0 && batch.bond_width() != self.config.num_bond_features {
            return Err(Error::InvalidBatch(format!(
                "batch bond feature width {} does not match model ({})",
                batch.bond_width(),
                self.config.num_bond_features
            )));
        }
        if batch.max_degree() > self.config.max_degree {
            return Err(Error::InvalidConfig(format!(
                "batch contains degree {} but the model allocates filters up to degree {}",
                batch.max_degree(),
                self.config.max_degree
            )));
        }
        Ok(())
    }

    /// Project, softmax, and pool one layer's atom features into
    /// per-substance fingerprint contributions.
    fn readout(&self, layer: usize, atoms: &Tensor, batch: &GraphBatch) -> Result<Tensor> {
        let weights = self.params.get(ParamKey::OutputWeights { layer })?;
        let bias = self.params.get(ParamKey::OutputBias { layer })?;
        let hidden = atoms.matmul(weights)?.broadcast_add(bias)?;
        let atom_outputs = softmax(&hidden, D::Minus1)?;
        Ok(batch.pooling().matmul(&atom_outputs)?)
    }

    /// One message-passing step: self + neighbor activations, bias,
    /// batch normalization, ReLU.
    fn update(&self, layer: usize, atoms: &Tensor, batch: &GraphBatch) -> Result<Tensor> {
        let self_filter = self.params.get(ParamKey::SelfFilter { layer })?;
        let bias = self.params.get(ParamKey::LayerBias { layer })?;

        let self_activations = atoms.matmul(self_filter)?;
        let neighbor_activations = self.neighbor_activations(layer, atoms, batch)?;
        let activations = (self_activations + neighbor_activations)?.broadcast_add(bias)?;
        let activations = batch_normalize(&activations, NORM_EPSILON)?;
        Ok(activations.relu()?)
    }

    /// Per-degree neighbor aggregation, restored to original atom order.
    ///
    /// For each bucket: gather neighbor atom and bond features, concat
    /// on the feature axis, sum over the neighbor axis, and project
    /// through that degree's filter. Degree-0 buckets yield a zero
    /// block. The bucket results are concatenated and un-permuted with
    /// the batch's inverse index, so the rows line up with `atoms`.
    fn neighbor_activations(
        &self,
        layer: usize,
        atoms: &Tensor,
        batch: &GraphBatch,
    ) -> Result<Tensor> {
        let in_width = atoms.dim(1)?;
        let out_width = self.config.fp_width;

        let mut by_bucket = Vec::with_capacity(batch.buckets().len());
        for bucket in batch.buckets() {
            if bucket.degree == 0 {
                by_bucket.push(Tensor::zeros(
                    (bucket.count, out_width),
                    DType::F32,
                    atoms.device(),
                )?);
                continue;
            }
            let atom_gather = bucket
                .atom_gather
                .as_ref()
                .ok_or_else(|| Error::InvalidBatch("bucket missing gather indices".into()))?;
            let bond_gather = bucket
                .bond_gather
                .as_ref()
                .ok_or_else(|| Error::InvalidBatch("bucket missing gather indices".into()))?;

            let neighbor_atoms = atoms
                .index_select(atom_gather, 0)?
                .reshape((bucket.count, bucket.degree, in_width))?;
            let neighbor_bonds = batch
                .bond_features()
                .index_select(bond_gather, 0)?
                .reshape((bucket.count, bucket.degree, batch.bond_width()))?;

            let stacked = Tensor::cat(&[neighbor_atoms, neighbor_bonds], 2)?;
            let summed = stacked.sum(1)?;
            let filter = self.params.get(ParamKey::DegreeFilter {
                layer,
                degree: bucket.degree,
            })?;
            by_bucket.push(summed.matmul(filter)?);
        }

        let concatenated = Tensor::cat(&by_bucket, 0)?;
        Ok(concatenated.index_select(batch.scatter(), 0)?)
    }
}
