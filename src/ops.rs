//! Shared tensor helpers.

use candle_core::Tensor;

/// Variance floor used by batch normalization throughout the model.
pub const NORM_EPSILON: f64 = 1e-3;

/// Zero-mean, unit-variance rescaling across the batch axis (dim 0).
///
/// No learned scale or offset; variance is the biased estimate. The
/// epsilon sits inside the square root, so a zero-variance column
/// normalizes to zeros rather than dividing by zero.
pub fn batch_normalize(x: &Tensor, eps: f64) -> candle_core::Result<Tensor> {
    let mean = x.mean_keepdim(0)?;
    let centered = x.broadcast_sub(&mean)?;
    let variance = centered.sqr()?.mean_keepdim(0)?;
    let denom = (variance + eps)?.sqrt()?;
    centered.broadcast_div(&denom)
}
