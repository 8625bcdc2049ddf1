use image::{imageops::FilterType, DynamicImage};
use ndarray::prelude::*;

use crate::config::Size;

/// Basic image transforms used by the preprocessing pipeline.
///
/// Implemented directly by the processor; there is no base type.
pub trait ImageTransforms: Send + Sync {
    /// Shrinks to fit the canvas, then stretches to exactly `size`.
    fn resize(&self, image: &DynamicImage, size: Size, filter: FilterType) -> DynamicImage;

    /// Multiplies every value of a CHW array by `scale`.
    fn rescale(&self, image: Array3<f32>, scale: f32) -> Array3<f32>;

    /// Per-channel `(v - mean) / std` on a CHW array.
    fn normalize(&self, image: Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32>;
}
