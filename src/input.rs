use std::borrow::Cow;

use image::{DynamicImage, GenericImageView};
use ndarray::prelude::*;
use num_traits::{AsPrimitive, Float};

use crate::errors::{OrderPrepError, Result};
use crate::imageops::{chw_to_image, hwc_to_image};

/// One page image in any of the accepted representations.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Decoded image.
    Image(DynamicImage),
    /// `u8` array in height × width × channel layout.
    Array(Array3<u8>),
    /// Float tensor in channel × height × width layout, valued in `[0, 1]`
    /// or integral in `[0, 255]`.
    Tensor(Array3<f32>),
}

impl From<DynamicImage> for ImageInput {
    fn from(image: DynamicImage) -> Self {
        Self::Image(image)
    }
}

impl From<Array3<u8>> for ImageInput {
    fn from(array: Array3<u8>) -> Self {
        Self::Array(array)
    }
}

impl From<Array3<f32>> for ImageInput {
    fn from(tensor: Array3<f32>) -> Self {
        Self::Tensor(tensor)
    }
}

impl ImageInput {
    /// Resolves the input to a decoded image; `index` is only used for error context.
    pub fn to_image(&self, index: usize) -> Result<Cow<'_, DynamicImage>> {
        let invalid = |reason: &str| OrderPrepError::InvalidImage {
            index,
            reason: reason.to_string(),
        };

        match self {
            Self::Image(image) => {
                let (w, h) = image.dimensions();
                if w == 0 || h == 0 {
                    return Err(invalid("image has a zero dimension"));
                }
                Ok(Cow::Borrowed(image))
            }
            Self::Array(hwc) => hwc_to_image(hwc.view())
                .map(Cow::Owned)
                .ok_or_else(|| invalid(&format!("unsupported HWC array shape {:?}", hwc.shape()))),
            Self::Tensor(chw) => {
                let bytes = tensor_to_u8(chw.view()).ok_or_else(|| {
                    invalid("tensor values must lie in [0, 1] or be integers in [0, 255]")
                })?;
                chw_to_image(bytes.view())
                    .map(Cow::Owned)
                    .ok_or_else(|| invalid(&format!("unsupported CHW tensor shape {:?}", chw.shape())))
            }
        }
    }
}

fn tensor_to_u8<T>(tensor: ArrayView3<T>) -> Option<Array3<u8>>
where
    T: Float + AsPrimitive<u8>,
    f32: AsPrimitive<T>,
{
    let (zero, one, max): (T, T, T) = (T::zero(), T::one(), 255.0.as_());
    let scale = if tensor.iter().all(|&v| v >= zero && v <= one) {
        max
    } else if tensor
        .iter()
        .all(|&v| v.fract() == zero && v >= zero && v <= max)
    {
        one
    } else {
        return None;
    };
    Some(tensor.mapv(|v| (v * scale).round().as_()))
}

/// Pixel data handed to the rescale/normalize stage.
#[derive(Debug, Clone)]
pub enum PixelArray {
    /// Rows of pixels, height × width × channel.
    Hwc(Array3<u8>),
    /// Already channel first.
    Chw(Array3<u8>),
}

impl PixelArray {
    pub fn into_chw(self) -> Array3<u8> {
        match self {
            Self::Hwc(hwc) => hwc.permuted_axes([2, 0, 1]),
            Self::Chw(chw) => chw,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Self::Hwc(hwc) => hwc.dim().2,
            Self::Chw(chw) => chw.dim().0,
        }
    }
}
