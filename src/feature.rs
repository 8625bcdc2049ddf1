use ndarray::prelude::*;
use ndarray::stack;

use crate::boxes::TokenBox;
use crate::errors::{OrderPrepError, Result};

/// Container the processor output is delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnTensors {
    /// Per-image arrays and plain vectors.
    #[default]
    Native,
    /// Batch-stacked `ndarray` tensors.
    Ndarray,
}

/// Model inputs for one batch, in native form.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFeature {
    /// One `3 × H × W` array per image.
    pub pixel_values: Vec<Array3<f32>>,
    pub input_boxes: Vec<Vec<TokenBox>>,
    pub input_boxes_mask: Vec<Vec<u8>>,
    pub input_boxes_counts: Vec<usize>,
}

/// Model inputs for one batch as stacked tensors.
#[derive(Debug, Clone, PartialEq)]
pub struct NdarrayFeature {
    /// `N × 3 × H × W`
    pub pixel_values: Array4<f32>,
    /// `N × L × 4`
    pub input_boxes: Array3<i64>,
    /// `N × L`
    pub input_boxes_mask: Array2<i64>,
    /// `N`
    pub input_boxes_counts: Array1<i64>,
}

/// What `preprocess_with` hands back, depending on [`ReturnTensors`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorOutput {
    Native(BatchFeature),
    Ndarray(NdarrayFeature),
}

impl BatchFeature {
    pub fn len(&self) -> usize {
        self.pixel_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixel_values.is_empty()
    }

    pub fn convert(self, return_tensors: ReturnTensors) -> Result<ProcessorOutput> {
        Ok(match return_tensors {
            ReturnTensors::Native => ProcessorOutput::Native(self),
            ReturnTensors::Ndarray => ProcessorOutput::Ndarray(self.to_ndarray()?),
        })
    }

    pub fn to_ndarray(&self) -> Result<NdarrayFeature> {
        if self.is_empty() {
            return Err(OrderPrepError::EmptyBatch);
        }
        let n = self.len();

        let views = self.pixel_values.iter().map(|a| a.view()).collect::<Vec<_>>();
        let pixel_values = stack(Axis(0), &views)?;

        let seq_len = self.input_boxes.first().map_or(0, Vec::len);
        let flat_boxes = self
            .input_boxes
            .iter()
            .flatten()
            .flatten()
            .copied()
            .collect::<Vec<i64>>();
        let input_boxes = Array3::from_shape_vec((n, seq_len, 4), flat_boxes)?;

        let flat_mask = self
            .input_boxes_mask
            .iter()
            .flatten()
            .map(|&m| i64::from(m))
            .collect::<Vec<i64>>();
        let input_boxes_mask = Array2::from_shape_vec((n, seq_len), flat_mask)?;

        let input_boxes_counts = self
            .input_boxes_counts
            .iter()
            .map(|&c| c as i64)
            .collect::<Array1<i64>>();

        Ok(NdarrayFeature {
            pixel_values,
            input_boxes,
            input_boxes_mask,
            input_boxes_counts,
        })
    }
}

impl ProcessorOutput {
    pub fn input_boxes_counts(&self) -> Vec<usize> {
        match self {
            Self::Native(feature) => feature.input_boxes_counts.clone(),
            Self::Ndarray(feature) => feature
                .input_boxes_counts
                .iter()
                .map(|&c| c as usize)
                .collect(),
        }
    }

    pub fn into_native(self) -> Option<BatchFeature> {
        match self {
            Self::Native(feature) => Some(feature),
            Self::Ndarray(_) => None,
        }
    }

    pub fn into_ndarray(self) -> Result<NdarrayFeature> {
        match self {
            Self::Native(feature) => feature.to_ndarray(),
            Self::Ndarray(feature) => Ok(feature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> BatchFeature {
        BatchFeature {
            pixel_values: vec![Array3::zeros((3, 2, 2)), Array3::ones((3, 2, 2))],
            input_boxes: vec![
                vec![[9, 9, 9, 9], [1, 2, 3, 4], [7, 7, 7, 7]],
                vec![[5, 6, 7, 8], [1, 1, 1, 1], [7, 7, 7, 7]],
            ],
            input_boxes_mask: vec![vec![0, 1, 1], vec![1, 1, 1]],
            input_boxes_counts: vec![1, 2],
        }
    }

    #[test]
    fn test_to_ndarray_shapes() -> Result<()> {
        let tensors = sample().to_ndarray()?;
        assert_eq!(tensors.pixel_values.shape(), &[2, 3, 2, 2]);
        assert_eq!(tensors.input_boxes.shape(), &[2, 3, 4]);
        assert_eq!(tensors.input_boxes_mask.shape(), &[2, 3]);
        assert_eq!(tensors.input_boxes_counts, array![1, 2]);

        assert_eq!(tensors.input_boxes[[0, 1, 2]], 3);
        assert_eq!(tensors.input_boxes[[1, 0, 3]], 8);
        assert_eq!(tensors.input_boxes_mask[[0, 0]], 0);
        assert_eq!(tensors.pixel_values[[1, 2, 1, 1]], 1.0);
        Ok(())
    }

    #[test]
    fn test_convert_native_is_identity() -> Result<()> {
        let output = sample().convert(ReturnTensors::Native)?;
        assert_eq!(output.input_boxes_counts(), vec![1, 2]);
        assert_eq!(output.into_native(), Some(sample()));
        Ok(())
    }

    #[test]
    fn test_convert_ndarray() -> Result<()> {
        let output = sample().convert(ReturnTensors::Ndarray)?;
        assert!(matches!(output, ProcessorOutput::Ndarray(_)));
        assert_eq!(output.input_boxes_counts(), vec![1, 2]);
        Ok(())
    }

    #[test]
    fn test_mismatched_pixel_shapes_fail() {
        let mut feature = sample();
        feature.pixel_values[1] = Array3::zeros((3, 4, 4));
        assert!(matches!(
            feature.to_ndarray(),
            Err(OrderPrepError::Shape(_))
        ));
    }
}
