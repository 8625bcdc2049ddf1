use std::path::Path;

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    boxes::{pad_boxes, remap_boxes, BBox, PaddedBoxes},
    config::{OrderSettings, ProcessorConfig, Size},
    errors::{OrderPrepError, Result},
    feature::{BatchFeature, ProcessorOutput, ReturnTensors},
    imageops,
    input::{ImageInput, PixelArray},
    traits::ImageTransforms,
};

const RGB_CHANNELS: usize = 3;

/// Per-call overrides of the processor configuration.
#[derive(Debug, Clone, Default)]
pub struct PreprocessOptions {
    pub size: Option<Size>,
    pub resample: Option<FilterType>,
    pub rescale_factor: Option<f32>,
    pub image_mean: Option<[f32; 3]>,
    pub image_std: Option<[f32; 3]>,
    pub return_tensors: ReturnTensors,
}

/// Prepares page images and their layout boxes for the reading-order model.
#[derive(Debug, Clone, Default)]
pub struct OrderImageProcessor {
    config: ProcessorConfig,
}

/// Loads the base config from a checkpoint directory and applies `settings`.
pub fn load_processor(
    checkpoint: impl AsRef<Path>,
    settings: &OrderSettings,
) -> Result<OrderImageProcessor> {
    let config = ProcessorConfig::from_pretrained(checkpoint, settings)?;
    info!(
        size = %config.size,
        max_boxes = config.max_boxes,
        sep = config.token_sep_id,
        pad = config.token_pad_id,
        "order processor ready"
    );
    OrderImageProcessor::new(config)
}

impl OrderImageProcessor {
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Runs the full pipeline with the configured defaults.
    pub fn preprocess(&self, images: &[ImageInput], boxes: &[Vec<BBox>]) -> Result<BatchFeature> {
        self.run(images, boxes, &self.config)
    }

    /// Runs the full pipeline with per-call overrides.
    pub fn preprocess_with(
        &self,
        images: &[ImageInput],
        boxes: &[Vec<BBox>],
        options: &PreprocessOptions,
    ) -> Result<ProcessorOutput> {
        let config = self.resolve(options)?;
        self.run(images, boxes, &config)?.convert(options.return_tensors)
    }

    fn resolve(&self, options: &PreprocessOptions) -> Result<ProcessorConfig> {
        let mut config = self.config.clone();
        if let Some(size) = options.size {
            config.size = size;
        }
        if let Some(resample) = options.resample {
            config.resample = resample;
        }
        if let Some(rescale_factor) = options.rescale_factor {
            config.rescale_factor = rescale_factor;
        }
        if let Some(image_mean) = options.image_mean {
            config.image_mean = image_mean;
        }
        if let Some(image_std) = options.image_std {
            config.image_std = image_std;
        }
        config.validate()?;
        Ok(config)
    }

    fn run(
        &self,
        images: &[ImageInput],
        boxes: &[Vec<BBox>],
        config: &ProcessorConfig,
    ) -> Result<BatchFeature> {
        if images.len() != boxes.len() {
            return Err(OrderPrepError::BatchMismatch {
                images: images.len(),
                boxes: boxes.len(),
            });
        }
        if images.is_empty() {
            return Err(OrderPrepError::EmptyBatch);
        }
        // all limits are checked before any image is decoded or resized
        if let Some((index, count)) = boxes
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|&(_, count)| count > config.max_boxes)
        {
            return Err(OrderPrepError::TooManyBoxes {
                index,
                count,
                max: config.max_boxes,
            });
        }

        let (arrays, remapped): (Vec<_>, Vec<_>) = images
            .par_iter()
            .zip(boxes.par_iter())
            .enumerate()
            .map(|(index, (input, image_boxes))| -> Result<(PixelArray, Vec<BBox>)> {
                let image = input.to_image(index)?;
                let (array, remapped) = self.resize_with(&image, image_boxes, config);
                debug!(index, boxes = remapped.len(), "image resized");
                Ok((PixelArray::Chw(array), remapped))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();

        let pixel_values = self.process_pixels(arrays, config)?;
        let PaddedBoxes {
            boxes: input_boxes,
            mask: input_boxes_mask,
            counts: input_boxes_counts,
        } = self.process_boxes(&remapped);

        debug!(
            batch = pixel_values.len(),
            seq_len = input_boxes.first().map_or(0, Vec::len),
            "batch preprocessed"
        );

        Ok(BatchFeature {
            pixel_values,
            input_boxes,
            input_boxes_mask,
            input_boxes_counts,
        })
    }

    /// Resizes one image to the canvas and maps its boxes into box space.
    ///
    /// Returns the resized image as a CHW `u8` array and the remapped boxes;
    /// `boxes` itself is left untouched.
    pub fn resize_image_and_boxes(
        &self,
        image: &DynamicImage,
        boxes: &[BBox],
    ) -> (Array3<u8>, Vec<BBox>) {
        self.resize_with(image, boxes, &self.config)
    }

    fn resize_with(
        &self,
        image: &DynamicImage,
        boxes: &[BBox],
        config: &ProcessorConfig,
    ) -> (Array3<u8>, Vec<BBox>) {
        let original = image.dimensions();
        let resized = self.resize(image, config.size, config.resample);
        let remapped = remap_boxes(boxes, original, config.box_size);
        (imageops::to_chw_array(&resized), remapped)
    }

    /// Turns `u8` pixel arrays into rescaled and normalized CHW float arrays.
    ///
    /// Every image must carry exactly three channels.
    pub fn process_inner(&self, images: Vec<PixelArray>) -> Result<Vec<Array3<f32>>> {
        self.process_pixels(images, &self.config)
    }

    fn process_pixels(
        &self,
        images: Vec<PixelArray>,
        config: &ProcessorConfig,
    ) -> Result<Vec<Array3<f32>>> {
        if let Some((index, actual)) = images
            .iter()
            .map(PixelArray::channels)
            .enumerate()
            .find(|&(_, channels)| channels != RGB_CHANNELS)
        {
            return Err(OrderPrepError::ChannelCount {
                index,
                expected: RGB_CHANNELS,
                actual,
            });
        }

        Ok(images
            .into_iter()
            .map(|image| {
                let pixels = self.rescale(image.into_chw().mapv(f32::from), config.rescale_factor);
                self.normalize(pixels, &config.image_mean, &config.image_std)
            })
            .collect())
    }

    /// Pads box lists to a common length behind a separator box.
    pub fn process_boxes(&self, boxes: &[Vec<BBox>]) -> PaddedBoxes {
        pad_boxes(
            boxes,
            i64::from(self.config.token_sep_id),
            i64::from(self.config.token_pad_id),
        )
    }
}

impl ImageTransforms for OrderImageProcessor {
    fn resize(&self, image: &DynamicImage, size: Size, filter: FilterType) -> DynamicImage {
        imageops::fit_then_stretch(image, size, filter)
    }

    fn rescale(&self, image: Array3<f32>, scale: f32) -> Array3<f32> {
        image.mapv_into(|v| v * scale)
    }

    fn normalize(&self, mut image: Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
        for (mut channel, (&m, &s)) in image
            .axis_iter_mut(Axis(0))
            .zip(mean.iter().zip(std.iter()))
        {
            channel.mapv_inplace(|v| (v - m) / s);
        }
        image
    }
}
