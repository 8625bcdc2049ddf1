pub mod boxes;
pub mod config;
pub mod errors;
pub mod feature;
pub mod imageops;
pub mod input;
pub mod processor;
pub mod traits;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub use boxes::{BBox, PaddedBoxes, TokenBox};
pub use config::{Config, OrderSettings, ProcessorConfig, Size};
pub use errors::{OrderPrepError, Result};
pub use feature::{BatchFeature, NdarrayFeature, ProcessorOutput, ReturnTensors};
pub use input::{ImageInput, PixelArray};
pub use processor::{load_processor, OrderImageProcessor, PreprocessOptions};
pub use traits::*;

/// Boxes per image, keyed by the image path relative to the input directory.
pub type BoxManifest = HashMap<String, Vec<BBox>>;

/// Preprocessed result for one page image.
#[derive(Debug, Clone, Serialize)]
pub struct PageRecord {
    pub path: String,
    pub original_size: (u32, u32),
    pub pixel_shape: Vec<usize>,
    pub pixel_mean: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_values: Option<Vec<f32>>,
    pub input_boxes: Vec<TokenBox>,
    pub input_boxes_mask: Vec<u8>,
    pub input_boxes_count: usize,
}

/// Runs the order processor over every image below `config.input_dir`.
pub struct DirectoryProcessor {
    processor: OrderImageProcessor,
    config: Config,
}

impl DirectoryProcessor {
    pub const fn new(processor: OrderImageProcessor, config: Config) -> Self {
        Self { processor, config }
    }

    pub fn load_manifest(path: &Path) -> Result<BoxManifest> {
        let raw = fs::read_to_string(path).map_err(|e| OrderPrepError::FileSystem {
            path: path.to_path_buf(),
            operation: "read box manifest".to_string(),
            source: e,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Processes all images in batches of `config.batch_size`.
    ///
    /// Pixel data is only kept in the records when `include_pixels` is set.
    pub fn process_directory(
        &self,
        manifest: &BoxManifest,
        include_pixels: bool,
    ) -> Result<Vec<PageRecord>> {
        let input_path = &self.config.input_dir;
        if !input_path.exists() {
            return Err(OrderPrepError::FileSystem {
                path: input_path.clone(),
                operation: "check input directory".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "input directory does not exist",
                ),
            });
        }

        let image_files = self.collect_image_files(input_path);
        if image_files.is_empty() {
            warn!(dir = %input_path.display(), "no images found");
            return Ok(vec![]);
        }

        let keys = image_files
            .iter()
            .map(|path| self.manifest_key(path))
            .collect::<Result<Vec<_>>>()?;
        for unmatched in manifest.keys().filter(|k| !keys.contains(*k)) {
            warn!(key = %unmatched, "manifest entry has no matching image");
        }

        let pb = ProgressBar::new(image_files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| OrderPrepError::Configuration {
                    message: e.to_string(),
                })?
                .progress_chars("#>-"),
        );

        let batch_size = self.config.batch_size.max(1);
        let mut records = Vec::with_capacity(image_files.len());
        for (files, keys) in image_files.chunks(batch_size).zip(keys.chunks(batch_size)) {
            records.extend(self.process_batch(files, keys, manifest, include_pixels)?);
            pb.inc(files.len() as u64);
        }

        pb.finish_and_clear();
        info!(images = records.len(), "preprocessing finished");
        Ok(records)
    }

    fn process_batch(
        &self,
        files: &[PathBuf],
        keys: &[String],
        manifest: &BoxManifest,
        include_pixels: bool,
    ) -> Result<Vec<PageRecord>> {
        let decoded = files
            .par_iter()
            .map(|path| {
                image::open(path).map_err(|e| OrderPrepError::ImageProcessing {
                    path: path.display().to_string(),
                    operation: "decode image".to_string(),
                    source: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let sizes = decoded
            .iter()
            .map(|image| (image.width(), image.height()))
            .collect::<Vec<_>>();
        let images = decoded.into_iter().map(ImageInput::Image).collect::<Vec<_>>();

        let boxes = keys
            .iter()
            .map(|key| {
                manifest.get(key).cloned().unwrap_or_else(|| {
                    debug!(%key, "no boxes in manifest");
                    Vec::new()
                })
            })
            .collect::<Vec<_>>();

        let feature = self.processor.preprocess(&images, &boxes)?;

        let records = sizes
            .into_iter()
            .zip(keys)
            .zip(feature.pixel_values)
            .zip(feature.input_boxes)
            .zip(feature.input_boxes_mask)
            .zip(feature.input_boxes_counts)
            .map(
                |(((((original_size, key), pixels), input_boxes), mask), count)| PageRecord {
                    path: key.clone(),
                    original_size,
                    pixel_shape: pixels.shape().to_vec(),
                    pixel_mean: pixels.mean().unwrap_or_default(),
                    pixel_values: include_pixels.then(|| pixels.iter().copied().collect()),
                    input_boxes,
                    input_boxes_mask: mask,
                    input_boxes_count: count,
                },
            )
            .collect();
        Ok(records)
    }

    fn collect_image_files(&self, input_path: &Path) -> Vec<PathBuf> {
        let mut image_files = WalkDir::new(input_path)
            .into_iter()
            .filter_map(|entry| {
                entry
                    .map_err(|e| warn!(error = %e, "skipping unreadable directory entry"))
                    .ok()
            })
            .map(|e| e.into_path())
            .filter(|path| path.is_file() && self.is_supported_image_format(path))
            .collect::<Vec<_>>();
        image_files.sort();
        image_files
    }

    pub fn is_supported_image_format(&self, path: &Path) -> bool {
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            matches!(
                extension.to_lowercase().as_str(),
                "jpg" | "jpeg" | "png" | "webp" | "bmp" | "gif" | "tiff" | "avif"
            )
        } else {
            false
        }
    }

    pub fn get_relative_path(&self, input_file: &Path) -> Result<PathBuf> {
        let input_dir = &self.config.input_dir;
        input_file
            .strip_prefix(input_dir)
            .map(|p| p.to_path_buf())
            .map_err(|_| OrderPrepError::FileSystem {
                path: input_file.to_path_buf(),
                operation: "relative path".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "file is not inside the input directory",
                ),
            })
    }

    // manifest keys always use `/`
    fn manifest_key(&self, input_file: &Path) -> Result<String> {
        let relative = self.get_relative_path(input_file)?;
        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }
}
