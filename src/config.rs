use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use clap::Parser;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{OrderPrepError, Result};

/// File name of the image-processor config inside a checkpoint directory.
pub const PREPROCESSOR_CONFIG_FILE: &str = "preprocessor_config.json";

/// Side length of the normalized box coordinate space.
pub const BOX_SPACE: u32 = 1000;

/// `{width, height}` pair used for both the pixel canvas and the box space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SizeRepr")]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Size {
    type Err = String;

    /// Accepts `N` (square) or `WxH`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| format!("invalid size component `{v}`: {e}"))
        };
        let size = match s.split_once(['x', 'X']) {
            Some((w, h)) => Self::new(parse(w)?, parse(h)?),
            None => Self::square(parse(s)?),
        };
        if size.width == 0 || size.height == 0 {
            return Err(format!("size must be non-zero, got {size}"));
        }
        Ok(size)
    }
}

// Checkpoint configs store size either as a map or as a `[width, height]` list.
#[derive(Deserialize)]
#[serde(untagged)]
enum SizeRepr {
    Map { width: u32, height: u32 },
    List([u32; 2]),
}

impl From<SizeRepr> for Size {
    fn from(repr: SizeRepr) -> Self {
        match repr {
            SizeRepr::Map { width, height } => Self::new(width, height),
            SizeRepr::List([width, height]) => Self::new(width, height),
        }
    }
}

// Per-channel statistics may be stored as a single scalar.
#[derive(Deserialize)]
#[serde(untagged)]
enum ChannelStats {
    Scalar(f32),
    PerChannel([f32; 3]),
}

fn channel_stats<'de, D>(deserializer: D) -> std::result::Result<[f32; 3], D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match ChannelStats::deserialize(deserializer)? {
        ChannelStats::Scalar(v) => [v; 3],
        ChannelStats::PerChannel(v) => v,
    })
}

/// Base image settings as stored in a checkpoint's `preprocessor_config.json`.
///
/// Unknown keys are ignored; missing keys fall back to the Donut-style defaults.
/// `do_rescale` and `do_normalize` are among the ignored keys: pixels are always
/// rescaled and normalized.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PretrainedImageConfig {
    pub size: Size,
    pub rescale_factor: f32,
    #[serde(deserialize_with = "channel_stats")]
    pub image_mean: [f32; 3],
    #[serde(deserialize_with = "channel_stats")]
    pub image_std: [f32; 3],
    pub patch_size: (u32, u32),
}

impl Default for PretrainedImageConfig {
    fn default() -> Self {
        Self {
            size: Size::new(1920, 2560),
            rescale_factor: 1.0 / 255.0,
            image_mean: [0.5, 0.5, 0.5],
            image_std: [0.5, 0.5, 0.5],
            patch_size: (4, 4),
        }
    }
}

impl PretrainedImageConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| OrderPrepError::FileSystem {
            path: path.to_path_buf(),
            operation: "read preprocessor config".to_string(),
            source: e,
        })?;
        serde_json::from_str(&raw).map_err(|e| OrderPrepError::Configuration {
            message: format!("{}: {e}", path.display()),
        })
    }
}

/// Operational defaults applied on top of a checkpoint's base config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderSettings {
    pub image_size: Size,
    pub max_boxes: usize,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            image_size: Size::square(1024),
            max_boxes: 256,
        }
    }
}

/// Immutable configuration of an [`OrderImageProcessor`](crate::OrderImageProcessor).
///
/// Checked by [`ProcessorConfig::validate`] when the processor is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    /// Target canvas every image is resized to.
    pub size: Size,
    /// Box coordinate space.
    pub box_size: Size,
    pub token_sep_id: u32,
    pub token_pad_id: u32,
    pub max_boxes: usize,
    pub patch_size: (u32, u32),
    pub resample: FilterType,
    pub rescale_factor: f32,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_base(&PretrainedImageConfig::default(), &OrderSettings::default())
    }
}

impl ProcessorConfig {
    /// Combines checkpoint base settings with the operational overrides.
    pub fn from_base(base: &PretrainedImageConfig, settings: &OrderSettings) -> Self {
        let box_size = Size::square(BOX_SPACE);
        Self {
            size: settings.image_size,
            box_size,
            token_sep_id: 257 + box_size.width,
            token_pad_id: 258 + box_size.width,
            max_boxes: settings.max_boxes,
            patch_size: base.patch_size,
            resample: FilterType::Lanczos3,
            rescale_factor: base.rescale_factor,
            image_mean: base.image_mean,
            image_std: base.image_std,
        }
    }

    /// Reads `preprocessor_config.json` from a checkpoint directory and applies `settings`.
    pub fn from_pretrained(checkpoint: impl AsRef<Path>, settings: &OrderSettings) -> Result<Self> {
        let path = checkpoint.as_ref().join(PREPROCESSOR_CONFIG_FILE);
        let base = PretrainedImageConfig::from_file(&path)?;
        info!(path = %path.display(), "loaded preprocessor config");
        let config = Self::from_base(&base, settings);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(OrderPrepError::Configuration { message });

        if self.size.width == 0 || self.size.height == 0 {
            return fail(format!("image size must be non-zero, got {}", self.size));
        }
        if self.box_size.width == 0 || self.box_size.height == 0 {
            return fail(format!("box size must be non-zero, got {}", self.box_size));
        }
        if self.max_boxes == 0 {
            return fail("max_boxes must be greater than 0".to_string());
        }
        // Token ids live in the same value range as coordinates.
        let coord_max = self.box_size.width.max(self.box_size.height);
        if self.token_sep_id <= coord_max || self.token_pad_id <= coord_max {
            return fail(format!(
                "token ids ({}, {}) collide with box coordinates up to {coord_max}",
                self.token_sep_id, self.token_pad_id
            ));
        }
        if self.token_sep_id == self.token_pad_id {
            return fail("separator and pad token ids must differ".to_string());
        }
        if !self.rescale_factor.is_finite() || self.rescale_factor <= 0.0 {
            return fail(format!(
                "rescale_factor must be positive, got {}",
                self.rescale_factor
            ));
        }
        for (i, (&mean, &std)) in self.image_mean.iter().zip(&self.image_std).enumerate() {
            if !mean.is_finite() {
                return fail(format!("image_mean at index {i} is not finite: {mean}"));
            }
            if !std.is_finite() || std <= 0.0 {
                return fail(format!(
                    "image_std at index {i} must be greater than 0, got {std}"
                ));
            }
        }

        debug!(size = %self.size, box_size = %self.box_size, max_boxes = self.max_boxes, "config validated");
        Ok(())
    }
}

/// Command line configuration of the `order-prep` binary.
#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Directory of page images
    pub input_dir: PathBuf,

    /// JSON manifest mapping image paths (relative to input_dir) to box lists
    #[arg(short, long)]
    pub boxes: PathBuf,

    /// Output file; written to stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Checkpoint directory holding preprocessor_config.json
    #[arg(short, long, env = "ORDER_MODEL_CHECKPOINT")]
    pub checkpoint: Option<PathBuf>,

    /// Target canvas, `N` or `WxH`
    #[arg(long, env = "ORDER_IMAGE_SIZE", default_value = "1024")]
    pub image_size: Size,

    #[arg(long, env = "ORDER_MAX_BOXES", default_value_t = 256)]
    pub max_boxes: usize,

    #[arg(long, default_value_t = 8)]
    pub batch_size: usize,

    #[arg(short, long, default_value = "summary", value_parser = check_format)]
    pub format: String,

    #[arg(short, long)]
    pub num_threads: Option<usize>,
}

impl Config {
    pub const fn settings(&self) -> OrderSettings {
        OrderSettings {
            image_size: self.image_size,
            max_boxes: self.max_boxes,
        }
    }
}

const OUTPUT_FORMATS: [&str; 2] = ["json", "summary"];

fn check_format(s: &str) -> std::result::Result<String, String> {
    if OUTPUT_FORMATS.contains(&s) {
        Ok(s.to_string())
    } else {
        Err(format!(
            "{s} is not supported. Supported formats: {}",
            OUTPUT_FORMATS.map(|f| format!("`{f}`")).join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_default_token_ids() {
        let config = ProcessorConfig::default();
        assert_eq!(config.box_size, Size::square(1000));
        assert_eq!(config.token_sep_id, 1257);
        assert_eq!(config.token_pad_id, 1258);
        assert_eq!(config.size, Size::square(1024));
        assert_eq!(config.max_boxes, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_size_from_str() {
        assert_eq!("1024".parse::<Size>(), Ok(Size::square(1024)));
        assert_eq!("640x480".parse::<Size>(), Ok(Size::new(640, 480)));
        assert!("0x480".parse::<Size>().is_err());
        assert!("abc".parse::<Size>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_std() {
        let config = ProcessorConfig {
            image_std: [0.5, 0.0, 0.5],
            ..ProcessorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(OrderPrepError::Configuration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_colliding_tokens() {
        let config = ProcessorConfig {
            token_sep_id: 500,
            ..ProcessorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_pretrained_applies_overrides() -> TestResult {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join(PREPROCESSOR_CONFIG_FILE),
            r#"{
                "size": {"height": 2560, "width": 1920},
                "image_mean": 0.25,
                "image_std": [0.1, 0.2, 0.3],
                "rescale_factor": 0.5,
                "do_align_long_axis": false
            }"#,
        )?;

        let settings = OrderSettings {
            image_size: Size::new(800, 600),
            max_boxes: 64,
        };
        let config = ProcessorConfig::from_pretrained(dir.path(), &settings)?;

        assert_eq!(config.size, Size::new(800, 600));
        assert_eq!(config.max_boxes, 64);
        assert_eq!(config.image_mean, [0.25; 3]);
        assert_eq!(config.image_std, [0.1, 0.2, 0.3]);
        assert_eq!(config.rescale_factor, 0.5);
        assert_eq!(config.patch_size, (4, 4));
        Ok(())
    }

    #[test]
    fn test_pixel_flags_in_checkpoint_are_ignored() -> TestResult {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join(PREPROCESSOR_CONFIG_FILE),
            r#"{"do_rescale": false, "do_normalize": false, "rescale_factor": 0.5}"#,
        )?;
        let config = ProcessorConfig::from_pretrained(dir.path(), &OrderSettings::default())?;
        assert_eq!(config.rescale_factor, 0.5);
        assert_eq!(config.image_mean, [0.5; 3]);
        assert_eq!(config.image_std, [0.5; 3]);
        Ok(())
    }

    #[test]
    fn test_size_list_form() -> Result<()> {
        let base: PretrainedImageConfig = serde_json::from_str(r#"{"size": [640, 480]}"#)?;
        assert_eq!(base.size, Size::new(640, 480));
        Ok(())
    }

    #[test]
    fn test_missing_checkpoint_config() {
        let dir = TempDir::new().unwrap();
        let result = ProcessorConfig::from_pretrained(dir.path(), &OrderSettings::default());
        assert!(matches!(result, Err(OrderPrepError::FileSystem { .. })));
    }

    #[test]
    fn test_check_format() {
        assert!(check_format("json").is_ok());
        assert!(check_format("summary").is_ok());
        assert!(check_format("npy").is_err());
    }
}
