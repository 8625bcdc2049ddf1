use image::{imageops::FilterType, DynamicImage, GenericImageView};

use crate::config::Size;

/// Size a thumbnail bounded by `max` would have, or `None` when the image
/// already fits and is left untouched.
///
/// Thumbnails never enlarge. The free axis is rounded to whichever of floor
/// or ceil keeps the aspect ratio closest (floor on ties), with a minimum of 1.
pub fn thumbnail_size(width: u32, height: u32, max: Size) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || (max.width >= width && max.height >= height) {
        return None;
    }

    let aspect = f64::from(width) / f64::from(height);
    let (mut x, mut y) = (max.width, max.height);
    if f64::from(x) / f64::from(y) >= aspect {
        x = round_aspect(f64::from(y) * aspect, |n| (aspect - n / f64::from(y)).abs());
    } else {
        y = round_aspect(f64::from(x) / aspect, |n| {
            if n == 0.0 {
                0.0
            } else {
                (aspect - f64::from(x) / n).abs()
            }
        });
    }

    if (x, y) == (width, height) {
        None
    } else {
        Some((x, y))
    }
}

fn round_aspect(number: f64, key: impl Fn(f64) -> f64) -> u32 {
    let (floor, ceil) = (number.floor(), number.ceil());
    let best = if key(ceil) < key(floor) { ceil } else { floor };
    (best as u32).max(1)
}

/// Shrunken copy of `image` with neither side exceeding `max`.
pub fn thumbnail(image: &DynamicImage, max: Size, filter: FilterType) -> DynamicImage {
    let (width, height) = image.dimensions();
    match thumbnail_size(width, height, max) {
        Some((w, h)) => image.resize_exact(w, h, filter),
        None => image.clone(),
    }
}

/// Thumbnail to fit `size`, then stretch to exactly `size`.
///
/// Shrinking first keeps the larger axis from being resampled twice at a
/// different ratio; the stretch guarantees the exact canvas.
pub fn fit_then_stretch(image: &DynamicImage, size: Size, filter: FilterType) -> DynamicImage {
    let fitted = thumbnail(image, size, filter);
    if fitted.dimensions() == (size.width, size.height) {
        return fitted;
    }
    fitted.resize_exact(size.width, size.height, filter)
}
