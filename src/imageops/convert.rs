use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;

/// Channel-first `u8` copy of `image`, keeping its channel count.
///
/// 16-bit and float images are narrowed to 8 bits. Grayscale stays at one
/// channel, so the RGB check downstream can reject it.
pub fn to_chw_array(image: &DynamicImage) -> Array3<u8> {
    match image.color().channel_count() {
        1 => image.to_luma8().as_ndarray3().as_standard_layout().into_owned(),
        2 => image
            .to_luma_alpha8()
            .as_ndarray3()
            .as_standard_layout()
            .into_owned(),
        4 => image.to_rgba8().as_ndarray3().as_standard_layout().into_owned(),
        _ => image.to_rgb8().as_ndarray3().as_standard_layout().into_owned(),
    }
}

/// Builds an image from an HWC array. `None` for zero-sized input or a
/// channel count other than 1 to 4.
pub fn hwc_to_image(hwc: ArrayView3<u8>) -> Option<DynamicImage> {
    let (h, w, c) = hwc.dim();
    if h == 0 || w == 0 {
        return None;
    }
    let (width, height) = (u32::try_from(w).ok()?, u32::try_from(h).ok()?);
    // logical iteration order of an HWC view is the interleaved pixel layout
    let raw = hwc.iter().copied().collect::<Vec<u8>>();

    match c {
        1 => GrayImage::from_raw(width, height, raw).map(DynamicImage::ImageLuma8),
        2 => GrayAlphaImage::from_raw(width, height, raw).map(DynamicImage::ImageLumaA8),
        3 => RgbImage::from_raw(width, height, raw).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(width, height, raw).map(DynamicImage::ImageRgba8),
        _ => None,
    }
}

pub fn chw_to_image(chw: ArrayView3<u8>) -> Option<DynamicImage> {
    hwc_to_image(chw.permuted_axes([1, 2, 0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Luma, Rgb};

    #[test]
    fn test_to_chw_array_rgb_layout() {
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(3, 1, Rgb([10, 20, 30]));
        let arr = to_chw_array(&DynamicImage::ImageRgb8(img));

        assert_eq!(arr.dim(), (3, 2, 4));
        assert_eq!(arr[[0, 1, 3]], 10);
        assert_eq!(arr[[1, 1, 3]], 20);
        assert_eq!(arr[[2, 1, 3]], 30);
        assert_eq!(arr[[0, 0, 0]], 0);
    }

    #[test]
    fn test_to_chw_array_keeps_gray_single_channel() {
        let img = GrayImage::from_pixel(5, 5, Luma([7]));
        let arr = to_chw_array(&DynamicImage::ImageLuma8(img));
        assert_eq!(arr.dim(), (1, 5, 5));
    }

    #[test]
    fn test_hwc_round_trip_pixel() {
        let mut hwc = Array3::<u8>::zeros((2, 3, 3));
        hwc[[1, 2, 0]] = 200;
        hwc[[1, 2, 2]] = 50;
        let img = hwc_to_image(hwc.view()).unwrap();

        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.to_rgb8().get_pixel(2, 1), &Rgb([200, 0, 50]));
    }

    #[test]
    fn test_hwc_rejects_bad_channels() {
        assert!(hwc_to_image(Array3::<u8>::zeros((2, 2, 5)).view()).is_none());
        assert!(hwc_to_image(Array3::<u8>::zeros((0, 2, 3)).view()).is_none());
    }
}
