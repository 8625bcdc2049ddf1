mod convert;
mod resize;

pub use convert::{chw_to_image, hwc_to_image, to_chw_array};
pub use resize::{fit_then_stretch, thumbnail, thumbnail_size};
