//! Image inspection and low-quality placeholder generation.

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat, ImageReader, Limits, imageops::FilterType};
use imagesize::ImageError;
use thiserror::Error;

/// Placeholders are never wider than this.
pub const LQIP_MAX_WIDTH: u32 = 16;
const LQIP_BLUR_SIGMA: f32 = 1.0;
pub(crate) const MAX_DIMENSION: u32 = 20_000;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("unsupported image format")]
    Unsupported,
    #[error("failed to inspect image: {0}")]
    Probe(String),
    #[error("image dimensions out of range")]
    Dimensions,
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Format and size of an encoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub extension: &'static str,
    pub mime: &'static str,
}

/// Sniff format and dimensions without decoding pixel data.
pub fn inspect(bytes: &[u8]) -> Result<ImageInfo, ImagingError> {
    let format = image::guess_format(bytes).map_err(|_| ImagingError::Unsupported)?;
    let size = match imagesize::blob_size(bytes) {
        Ok(size) => size,
        Err(ImageError::NotSupported) => return Err(ImagingError::Unsupported),
        Err(ImageError::CorruptedImage) => {
            return Err(ImagingError::Probe("corrupted image".to_string()));
        }
        Err(ImageError::IoError(err)) => return Err(ImagingError::Probe(err.to_string())),
    };

    let width = u32::try_from(size.width).map_err(|_| ImagingError::Dimensions)?;
    let height = u32::try_from(size.height).map_err(|_| ImagingError::Dimensions)?;
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ImagingError::Dimensions);
    }

    Ok(ImageInfo {
        width,
        height,
        extension: format.extensions_str().first().copied().unwrap_or("bin"),
        mime: format.to_mime_type(),
    })
}

/// Downscale to at most [`LQIP_MAX_WIDTH`] pixels wide, blur, and encode as PNG.
/// Header dimensions are checked before any pixel buffer is allocated.
pub fn placeholder_png(bytes: &[u8]) -> Result<Vec<u8>, ImagingError> {
    inspect(bytes)?;

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DIMENSION);
    limits.max_image_height = Some(MAX_DIMENSION);
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| ImagingError::Probe(err.to_string()))?;
    reader.limits(limits);
    let decoded = reader.decode()?;
    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(ImagingError::Dimensions);
    }

    let target_width = width.min(LQIP_MAX_WIDTH);
    let target_height = ((u64::from(height) * u64::from(target_width)) / u64::from(width)).max(1);
    let target_height = u32::try_from(target_height).map_err(|_| ImagingError::Dimensions)?;

    let small = decoded
        .resize_exact(target_width, target_height, FilterType::Triangle)
        .blur(LQIP_BLUR_SIGMA);
    let rgba = DynamicImage::ImageRgba8(small.to_rgba8());

    let mut out = Cursor::new(Vec::new());
    rgba.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// [`placeholder_png`] wrapped in a `data:` URI for inline frontmatter use.
pub fn placeholder_data_uri(bytes: &[u8]) -> Result<String, ImagingError> {
    let png = placeholder_png(bytes)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

#[cfg(test)]
pub(crate) mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn inspect_reports_format_and_size() {
        let info = inspect(&sample_png(40, 30)).expect("inspect");
        assert_eq!(info.width, 40);
        assert_eq!(info.height, 30);
        assert_eq!(info.extension, "png");
        assert_eq!(info.mime, "image/png");
    }

    #[test]
    fn inspect_rejects_non_images() {
        assert!(matches!(
            inspect(b"<html>not an image</html>"),
            Err(ImagingError::Unsupported)
        ));
    }

    #[test]
    fn placeholder_is_small_and_keeps_aspect() {
        let png = placeholder_png(&sample_png(320, 160)).expect("placeholder");
        let info = inspect(&png).expect("inspect placeholder");
        assert_eq!((info.width, info.height), (16, 8));
    }

    #[test]
    fn tiny_images_are_not_upscaled() {
        let png = placeholder_png(&sample_png(4, 40)).expect("placeholder");
        let info = inspect(&png).expect("inspect placeholder");
        assert_eq!((info.width, info.height), (4, 40));
    }

    #[test]
    fn oversized_headers_are_rejected_before_decoding() {
        let mut png = sample_png(1, 1);
        // IHDR width follows the signature, chunk length and chunk type.
        png[16..20].copy_from_slice(&(MAX_DIMENSION + 1).to_be_bytes());
        assert!(matches!(
            placeholder_png(&png),
            Err(ImagingError::Dimensions)
        ));
    }

    #[test]
    fn data_uri_prefix() {
        let uri = placeholder_data_uri(&sample_png(8, 8)).expect("uri");
        assert!(uri.starts_with("data:image/png;base64,"));
    }
}
