//! Decoding of encoded images into 3-channel RGB pixel grids.

use crate::error::VerifyError;
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Where an image comes from: raw encoded bytes or a file on disk.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

impl ImageSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ImageSource::Path(path.into())
    }

    /// Short human-readable description for logs and diagnostics.
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Bytes(b) => format!("{} bytes", b.len()),
            ImageSource::Path(p) => p.display().to_string(),
        }
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Bytes(bytes)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

/// Decode `source` into an RGB image. Any alpha channel is dropped.
pub fn load(source: &ImageSource) -> Result<RgbImage, VerifyError> {
    let decoded = match source {
        ImageSource::Bytes(bytes) => image::load_from_memory(bytes)
            .map_err(|e| VerifyError::Decode(format!("cannot decode image bytes: {e}")))?,
        ImageSource::Path(path) => image::open(path)
            .map_err(|e| VerifyError::Decode(format!("cannot read {}: {e}", path.display())))?,
    };

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(VerifyError::Decode("image dimensions are zero".into()));
    }

    tracing::debug!(
        source = %source.describe(),
        width = decoded.width(),
        height = decoded.height(),
        color = ?decoded.color(),
        "image decoded"
    );

    Ok(decoded.to_rgb8())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    pub(crate) fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_load_rgba_drops_alpha() {
        let rgba = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 128]));
        let bytes = png_bytes(DynamicImage::ImageRgba8(rgba));

        let img = load(&ImageSource::Bytes(bytes)).unwrap();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(img.as_raw().len(), 4 * 3 * 3);
        assert_eq!(img.get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_load_grayscale_expands_to_rgb() {
        let gray = image::GrayImage::from_pixel(2, 2, image::Luma([77]));
        let bytes = png_bytes(DynamicImage::ImageLuma8(gray));

        let img = load(&bytes.into()).unwrap();
        assert_eq!(img.get_pixel(1, 1).0, [77, 77, 77]);
    }

    #[test]
    fn test_truncated_bytes_are_decode_error() {
        let rgba = RgbaImage::from_pixel(16, 16, Rgba([1, 2, 3, 255]));
        let mut bytes = png_bytes(DynamicImage::ImageRgba8(rgba));
        bytes.truncate(bytes.len() / 2);

        let err = load(&ImageSource::Bytes(bytes)).unwrap_err();
        assert!(matches!(err, VerifyError::Decode(_)));
    }

    #[test]
    fn test_garbage_bytes_are_decode_error() {
        let err = load(&ImageSource::Bytes(b"definitely not an image".to_vec())).unwrap_err();
        assert!(matches!(err, VerifyError::Decode(_)));
    }

    #[test]
    fn test_missing_file_is_decode_error() {
        let err = load(&ImageSource::path("/nonexistent/faceverify/photo.jpg")).unwrap_err();
        match err {
            VerifyError::Decode(msg) => assert!(msg.contains("photo.jpg")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
