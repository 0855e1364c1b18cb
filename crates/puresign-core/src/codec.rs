//! Conversion between encoded image bytes and in-memory RGB buffers.

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use thiserror::Error;

/// JPEG quality used for every image this service writes.
const JPEG_QUALITY: u8 = 75;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("cannot decode image: {0}")]
    Decode(image::ImageError),
    #[error("cannot encode image: {0}")]
    Encode(image::ImageError),
    #[error("image has zero width or height")]
    Empty,
}

/// Decode any supported image format into an RGB8 buffer.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, CodecError> {
    let image = image::load_from_memory(bytes).map_err(CodecError::Decode)?;
    let rgb = image.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(CodecError::Empty);
    }
    Ok(rgb)
}

/// Encode an RGB8 buffer as JPEG.
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, CodecError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(CodecError::Empty);
    }
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(image)
        .map_err(CodecError::Encode)?;
    Ok(buf)
}
