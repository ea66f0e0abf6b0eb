use std::borrow::Cow;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::frame::{PixelFormat, RawImage};
use crate::error::EncodingError;

/// Encode one raw view as JPEG.
pub fn encode_jpeg(image: &RawImage, quality: u8) -> Result<Bytes, EncodingError> {
    let expected = image.width as usize * image.height as usize * image.format.bytes_per_pixel();
    if image.data.len() != expected {
        return Err(EncodingError::BufferSize {
            expected,
            actual: image.data.len(),
        });
    }

    let (pixels, color): (Cow<'_, [u8]>, ExtendedColorType) = match image.format {
        PixelFormat::Bgra8 => (Cow::Owned(to_rgb(&image.data, 4, true)), ExtendedColorType::Rgb8),
        PixelFormat::Rgba8 => (Cow::Owned(to_rgb(&image.data, 4, false)), ExtendedColorType::Rgb8),
        PixelFormat::Bgr8 => (Cow::Owned(to_rgb(&image.data, 3, true)), ExtendedColorType::Rgb8),
        // Already in RGB format
        PixelFormat::Rgb8 => (Cow::Borrowed(&image.data[..]), ExtendedColorType::Rgb8),
        PixelFormat::Gray8 => (Cow::Borrowed(&image.data[..]), ExtendedColorType::L8),
    };

    let mut out = Vec::with_capacity(expected / 8);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&pixels, image.width, image.height, color)
        .map_err(|e| EncodingError::Jpeg(e.to_string()))?;
    Ok(Bytes::from(out))
}

/// Encode several views concurrently, one scoped worker per view.
///
/// Results come back in input order.
pub fn encode_parallel(images: &[&RawImage], quality: u8) -> Vec<Result<Bytes, EncodingError>> {
    let joined = crossbeam::scope(|s| {
        let handles: Vec<_> = images
            .iter()
            .map(|image| s.spawn(move |_| encode_jpeg(image, quality)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|_| Err(panicked())))
            .collect::<Vec<_>>()
    });
    joined.unwrap_or_else(|_| images.iter().map(|_| Err(panicked())).collect())
}

fn panicked() -> EncodingError {
    EncodingError::Jpeg("encoder worker panicked".into())
}

fn to_rgb(data: &[u8], channels: usize, swap_red_blue: bool) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / channels * 3);
    for px in data.chunks_exact(channels) {
        if swap_red_blue {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        } else {
            rgb.extend_from_slice(&px[..3]);
        }
    }
    rgb
}
