//! Bounds-aware decoding.
//!
//! Decoding happens in two passes: the header is read for dimensions
//! first, then the image is decoded at a reduced size picked by an integer
//! sample size. PNG rows are streamed and sampled as they arrive and JPEG
//! uses the codec's scaled IDCT, so a very large source is never resident
//! at full size. Other formats fall back to a full decode and a reduction.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageBuffer, ImageFormat, ImageReader};
use tracing::trace;

use crate::domain::ports::{CacheError, CacheResult};

/// Default maximum width for decoded images.
pub const DEFAULT_MAX_WIDTH: u32 = 1024;

/// Default maximum height for decoded images.
pub const DEFAULT_MAX_HEIGHT: u32 = 1024;

fn reader(bytes: &[u8]) -> CacheResult<ImageReader<Cursor<&[u8]>>> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CacheError::DecodeError(format!("Failed to read image header: {e}")))
}

/// Reads only the image header and returns `(width, height)`.
///
/// # Errors
/// Returns `DecodeError` if the format is unknown or the header is malformed.
pub fn probe_dimensions(bytes: &[u8]) -> CacheResult<(u32, u32)> {
    reader(bytes)?
        .into_dimensions()
        .map_err(|e| CacheError::DecodeError(format!("Failed to read dimensions: {e}")))
}

/// Computes the integer downsample factor for a source image.
///
/// Returns 1 when the source already fits or when either bound is zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn calculate_sample_size(
    src_width: u32,
    src_height: u32,
    max_width: u32,
    max_height: u32,
) -> u32 {
    if max_width == 0 || max_height == 0 {
        return 1;
    }

    if src_height <= max_height && src_width <= max_width {
        return 1;
    }

    let height_ratio = (f64::from(src_height) / f64::from(max_height)).round() as u32;
    let width_ratio = (f64::from(src_width) / f64::from(max_width)).round() as u32;

    height_ratio.min(width_ratio).max(1)
}

/// Decodes `bytes`, downsampling so the result is roughly bounded by
/// `max_width` x `max_height`.
///
/// The result is `ceil(width / s)` x `ceil(height / s)` for sample size `s`.
///
/// # Errors
/// Returns `DecodeError` for malformed or truncated input.
pub fn decode_bounded(bytes: &[u8], max_width: u32, max_height: u32) -> CacheResult<DynamicImage> {
    let format = reader(bytes)?.format();
    let (width, height) = probe_dimensions(bytes)?;
    let sample_size = calculate_sample_size(width, height, max_width, max_height);

    if sample_size == 1 {
        return decode_full(bytes);
    }

    let target_width = width.div_ceil(sample_size);
    let target_height = height.div_ceil(sample_size);
    trace!(
        width,
        height,
        sample_size,
        target_width,
        target_height,
        ?format,
        "Decoding subsampled image"
    );

    let sampled = match format {
        Some(ImageFormat::Png) => decode_png_sampled(bytes, sample_size)?,
        Some(ImageFormat::Jpeg) => decode_jpeg_scaled(bytes, target_width, target_height)?,
        _ => None,
    };

    let decoded = match sampled {
        Some(image) => image,
        None => decode_full(bytes)?,
    };

    if decoded.width() == target_width && decoded.height() == target_height {
        return Ok(decoded);
    }
    Ok(decoded.resize_exact(target_width, target_height, FilterType::Nearest))
}

fn decode_full(bytes: &[u8]) -> CacheResult<DynamicImage> {
    reader(bytes)?
        .decode()
        .map_err(|e| CacheError::DecodeError(format!("Failed to decode image: {e}")))
}

fn png_error(e: png::DecodingError) -> CacheError {
    CacheError::DecodeError(format!("Failed to decode PNG: {e}"))
}

/// Streams a PNG row by row, keeping every `sample_size`-th row and column.
///
/// Returns `Ok(None)` for interlaced files, whose rows arrive out of order.
fn decode_png_sampled(bytes: &[u8], sample_size: u32) -> CacheResult<Option<DynamicImage>> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND);
    let mut reader = decoder.read_info().map_err(png_error)?;

    let info = reader.info();
    if info.interlaced {
        return Ok(None);
    }
    let out_width = info.width.div_ceil(sample_size);
    let out_height = info.height.div_ceil(sample_size);

    // EXPAND leaves 8 or 16 bit samples and no palette.
    let (color, depth) = reader.output_color_type();
    let sample_bytes = if depth == png::BitDepth::Sixteen { 2 } else { 1 };
    let pixel_bytes = color.samples() * sample_bytes;
    let step = sample_size as usize;

    let mut data = Vec::with_capacity(out_width as usize * out_height as usize * pixel_bytes);
    let mut y = 0usize;
    while let Some(row) = reader.next_row().map_err(png_error)? {
        if y % step == 0 {
            for pixel in row.data().chunks_exact(pixel_bytes).step_by(step) {
                data.extend_from_slice(pixel);
            }
        }
        y += 1;
    }

    let image = if sample_bytes == 2 {
        let samples: Vec<u16> = data
            .chunks_exact(2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .collect();
        match color {
            png::ColorType::Grayscale => {
                ImageBuffer::from_raw(out_width, out_height, samples).map(DynamicImage::ImageLuma16)
            }
            png::ColorType::GrayscaleAlpha => ImageBuffer::from_raw(out_width, out_height, samples)
                .map(DynamicImage::ImageLumaA16),
            png::ColorType::Rgb => {
                ImageBuffer::from_raw(out_width, out_height, samples).map(DynamicImage::ImageRgb16)
            }
            png::ColorType::Rgba => {
                ImageBuffer::from_raw(out_width, out_height, samples).map(DynamicImage::ImageRgba16)
            }
            png::ColorType::Indexed => None,
        }
    } else {
        match color {
            png::ColorType::Grayscale => {
                ImageBuffer::from_raw(out_width, out_height, data).map(DynamicImage::ImageLuma8)
            }
            png::ColorType::GrayscaleAlpha => {
                ImageBuffer::from_raw(out_width, out_height, data).map(DynamicImage::ImageLumaA8)
            }
            png::ColorType::Rgb => {
                ImageBuffer::from_raw(out_width, out_height, data).map(DynamicImage::ImageRgb8)
            }
            png::ColorType::Rgba => {
                ImageBuffer::from_raw(out_width, out_height, data).map(DynamicImage::ImageRgba8)
            }
            png::ColorType::Indexed => None,
        }
    };

    image
        .map(Some)
        .ok_or_else(|| CacheError::DecodeError("PNG rows do not match header".to_string()))
}

fn jpeg_error(e: jpeg_decoder::Error) -> CacheError {
    CacheError::DecodeError(format!("Failed to decode JPEG: {e}"))
}

/// Decodes a JPEG with the smallest IDCT scale that still covers the target.
///
/// Returns `Ok(None)` for pixel formats other than 8-bit gray and RGB.
fn decode_jpeg_scaled(
    bytes: &[u8],
    target_width: u32,
    target_height: u32,
) -> CacheResult<Option<DynamicImage>> {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    decoder.read_info().map_err(jpeg_error)?;

    let pixel_format = decoder
        .info()
        .map(|info| info.pixel_format)
        .ok_or_else(|| CacheError::DecodeError("JPEG header missing".to_string()))?;
    if !matches!(
        pixel_format,
        jpeg_decoder::PixelFormat::L8 | jpeg_decoder::PixelFormat::RGB24
    ) {
        return Ok(None);
    }

    let request_width = u16::try_from(target_width).unwrap_or(u16::MAX);
    let request_height = u16::try_from(target_height).unwrap_or(u16::MAX);
    let (width, height) = decoder
        .scale(request_width, request_height)
        .map_err(jpeg_error)?;
    let pixels = decoder.decode().map_err(jpeg_error)?;
    let (width, height) = (u32::from(width), u32::from(height));

    let image = if pixel_format == jpeg_decoder::PixelFormat::L8 {
        ImageBuffer::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
    } else {
        ImageBuffer::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
    };

    image
        .map(Some)
        .ok_or_else(|| CacheError::DecodeError("JPEG data does not match header".to_string()))
}

/// Encodes an image losslessly (PNG) for the disk cache.
///
/// # Errors
/// Returns `DecodeError` if the encoder rejects the image.
pub fn encode_lossless(image: &DynamicImage) -> CacheResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());

    let result = match image.color() {
        // PNG has no float sample formats.
        ColorType::Rgb32F | ColorType::Rgba32F => {
            DynamicImage::ImageRgba16(image.to_rgba16()).write_to(&mut buf, ImageFormat::Png)
        }
        _ => image.write_to(&mut buf, ImageFormat::Png),
    };

    result.map_err(|e| CacheError::DecodeError(format!("Failed to encode image: {e}")))?;
    Ok(buf.into_inner())
}
