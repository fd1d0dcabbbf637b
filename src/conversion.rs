//! Conversion of scaled FFmpeg frames into [`image`] buffers.

use ffmpeg_next::frame::Video as VideoFrame;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::configuration::PixelFormat;
use crate::error::VidpaceError;

/// Copy plane 0 of `video_frame` into a tightly-packed buffer, dropping any
/// per-row stride padding.
pub(crate) fn frame_to_buffer(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Vec<u8> {
    let stride = video_frame.stride(0);
    let row_bytes = (width as usize) * bytes_per_pixel;
    let data = video_frame.data(0);

    if stride == row_bytes {
        data[..row_bytes * (height as usize)].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_bytes * (height as usize));
        for row in 0..(height as usize) {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + row_bytes]);
        }
        buffer
    }
}

/// Build a [`DynamicImage`] from a frame already scaled into `format`.
pub(crate) fn frame_to_image(
    video_frame: &VideoFrame,
    format: PixelFormat,
) -> Result<DynamicImage, VidpaceError> {
    let width = video_frame.width();
    let height = video_frame.height();
    let buffer = frame_to_buffer(video_frame, width, height, format.bytes_per_pixel());
    let malformed =
        || VidpaceError::DecodeError(format!("{width}x{height} {format:?} frame has a short buffer"));

    match format {
        PixelFormat::Rgb8 => RgbImage::from_raw(width, height, buffer)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(malformed),
        PixelFormat::Rgba8 => RgbaImage::from_raw(width, height, buffer)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(malformed),
        PixelFormat::Gray8 => GrayImage::from_raw(width, height, buffer)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(malformed),
    }
}
