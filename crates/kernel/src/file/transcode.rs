//! Image transcoding: decode, orient, bound, strip metadata, re-encode.
//!
//! Re-encoding through `image` drops every embedded metadata block (EXIF,
//! IPTC, ICC, XMP) because the encoders only write pixel data. The EXIF
//! orientation is applied to the pixels first so photos keep their visual
//! orientation once the tag is gone.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, Limits};
use tracing::debug;

use crate::error::{FileError, FileResult};

/// Largest width or height the decoder will accept. Anything above is
/// treated as hostile before pixels are allocated.
const MAX_DECODE_DIMENSION: u32 = 16_384;

/// Decoder allocation ceiling (512 MiB).
const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

/// Image format family for an extension, if it is a transcoded image type.
pub fn image_format_for(extension: &str) -> Option<ImageFormat> {
    match extension {
        "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        "gif" => Some(ImageFormat::Gif),
        "webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Output of a transcode.
#[derive(Debug)]
pub struct Transcoded {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Whether the image was downsized to fit the bounds.
    pub resized: bool,
}

/// Image transcoder bounded by a maximum output size.
#[derive(Debug, Clone)]
pub struct ImageTranscoder {
    max_width: u32,
    max_height: u32,
    jpeg_quality: u8,
}

impl ImageTranscoder {
    /// Create a new transcoder.
    pub fn new(max_width: u32, max_height: u32, jpeg_quality: u8) -> Self {
        Self {
            max_width: max_width.max(1),
            max_height: max_height.max(1),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Transcode `data` as `format`.
    ///
    /// Any decode failure, including exceeding the decode limits, is
    /// reported as [`FileError::CorruptImage`].
    pub fn transcode(&self, format: ImageFormat, data: &[u8]) -> FileResult<Transcoded> {
        let img = decode(format, data)?;
        let (orig_w, orig_h) = (img.width(), img.height());

        let (img, resized) = self.fit(img);

        let data = self.encode(&img, format)?;

        debug!(
            format = ?format,
            from = %format!("{orig_w}x{orig_h}"),
            to = %format!("{}x{}", img.width(), img.height()),
            resized,
            size = data.len(),
            "image transcoded"
        );

        Ok(Transcoded {
            data,
            width: img.width(),
            height: img.height(),
            resized,
        })
    }

    /// Downsize to fit within the bounds, preserving aspect ratio.
    fn fit(&self, img: DynamicImage) -> (DynamicImage, bool) {
        if img.width() <= self.max_width && img.height() <= self.max_height {
            return (img, false);
        }
        let (w, h) = fit_dimensions(img.width(), img.height(), self.max_width, self.max_height);
        (img.resize_exact(w, h, FilterType::Triangle), true)
    }

    fn encode(&self, img: &DynamicImage, format: ImageFormat) -> FileResult<Vec<u8>> {
        let encoded = match format {
            ImageFormat::Jpeg => {
                // JPEG has no alpha channel.
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                let mut buf = Vec::new();
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality))
                    .map(|()| buf)
            }
            ImageFormat::Gif | ImageFormat::WebP => {
                let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
                write_native(&rgba, format)
            }
            _ => write_native(img, format),
        };

        encoded.map_err(|e| FileError::Io(std::io::Error::other(e)))
    }
}

fn write_native(img: &DynamicImage, format: ImageFormat) -> image::ImageResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format)?;
    Ok(buf.into_inner())
}

fn decode(format: ImageFormat, data: &[u8]) -> FileResult<DynamicImage> {
    let corrupt = |e: image::ImageError| FileError::CorruptImage {
        details: e.to_string(),
    };

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_DIMENSION);
    limits.max_image_height = Some(MAX_DECODE_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);

    let mut reader = ImageReader::with_format(Cursor::new(data), format);
    reader.limits(limits);

    let mut decoder = reader.into_decoder().map_err(corrupt)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder).map_err(corrupt)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Largest dimensions within `max_w` x `max_h` with the aspect ratio of
/// `w` x `h`. Never returns a zero dimension.
pub fn fit_dimensions(w: u32, h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if w <= max_w && h <= max_h {
        return (w, h);
    }
    let scale = f64::min(max_w as f64 / w as f64, max_h as f64 / h as f64);
    let new_w = ((w as f64 * scale).round() as u32).clamp(1, max_w);
    let new_h = ((h as f64 * scale).round() as u32).clamp(1, max_h);
    (new_w, new_h)
}
