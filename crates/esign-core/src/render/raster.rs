//! Signature image preparation for PDF embedding.
//!
//! JPEG data passes through as `DCTDecode`. PNG data is inflated, unfiltered, split into
//! color and alpha planes and re-deflated, since PDF has no native PNG filter with alpha.

use crate::error::RenderError;
use crate::image::{check_dimensions, jpeg_frame, read_u32, ImageFormat, SignatureImage};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Image XObject payload ready to be wrapped in a PDF stream.
#[derive(Debug, Clone)]
pub(crate) struct EmbeddedImage {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub filter: &'static str,
    pub data: Vec<u8>,
    /// Deflated 8-bit alpha plane, present only when some pixel is not opaque.
    pub soft_mask: Option<Vec<u8>>,
}

pub(crate) fn prepare(image: &SignatureImage) -> Result<EmbeddedImage, RenderError> {
    match image.format {
        ImageFormat::Jpeg => prepare_jpeg(image),
        ImageFormat::Png => prepare_png(image),
    }
}

fn prepare_jpeg(image: &SignatureImage) -> Result<EmbeddedImage, RenderError> {
    let (width, height, components) = jpeg_frame(&image.bytes)?;
    let color_space = match components {
        1 => "DeviceGray",
        3 => "DeviceRGB",
        _ => "DeviceCMYK",
    };
    Ok(EmbeddedImage {
        width,
        height,
        color_space,
        filter: "DCTDecode",
        data: image.bytes.clone(),
        soft_mask: None,
    })
}

fn prepare_png(image: &SignatureImage) -> Result<EmbeddedImage, RenderError> {
    let bytes = &image.bytes;
    if bytes.len() < 33 {
        return Err(RenderError::Raster("truncated PNG".to_string()));
    }
    let width = read_u32(&bytes[16..20]);
    let height = read_u32(&bytes[20..24]);
    check_dimensions(width, height)?;
    let color_type = bytes[25];
    let channels: usize = match color_type {
        0 => 1,
        2 => 3,
        4 => 2,
        6 => 4,
        other => {
            return Err(RenderError::Raster(format!(
                "unsupported PNG color type {other}"
            )))
        }
    };

    let compressed = collect_idat(bytes)?;
    let expected = (width as usize * channels + 1) * height as usize;
    let inflated = inflate_exact(&compressed, expected)?;

    let pixels = unfilter(&inflated, width as usize, height as usize, channels)?;
    let has_alpha = matches!(color_type, 4 | 6);
    let color_channels = if has_alpha { channels - 1 } else { channels };

    let (color, alpha) = if has_alpha {
        let mut color = Vec::with_capacity(pixels.len() / channels * color_channels);
        let mut alpha = Vec::with_capacity(pixels.len() / channels);
        for pixel in pixels.chunks_exact(channels) {
            color.extend_from_slice(&pixel[..color_channels]);
            alpha.push(pixel[color_channels]);
        }
        (color, Some(alpha))
    } else {
        (pixels, None)
    };

    let soft_mask = match alpha {
        Some(alpha) if alpha.iter().any(|&a| a != u8::MAX) => Some(deflate(&alpha)?),
        _ => None,
    };

    Ok(EmbeddedImage {
        width,
        height,
        color_space: if color_channels == 1 {
            "DeviceGray"
        } else {
            "DeviceRGB"
        },
        filter: "FlateDecode",
        data: deflate(&color)?,
        soft_mask,
    })
}

/// Inflates at most one byte past `expected`, so a stream that holds more than its header
/// declares is rejected without being expanded.
fn inflate_exact(compressed: &[u8], expected: usize) -> Result<Vec<u8>, RenderError> {
    let mut inflated = Vec::with_capacity(expected);
    ZlibDecoder::new(compressed)
        .take(expected as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| RenderError::Raster(format!("PNG data does not inflate: {e}")))?;
    match inflated.len().cmp(&expected) {
        std::cmp::Ordering::Equal => Ok(inflated),
        std::cmp::Ordering::Less => Err(RenderError::Raster(
            "PNG data is shorter than its header declares".to_string(),
        )),
        std::cmp::Ordering::Greater => Err(RenderError::Raster(
            "PNG data is longer than its header declares".to_string(),
        )),
    }
}

fn collect_idat(bytes: &[u8]) -> Result<Vec<u8>, RenderError> {
    let mut pos = 8;
    let mut data = Vec::new();
    while pos + 8 <= bytes.len() {
        let length = read_u32(&bytes[pos..pos + 4]) as usize;
        let kind = &bytes[pos + 4..pos + 8];
        let body_start = pos + 8;
        let body_end = body_start
            .checked_add(length)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| RenderError::Raster("truncated PNG chunk".to_string()))?;
        match kind {
            b"IDAT" => data.extend_from_slice(&bytes[body_start..body_end]),
            b"IEND" => break,
            _ => {}
        }
        // chunk body + CRC
        pos = body_end + 4;
    }
    if data.is_empty() {
        return Err(RenderError::Raster("PNG has no image data".to_string()));
    }
    Ok(data)
}

/// Reverses PNG scanline filters for 8-bit samples.
fn unfilter(
    raw: &[u8],
    width: usize,
    height: usize,
    channels: usize,
) -> Result<Vec<u8>, RenderError> {
    let stride = width * channels;
    if raw.len() < height * (stride + 1) {
        return Err(RenderError::Raster("PNG data is shorter than its header declares".to_string()));
    }

    let mut out = vec![0u8; height * stride];
    for row in 0..height {
        let filter = raw[row * (stride + 1)];
        let line = &raw[row * (stride + 1) + 1..(row + 1) * (stride + 1)];
        let (done, current) = out.split_at_mut(row * stride);
        let previous = if row == 0 {
            None
        } else {
            Some(&done[(row - 1) * stride..])
        };
        let current = &mut current[..stride];

        for i in 0..stride {
            let left = if i >= channels { current[i - channels] } else { 0 };
            let up = previous.map(|p| p[i]).unwrap_or(0);
            let up_left = match previous {
                Some(p) if i >= channels => p[i - channels],
                _ => 0,
            };
            let predictor = match filter {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => {
                    return Err(RenderError::Raster(format!(
                        "unknown PNG filter type {other}"
                    )))
                }
            };
            current[i] = line[i].wrapping_add(predictor);
        }
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn deflate(bytes: &[u8]) -> Result<Vec<u8>, RenderError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| RenderError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::tests::{png_from_raw, rgba_png, tiny_jpeg};
    use crate::image::MAX_PIXELS;

    fn inflate(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ZlibDecoder::new(bytes).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn opaque_rgba_png_drops_alpha_plane() {
        let image = SignatureImage::from_bytes(rgba_png(3, 2)).unwrap();
        let embedded = prepare(&image).unwrap();
        assert_eq!((embedded.width, embedded.height), (3, 2));
        assert_eq!(embedded.color_space, "DeviceRGB");
        assert_eq!(embedded.filter, "FlateDecode");
        assert!(embedded.soft_mask.is_none());

        let rgb = inflate(&embedded.data);
        assert_eq!(rgb.len(), 3 * 2 * 3);
        // pixel (1, 1)
        assert_eq!(&rgb[(3 + 1) * 3..(3 + 1) * 3 + 3], &[40, 40, 0]);
    }

    #[test]
    fn jpeg_passes_through_with_gray_color_space() {
        let image = SignatureImage::from_bytes(tiny_jpeg()).unwrap();
        let embedded = prepare(&image).unwrap();
        assert_eq!(embedded.filter, "DCTDecode");
        assert_eq!(embedded.color_space, "DeviceGray");
        assert_eq!(embedded.data, image.bytes);
    }

    #[test]
    fn reverses_sub_up_and_paeth_filters() {
        // 2x2 gray image; rows use Sub then Up.
        let raw = [1, 10, 5, 2, 1, 1];
        let out = unfilter(&raw, 2, 2, 1).unwrap();
        assert_eq!(out, vec![10, 15, 11, 16]);

        let raw = [4, 10, 5, 4, 1, 1];
        let out = unfilter(&raw, 2, 2, 1).unwrap();
        // row 1: paeth(0,10,0)=10 -> 11 ; paeth(11,15,10)=15 -> 16
        assert_eq!(out, vec![10, 15, 11, 16]);
    }

    #[test]
    fn stream_longer_than_header_is_rejected_before_expanding() {
        // Header says 4x4 gray; the stream inflates to 4 MiB of zeros.
        let png = png_from_raw(4, 4, 0, &vec![0u8; 4 * 1024 * 1024]);
        let image = SignatureImage::from_bytes(png).unwrap();
        let err = prepare(&image).unwrap_err();
        assert!(matches!(err, RenderError::Raster(ref m) if m.contains("longer")));
    }

    #[test]
    fn oversized_declared_area_is_refused() {
        // Highly compressible payload declaring 8192x8192 RGBA.
        let png = png_from_raw(8192, 8192, 6, &[0u8; 1024]);
        let image = SignatureImage {
            format: ImageFormat::Png,
            width: 8192,
            height: 8192,
            bytes: png,
        };
        assert!(8192u64 * 8192 > MAX_PIXELS);
        let err = prepare(&image).unwrap_err();
        assert!(matches!(err, RenderError::Image(_)));
    }

    #[test]
    fn short_data_is_rejected() {
        assert!(unfilter(&[0, 1], 2, 2, 1).is_err());
    }
}
