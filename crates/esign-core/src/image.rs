//! Signature image intake.
//!
//! Canvas widgets hand over images in several shapes: bare base64, `data:` URIs, payloads
//! wrapped across lines, URL-safe alphabets and stripped padding. All of that is normalized
//! here, in one place, before the bytes are sniffed and their header validated.

use crate::error::{ImageError, SigningError};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::{Deserialize, Serialize};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
pub(crate) const MAX_DIMENSION: u32 = 4096;
/// Upper bound on declared width x height. Decoded planes are sized from the header.
pub(crate) const MAX_PIXELS: u64 = 2_000_000;

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::RequireNone)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

/// A decoded signature image whose header has been validated.
#[derive(Clone, PartialEq, Eq)]
pub struct SignatureImage {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for SignatureImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureImage")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl SignatureImage {
    /// Sniffs the format from magic bytes and validates the header.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.starts_with(&PNG_SIGNATURE) {
            let (width, height) = png_dimensions(&bytes)?;
            return Ok(Self {
                format: ImageFormat::Png,
                width,
                height,
                bytes,
            });
        }
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            let (width, height, _) = jpeg_frame(&bytes)?;
            return Ok(Self {
                format: ImageFormat::Jpeg,
                width,
                height,
                bytes,
            });
        }
        Err(ImageError::UnsupportedFormat)
    }
}

/// Normalizes and decodes an inline image payload.
///
/// Accepts an optional `data:<mime>;base64,` prefix, whitespace and newlines anywhere in the
/// payload, URL-safe characters, and missing or present padding.
pub fn decode_signature_image(payload: &str, max_bytes: usize) -> Result<SignatureImage, SigningError> {
    Ok(decode_payload(payload, max_bytes)?)
}

fn decode_payload(payload: &str, max_bytes: usize) -> Result<SignatureImage, ImageError> {
    let normalized = normalize_payload(payload)?;
    if normalized.len() / 4 * 3 > max_bytes.saturating_add(3) {
        return Err(ImageError::TooLarge(max_bytes));
    }

    let bytes = LENIENT_BASE64.decode(normalized.as_bytes())?;
    if bytes.is_empty() {
        return Err(ImageError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(ImageError::TooLarge(max_bytes));
    }
    SignatureImage::from_bytes(bytes)
}

fn normalize_payload(payload: &str) -> Result<String, ImageError> {
    let trimmed = payload.trim();
    let body = if trimmed
        .get(..5)
        .map(|prefix| prefix.eq_ignore_ascii_case("data:"))
        .unwrap_or(false)
    {
        let comma = trimmed
            .find(',')
            .ok_or_else(|| ImageError::Payload("data URI has no payload".to_string()))?;
        let header = &trimmed[5..comma];
        if !header.to_ascii_lowercase().contains(";base64") {
            return Err(ImageError::Payload(
                "data URI is not base64 encoded".to_string(),
            ));
        }
        &trimmed[comma + 1..]
    } else {
        trimmed
    };

    let cleaned: String = body
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let cleaned = cleaned.trim_end_matches('=').to_string();
    if cleaned.is_empty() {
        return Err(ImageError::Empty);
    }
    Ok(cleaned)
}

fn png_dimensions(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    // The first chunk must be IHDR with a 13 byte body.
    if bytes.len() < 33 || &bytes[12..16] != b"IHDR" || read_u32(&bytes[8..12]) != 13 {
        return Err(ImageError::Malformed("truncated PNG header".to_string()));
    }
    let width = read_u32(&bytes[16..20]);
    let height = read_u32(&bytes[20..24]);
    let bit_depth = bytes[24];
    let color_type = bytes[25];
    let interlace = bytes[28];

    check_dimensions(width, height)?;
    if bit_depth != 8 {
        return Err(ImageError::Unsupported(format!("PNG bit depth {bit_depth}")));
    }
    if !matches!(color_type, 0 | 2 | 4 | 6) {
        return Err(ImageError::Unsupported(format!("PNG color type {color_type}")));
    }
    if interlace != 0 {
        return Err(ImageError::Unsupported("interlaced PNG".to_string()));
    }
    Ok((width, height))
}

/// Returns width, height and component count from the first SOF segment.
pub(crate) fn jpeg_frame(bytes: &[u8]) -> Result<(u32, u32, u8), ImageError> {
    let malformed = |reason: &str| ImageError::Malformed(reason.to_string());
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return Err(malformed("JPEG marker stream is broken"));
        }
        let marker = bytes[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if matches!(marker, 0xD0..=0xD9 | 0x01) {
            pos += 2;
            continue;
        }
        let length = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if length < 2 || pos + 2 + length > bytes.len() {
            return Err(malformed("truncated JPEG segment"));
        }
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            if length < 8 {
                return Err(malformed("truncated JPEG frame header"));
            }
            let segment = &bytes[pos + 4..pos + 2 + length];
            let height = u16::from_be_bytes([segment[1], segment[2]]) as u32;
            let width = u16::from_be_bytes([segment[3], segment[4]]) as u32;
            let components = segment[5];
            check_dimensions(width, height)?;
            if !matches!(components, 1 | 3 | 4) {
                return Err(ImageError::Unsupported(format!(
                    "JPEG component count {components}"
                )));
            }
            return Ok((width, height, components));
        }
        pos += 2 + length;
    }
    Err(malformed("JPEG frame header not found"))
}

pub(crate) fn check_dimensions(width: u32, height: u32) -> Result<(), ImageError> {
    let pixels = u64::from(width) * u64::from(height);
    if width == 0
        || height == 0
        || width > MAX_DIMENSION
        || height > MAX_DIMENSION
        || pixels > MAX_PIXELS
    {
        return Err(ImageError::Dimensions { width, height });
    }
    Ok(())
}

pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Minimal valid RGBA PNG with the given size, every row using filter type 0.
    pub(crate) fn rgba_png(width: u32, height: u32) -> Vec<u8> {
        let mut raw = Vec::new();
        for y in 0..height {
            raw.push(0);
            for x in 0..width {
                raw.extend_from_slice(&[(x * 40) as u8, (y * 40) as u8, 0, 255]);
            }
        }
        png_from_raw(width, height, 6, &raw)
    }

    /// PNG whose IHDR declares `width` x `height` with `color_type`, and whose IDAT is
    /// `raw` deflated as-is, whether or not it matches the header.
    pub(crate) fn png_from_raw(width: u32, height: u32, color_type: u8, raw: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw).unwrap();
        let idat = encoder.finish().unwrap();

        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&width.to_be_bytes());
        ihdr.extend_from_slice(&height.to_be_bytes());
        ihdr.extend_from_slice(&[8, color_type, 0, 0, 0]);

        let mut png = PNG_SIGNATURE.to_vec();
        push_chunk(&mut png, b"IHDR", &ihdr);
        push_chunk(&mut png, b"IDAT", &idat);
        push_chunk(&mut png, b"IEND", &[]);
        png
    }

    fn push_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        // CRC is not checked by the decoder.
        out.extend_from_slice(&[0, 0, 0, 0]);
    }

    pub(crate) fn tiny_jpeg() -> Vec<u8> {
        vec![
            0xFF, 0xD8, // SOI
            0xFF, 0xE0, 0x00, 0x04, 0x4A, 0x46, // APP0 (truncated body)
            0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x20, 0x00, 0x40, 0x01, 0x01, 0x11, 0x00, // SOF0
            0xFF, 0xD9, // EOI
        ]
    }

    #[test]
    fn decodes_data_uri_with_newlines_and_missing_padding() {
        let png = rgba_png(3, 2);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        let trimmed = encoded.trim_end_matches('=');
        let wrapped: String = trimmed
            .as_bytes()
            .chunks(10)
            .map(|chunk| format!("{}\r\n", std::str::from_utf8(chunk).unwrap()))
            .collect();
        let payload = format!("data:image/png;base64,{wrapped}");

        let image = decode_signature_image(&payload, 1024 * 1024).unwrap();
        assert_eq!(image.format, ImageFormat::Png);
        assert_eq!((image.width, image.height), (3, 2));
        assert_eq!(image.bytes, png);
    }

    #[test]
    fn decodes_url_safe_payload_without_prefix() {
        let png = rgba_png(4, 4);
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&png);
        let image = decode_signature_image(&encoded, 1024 * 1024).unwrap();
        assert_eq!(image.bytes, png);
    }

    #[test]
    fn reads_jpeg_frame_dimensions() {
        let jpeg = tiny_jpeg();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&jpeg);
        let image = decode_signature_image(&encoded, 1024).unwrap();
        assert_eq!(image.format, ImageFormat::Jpeg);
        assert_eq!((image.width, image.height), (64, 32));
    }

    #[test]
    fn rejects_garbage_and_unknown_formats() {
        assert!(matches!(
            decode_signature_image("!!!not base64!!!", 1024),
            Err(SigningError::InvalidSignatureImage(_))
        ));
        let gif = base64::engine::general_purpose::STANDARD.encode(b"GIF89a......");
        assert!(matches!(
            decode_signature_image(&gif, 1024),
            Err(SigningError::InvalidSignatureImage(_))
        ));
        assert!(matches!(
            decode_signature_image("data:image/png,plain", 1024),
            Err(SigningError::InvalidSignatureImage(_))
        ));
        assert!(matches!(
            decode_signature_image("   ", 1024),
            Err(SigningError::InvalidSignatureImage(_))
        ));
    }

    #[test]
    fn rejects_oversized_images() {
        let png = rgba_png(16, 16);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        assert!(matches!(
            decode_signature_image(&encoded, 32),
            Err(SigningError::InvalidSignatureImage(_))
        ));
    }

    #[test]
    fn rejects_declared_area_beyond_pixel_cap() {
        // 4096x4096 passes the per-side limit but not the area limit.
        let png = png_from_raw(4096, 4096, 6, &[0u8; 64]);
        assert!(matches!(
            SignatureImage::from_bytes(png.clone()),
            Err(ImageError::Dimensions {
                width: 4096,
                height: 4096
            })
        ));
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        assert!(matches!(
            decode_signature_image(&encoded, 1024 * 1024),
            Err(SigningError::InvalidSignatureImage(ImageError::Dimensions { .. }))
        ));

        let png = png_from_raw(1000, 2000, 6, &[0u8; 64]);
        assert!(SignatureImage::from_bytes(png).is_ok());
    }

    #[test]
    fn image_errors_name_the_failure() {
        assert!(matches!(
            SignatureImage::from_bytes(b"GIF89a......".to_vec()),
            Err(ImageError::UnsupportedFormat)
        ));
        assert!(matches!(
            decode_signature_image("   ", 1024),
            Err(SigningError::InvalidSignatureImage(ImageError::Empty))
        ));
        assert!(matches!(
            decode_signature_image("!!!not base64!!!", 1024),
            Err(SigningError::InvalidSignatureImage(ImageError::Base64(_)))
        ));
        let png = rgba_png(16, 16);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        assert!(matches!(
            decode_signature_image(&encoded, 32),
            Err(SigningError::InvalidSignatureImage(ImageError::TooLarge(32)))
        ));
    }
}
