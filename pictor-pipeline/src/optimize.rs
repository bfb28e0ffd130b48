use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageReader};
use pictor_core::{FitMode, ImageFormat, TransformOptions};
use std::io::Cursor;
use thiserror::Error;

/// Decoded pixel budget: ~2.68e8 pixels. A crafted header claiming huge
/// dimensions is rejected before any pixel allocation happens.
pub const MAX_PIXELS: u64 = 268_435_456;

/// Default lossy encode quality when the request carries no `q` directive.
pub const DEFAULT_QUALITY: u8 = 80;

/// AVIF speed/effort; middle of the road.
const AVIF_SPEED: u8 = 6;

/// Optimizer failures never surface to a client: the pipeline logs them and
/// serves the original bytes instead.
#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("decoded pixel count {0} exceeds the budget")]
    TooLarge(u64),

    #[error("image encode failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone)]
pub struct OptimizedImage {
    pub bytes: Bytes,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
}

/// Decode → auto-orient → resize (downscale only) → strip metadata →
/// re-encode. Passing an all-empty option set returns the input unchanged
/// with the content type read from the format probe.
///
/// Re-encoding inherently drops EXIF/IPTC/XMP; the EXIF orientation is
/// applied first so stripping it doesn't flip the image, and the ICC
/// profile is carried into encoders that accept one.
pub fn optimize(input: &[u8], opts: &TransformOptions) -> Result<OptimizedImage, OptimizeError> {
    let opts = opts.normalized();

    let probe = ImageReader::new(Cursor::new(input))
        .with_guessed_format()
        .map_err(|e| OptimizeError::Decode(e.to_string()))?;
    let source_format = probe
        .format()
        .ok_or_else(|| OptimizeError::Decode("unrecognised image format".to_string()))?;
    let (source_w, source_h) = probe
        .into_dimensions()
        .map_err(|e| OptimizeError::Decode(e.to_string()))?;

    let pixels = source_w as u64 * source_h as u64;
    if pixels > MAX_PIXELS {
        return Err(OptimizeError::TooLarge(pixels));
    }

    if opts.is_noop() {
        return Ok(OptimizedImage {
            bytes: Bytes::copy_from_slice(input),
            content_type: source_format.to_mime_type().to_string(),
            width: source_w,
            height: source_h,
        });
    }

    let mut decoder = ImageReader::new(Cursor::new(input))
        .with_guessed_format()
        .map_err(|e| OptimizeError::Decode(e.to_string()))?
        .into_decoder()
        .map_err(|e| OptimizeError::Decode(e.to_string()))?;
    let icc = decoder.icc_profile().ok().flatten();
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img =
        DynamicImage::from_decoder(decoder).map_err(|e| OptimizeError::Decode(e.to_string()))?;
    img.apply_orientation(orientation);

    if opts.width.is_some() || opts.height.is_some() {
        img = resize_with_fit(img, opts.width, opts.height, opts.fit.unwrap_or(FitMode::Inside));
    }

    let target = match opts.format {
        Some(f) => f,
        None => match source_format {
            image::ImageFormat::Jpeg => ImageFormat::Jpeg,
            image::ImageFormat::WebP => ImageFormat::Webp,
            image::ImageFormat::Avif => ImageFormat::Avif,
            _ => ImageFormat::Png,
        },
    };
    let quality = opts.quality.unwrap_or(DEFAULT_QUALITY);
    let (bytes, content_type) = encode(&img, target, quality, icc)?;

    Ok(OptimizedImage {
        bytes: Bytes::from(bytes),
        content_type: content_type.to_string(),
        width: img.width(),
        height: img.height(),
    })
}

/// Downscale-only resize. The missing dimension follows the source aspect
/// ratio; requested dimensions larger than the source are clamped.
fn resize_with_fit(
    img: DynamicImage,
    width: Option<u32>,
    height: Option<u32>,
    fit: FitMode,
) -> DynamicImage {
    let (ow, oh) = (img.width(), img.height());
    let tw = width.unwrap_or(ow).min(ow).max(1);
    let th = height.unwrap_or(oh).min(oh).max(1);
    if tw == ow && th == oh {
        return img;
    }
    match fit {
        FitMode::Inside | FitMode::Contain => img.resize(tw, th, FilterType::Lanczos3),
        FitMode::Cover => img.resize_to_fill(tw, th, FilterType::Lanczos3),
        FitMode::Fill => {
            let (ew, eh) = exact_dims(ow, oh, width, height);
            img.resize_exact(ew, eh, FilterType::Lanczos3)
        }
        FitMode::Outside => {
            let scale = (tw as f64 / ow as f64).max(th as f64 / oh as f64).min(1.0);
            let ew = ((ow as f64 * scale).round() as u32).max(1);
            let eh = ((oh as f64 * scale).round() as u32).max(1);
            img.resize_exact(ew, eh, FilterType::Lanczos3)
        }
    }
}

fn exact_dims(ow: u32, oh: u32, width: Option<u32>, height: Option<u32>) -> (u32, u32) {
    match (width, height) {
        (Some(w), Some(h)) => (w.min(ow).max(1), h.min(oh).max(1)),
        (Some(w), None) => {
            let w = w.min(ow).max(1);
            let h = ((oh as u64 * w as u64) / ow as u64).max(1) as u32;
            (w, h)
        }
        (None, Some(h)) => {
            let h = h.min(oh).max(1);
            let w = ((ow as u64 * h as u64) / oh as u64).max(1) as u32;
            (w, h)
        }
        (None, None) => (ow, oh),
    }
}

fn encode(
    img: &DynamicImage,
    target: ImageFormat,
    quality: u8,
    icc: Option<Vec<u8>>,
) -> Result<(Vec<u8>, &'static str), OptimizeError> {
    match target {
        ImageFormat::Jpeg => {
            let rgb = img.to_rgb8();
            let mut out = Vec::new();
            let mut enc = JpegEncoder::new_with_quality(&mut out, quality);
            if let Some(icc) = icc {
                let _ = enc.set_icc_profile(icc);
            }
            enc.encode_image(&rgb)
                .map_err(|e| OptimizeError::Encode(e.to_string()))?;
            Ok((out, "image/jpeg"))
        }
        ImageFormat::Png => {
            let mut out = Vec::new();
            let mut enc =
                PngEncoder::new_with_quality(&mut out, CompressionType::Default, PngFilter::Adaptive);
            if let Some(icc) = icc {
                let _ = enc.set_icc_profile(icc);
            }
            enc.write_image(img.as_bytes(), img.width(), img.height(), img.color().into())
                .map_err(|e| OptimizeError::Encode(e.to_string()))?;
            Ok((out, "image/png"))
        }
        ImageFormat::Avif => {
            let rgba = img.to_rgba8();
            let mut out = Vec::new();
            let enc = AvifEncoder::new_with_speed_quality(&mut out, AVIF_SPEED, quality);
            enc.write_image(
                rgba.as_raw(),
                img.width(),
                img.height(),
                ExtendedColorType::Rgba8,
            )
            .map_err(|e| OptimizeError::Encode(e.to_string()))?;
            Ok((out, "image/avif"))
        }
        ImageFormat::Webp => {
            let rgba = img.to_rgba8();
            let encoder = webp::Encoder::from_rgba(rgba.as_raw(), img.width(), img.height());
            let mem = encoder.encode(quality as f32);
            Ok((mem.to_vec(), "image/webp"))
        }
        ImageFormat::Original => encode(img, ImageFormat::Png, quality, icc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, _| {
            Rgb([(x % 256) as u8, 64u8, 128u8])
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    fn decoded_dims(bytes: &[u8]) -> (u32, u32) {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .unwrap()
            .into_dimensions()
            .unwrap()
    }

    fn opts(w: Option<u32>, h: Option<u32>, f: Option<ImageFormat>, fit: Option<FitMode>) -> TransformOptions {
        TransformOptions {
            width: w,
            height: h,
            format: f,
            quality: None,
            fit,
        }
    }

    // ── Passthrough ──────────────────────────────────────────────

    #[test]
    fn empty_options_return_input_unchanged() {
        let input = png_bytes(20, 10);
        let out = optimize(&input, &TransformOptions::default()).unwrap();
        assert_eq!(out.bytes.as_ref(), input.as_slice());
        assert_eq!(out.content_type, "image/png");
        assert_eq!((out.width, out.height), (20, 10));
    }

    #[test]
    fn format_original_is_a_passthrough_too() {
        let input = png_bytes(20, 10);
        let out = optimize(&input, &opts(None, None, Some(ImageFormat::Original), None)).unwrap();
        assert_eq!(out.bytes.as_ref(), input.as_slice());
    }

    // ── Resize ───────────────────────────────────────────────────

    #[test]
    fn resize_inside_preserves_aspect() {
        let input = png_bytes(100, 50);
        let out = optimize(&input, &opts(Some(50), None, Some(ImageFormat::Png), None)).unwrap();
        assert_eq!((out.width, out.height), (50, 25));
        assert_eq!(decoded_dims(&out.bytes), (50, 25));
    }

    #[test]
    fn resize_never_upscales() {
        let input = png_bytes(100, 50);
        let out = optimize(&input, &opts(Some(500), Some(500), Some(ImageFormat::Png), None)).unwrap();
        assert_eq!((out.width, out.height), (100, 50));
    }

    #[test]
    fn fill_hits_the_exact_target() {
        let input = png_bytes(100, 50);
        let out = optimize(
            &input,
            &opts(Some(30), Some(30), Some(ImageFormat::Png), Some(FitMode::Fill)),
        )
        .unwrap();
        assert_eq!((out.width, out.height), (30, 30));
    }

    #[test]
    fn cover_fills_and_crops_to_target() {
        let input = png_bytes(100, 50);
        let out = optimize(
            &input,
            &opts(Some(40), Some(40), Some(ImageFormat::Png), Some(FitMode::Cover)),
        )
        .unwrap();
        assert_eq!((out.width, out.height), (40, 40));
    }

    #[test]
    fn outside_covers_both_dimensions_without_cropping() {
        let input = png_bytes(100, 50);
        let out = optimize(
            &input,
            &opts(Some(40), Some(40), Some(ImageFormat::Png), Some(FitMode::Outside)),
        )
        .unwrap();
        // Scale is max(40/100, 40/50) = 0.8 → 80x40.
        assert_eq!((out.width, out.height), (80, 40));
    }

    // ── Transcode ────────────────────────────────────────────────

    #[test]
    fn png_to_jpeg_transcode() {
        let input = png_bytes(32, 32);
        let out = optimize(&input, &opts(None, None, Some(ImageFormat::Jpeg), None)).unwrap();
        assert_eq!(out.content_type, "image/jpeg");
        let format = ImageReader::new(Cursor::new(out.bytes.as_ref()))
            .with_guessed_format()
            .unwrap()
            .format();
        assert_eq!(format, Some(image::ImageFormat::Jpeg));
    }

    #[test]
    fn png_to_webp_transcode() {
        let input = png_bytes(32, 32);
        let out = optimize(&input, &opts(None, None, Some(ImageFormat::Webp), None)).unwrap();
        assert_eq!(out.content_type, "image/webp");
        assert!(!out.bytes.is_empty());
    }

    #[test]
    fn resize_without_format_reencodes_in_source_format() {
        let input = png_bytes(64, 64);
        let out = optimize(&input, &opts(Some(32), None, None, None)).unwrap();
        assert_eq!(out.content_type, "image/png");
        assert_eq!(decoded_dims(&out.bytes), (32, 32));
    }

    // ── Failure modes ────────────────────────────────────────────

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = optimize(b"definitely not an image", &TransformOptions::default()).unwrap_err();
        assert!(matches!(err, OptimizeError::Decode(_)));
    }

    /// Minimal PNG claiming the given dimensions: signature, IHDR, and an
    /// empty IDAT so the header parser has a complete prefix to stop at.
    fn png_header_claiming(width: u32, height: u32) -> Vec<u8> {
        fn crc32(data: &[u8]) -> u32 {
            let mut crc = 0xFFFF_FFFFu32;
            for &b in data {
                crc ^= b as u32;
                for _ in 0..8 {
                    crc = if crc & 1 != 0 {
                        (crc >> 1) ^ 0xEDB8_8320
                    } else {
                        crc >> 1
                    };
                }
            }
            !crc
        }

        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(b"IHDR");
        ihdr.extend_from_slice(&width.to_be_bytes());
        ihdr.extend_from_slice(&height.to_be_bytes());
        ihdr.extend_from_slice(&[8, 2, 0, 0, 0]); // 8-bit RGB, no interlace

        let mut out = Vec::new();
        out.extend_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        out.extend_from_slice(&13u32.to_be_bytes());
        out.extend_from_slice(&ihdr);
        out.extend_from_slice(&crc32(&ihdr).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(b"IDAT");
        out.extend_from_slice(&crc32(b"IDAT").to_be_bytes());
        out
    }

    #[test]
    fn pixel_budget_is_enforced_before_any_decode() {
        // 20k x 20k = 4e8 claimed pixels, over the 2.68e8 budget. No pixel
        // data exists, so reaching the decoder would fail differently.
        let bomb = png_header_claiming(20_000, 20_000);
        let err = optimize(&bomb, &opts(Some(100), None, None, None)).unwrap_err();
        assert!(matches!(err, OptimizeError::TooLarge(p) if p == 400_000_000));
    }
}
