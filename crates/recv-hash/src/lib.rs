//! Content hashing and image quality heuristics (C1).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use image::{GenericImageView, imageops::FilterType};
use recv_config::QualityConfig;
use recv_error::{ErrorCode, PipelineError};
use sha2::{Digest, Sha256};

/// The side length, in pixels, that a decoded image is down-sampled to
/// before any heuristic runs. Keeps the cost of the heuristics bounded
/// regardless of the original image's resolution.
const DOWNSAMPLE_MAX_SIDE: u32 = 512;

/// Compute the lowercase hex SHA-256 digest of `bytes`.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// The three sub-scores behind a [`QualityReport`], each in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySubScores {
    /// Sharpness sub-score (higher is sharper).
    pub blur: f64,
    /// Glare sub-score (higher is less glare).
    pub glare: f64,
    /// Contrast sub-score (higher is more contrast).
    pub contrast: f64,
}

/// Result of running the quality heuristic against a decoded image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReport {
    /// The individual sub-scores.
    pub sub_scores: QualitySubScores,
    /// The weighted combination, in `[0, 100]`.
    pub quality_score: f64,
}

/// Linearly interpolate `value` between `zero_at` (maps to 0) and
/// `hundred_at` (maps to 100), clamping to `[0, 100]`. Works for both
/// increasing (`zero_at < hundred_at`) and decreasing curves.
fn saturating_scale(value: f64, zero_at: f64, hundred_at: f64) -> f64 {
    if (hundred_at - zero_at).abs() < f64::EPSILON {
        return 0.0;
    }
    let t = (value - zero_at) / (hundred_at - zero_at);
    (t * 100.0).clamp(0.0, 100.0)
}

/// Decode `bytes` as an image and compute its [`QualityReport`].
///
/// # Errors
///
/// Returns [`ErrorCode::DecodeFailed`] if `bytes` cannot be decoded as an
/// image by any registered codec.
pub fn assess_quality(bytes: &[u8], config: &QualityConfig) -> Result<QualityReport, PipelineError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::new(ErrorCode::DecodeFailed, "image decode failed").with_source(e))?;

    let (w, h) = img.dimensions();
    let scale = f64::from(DOWNSAMPLE_MAX_SIDE) / f64::from(w.max(h).max(1));
    let luma = if scale < 1.0 {
        let nw = ((f64::from(w) * scale).round() as u32).max(1);
        let nh = ((f64::from(h) * scale).round() as u32).max(1);
        img.resize_exact(nw, nh, FilterType::Triangle).to_luma8()
    } else {
        img.to_luma8()
    };

    let (lw, lh) = luma.dimensions();
    let pixels: Vec<f64> = luma.pixels().map(|p| f64::from(p.0[0])).collect();
    let n = pixels.len() as f64;

    let mean = pixels.iter().sum::<f64>() / n.max(1.0);
    let variance = pixels.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n.max(1.0);
    let stddev = variance.sqrt();

    let glare_count = pixels.iter().filter(|&&v| v >= 245.0).count() as f64;
    let glare_fraction = glare_count / n.max(1.0);

    let laplacian_variance = laplacian_variance(&pixels, lw as usize, lh as usize);

    let blur = saturating_scale(laplacian_variance, config.blur_floor, config.blur_ceiling);
    let glare = saturating_scale(
        glare_fraction,
        config.glare_floor_fraction,
        config.glare_ceiling_fraction,
    );
    let contrast = saturating_scale(stddev, config.contrast_floor, config.contrast_ceiling);

    let quality_score = (config.blur_weight * blur
        + config.glare_weight * glare
        + config.contrast_weight * contrast)
        .clamp(0.0, 100.0);

    Ok(QualityReport {
        sub_scores: QualitySubScores { blur, glare, contrast },
        quality_score,
    })
}

/// Variance of a 3x3 Laplacian convolution over a row-major luminance grid.
fn laplacian_variance(pixels: &[f64], w: usize, h: usize) -> f64 {
    if w < 3 || h < 3 {
        return 0.0;
    }
    let at = |x: usize, y: usize| pixels[y * w + x];
    let mut responses = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let v = -4.0 * at(x, y) + at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1);
            responses.push(v);
        }
    }
    let n = responses.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_64_hex_chars_and_deterministic() {
        let a = content_hash(b"hello");
        let b = content_hash(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn content_hash_differs_for_different_bytes() {
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }

    #[test]
    fn saturating_scale_clamps_outside_range() {
        assert_eq!(saturating_scale(0.0, 20.0, 500.0), 0.0);
        assert_eq!(saturating_scale(1000.0, 20.0, 500.0), 100.0);
    }

    #[test]
    fn saturating_scale_handles_decreasing_curve() {
        // Glare: higher fraction -> lower score.
        let score = saturating_scale(0.005, 0.05, 0.005);
        assert_eq!(score, 100.0);
        let score_bad = saturating_scale(0.05, 0.05, 0.005);
        assert_eq!(score_bad, 0.0);
    }

    #[test]
    fn flat_white_image_has_low_blur_and_high_glare_fraction() {
        let img = image::RgbImage::from_pixel(40, 40, image::Rgb([255, 255, 255]));
        let mut bytes: Vec<u8> = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let report = assess_quality(&bytes, &QualityConfig::default()).unwrap();
        // A flat image has zero Laplacian variance and zero contrast.
        assert_eq!(report.sub_scores.blur, 0.0);
        assert_eq!(report.sub_scores.contrast, 0.0);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = assess_quality(b"not an image", &QualityConfig::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::DecodeFailed);
    }
}
