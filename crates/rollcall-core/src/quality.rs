//! Image quality gate: blur, exposure and contrast checks run before any
//! extraction or matching work.

use image::GrayImage;
use serde::Serialize;
use std::fmt;

const MIN_SHARPNESS: f64 = 100.0;
const MIN_BRIGHTNESS: f64 = 20.0;
const MAX_BRIGHTNESS: f64 = 200.0;
const MIN_CONTRAST: f64 = 30.0;

/// Scalar diagnostics computed from a greyscale image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityReport {
    /// Variance of the 4-neighbour Laplacian response (blur proxy).
    pub sharpness: f64,
    /// Mean pixel intensity (0.0–255.0).
    pub brightness: f64,
    /// Standard deviation of pixel intensity.
    pub contrast: f64,
}

/// Why an image was judged unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    TooBlurry,
    TooDark,
    TooBright,
    LowContrast,
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            QualityIssue::TooBlurry => "too blurry",
            QualityIssue::TooDark => "too dark",
            QualityIssue::TooBright => "too bright",
            QualityIssue::LowContrast => "low contrast",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum QualityVerdict {
    Pass,
    Fail(QualityIssue),
}

/// Report plus verdict, kept together so advisory callers can surface both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityAssessment {
    pub report: QualityReport,
    pub verdict: QualityVerdict,
}

impl QualityAssessment {
    pub fn passed(&self) -> bool {
        self.verdict == QualityVerdict::Pass
    }

    pub fn issue(&self) -> Option<QualityIssue> {
        match self.verdict {
            QualityVerdict::Pass => None,
            QualityVerdict::Fail(issue) => Some(issue),
        }
    }
}

/// Compute sharpness, brightness and contrast for a greyscale image.
pub fn measure(image: &GrayImage) -> QualityReport {
    let (brightness, contrast) = mean_and_std(image);
    QualityReport {
        sharpness: laplacian_variance(image),
        brightness,
        contrast,
    }
}

/// Judge an image usable or not. Checks run blur → exposure → contrast and
/// the first failure is reported.
pub fn assess_quality(image: &GrayImage) -> QualityAssessment {
    let report = measure(image);
    let verdict = judge(&report);
    tracing::debug!(
        sharpness = report.sharpness,
        brightness = report.brightness,
        contrast = report.contrast,
        ?verdict,
        "quality assessed"
    );
    QualityAssessment { report, verdict }
}

fn judge(report: &QualityReport) -> QualityVerdict {
    if report.sharpness <= MIN_SHARPNESS {
        QualityVerdict::Fail(QualityIssue::TooBlurry)
    } else if report.brightness <= MIN_BRIGHTNESS {
        QualityVerdict::Fail(QualityIssue::TooDark)
    } else if report.brightness >= MAX_BRIGHTNESS {
        QualityVerdict::Fail(QualityIssue::TooBright)
    } else if report.contrast <= MIN_CONTRAST {
        QualityVerdict::Fail(QualityIssue::LowContrast)
    } else {
        QualityVerdict::Pass
    }
}

/// Mean brightness only; used by the threshold policy.
pub fn mean_brightness(image: &GrayImage) -> f64 {
    mean_and_std(image).0
}

fn mean_and_std(image: &GrayImage) -> (f64, f64) {
    let pixels = image.as_raw();
    if pixels.is_empty() {
        return (0.0, 0.0);
    }
    let n = pixels.len() as f64;
    let mean = pixels.iter().map(|&p| p as f64).sum::<f64>() / n;
    let variance = pixels
        .iter()
        .map(|&p| (p as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

/// Variance of the 3×3 Laplacian `[0 1 0; 1 -4 1; 0 1 0]` over interior pixels.
///
/// Images smaller than 3×3 have no interior and report 0.0.
fn laplacian_variance(image: &GrayImage) -> f64 {
    let (w, h) = image.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let w = w as usize;
    let h = h as usize;
    let px = image.as_raw();
    let at = |x: usize, y: usize| px[y * w + x] as f64;

    let count = ((w - 2) * (h - 2)) as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let response =
                at(x, y - 1) + at(x - 1, y) + at(x + 1, y) + at(x, y + 1) - 4.0 * at(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }

    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checkerboard(size: u32, low: u8, high: u8) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([low])
            } else {
                Luma([high])
            }
        })
    }

    #[test]
    fn test_sharp_wellexposed_image_passes() {
        let img = checkerboard(32, 0, 255);
        let assessment = assess_quality(&img);
        assert!(assessment.passed(), "{assessment:?}");
        assert!(assessment.report.sharpness > MIN_SHARPNESS);
    }

    #[test]
    fn test_uniform_image_is_blurry() {
        let img = GrayImage::from_pixel(32, 32, Luma([128]));
        let assessment = assess_quality(&img);
        assert_eq!(assessment.issue(), Some(QualityIssue::TooBlurry));
        assert!(assessment.report.sharpness.abs() < 1e-9);
    }

    #[test]
    fn test_dark_image() {
        // Sharp but mean brightness 10
        let img = checkerboard(32, 0, 20);
        assert_eq!(assess_quality(&img).issue(), Some(QualityIssue::TooDark));
    }

    #[test]
    fn test_bright_image() {
        let img = checkerboard(32, 220, 250);
        assert_eq!(assess_quality(&img).issue(), Some(QualityIssue::TooBright));
    }

    #[test]
    fn test_low_contrast_image() {
        // Mean 120, std 20
        let img = checkerboard(32, 100, 140);
        let assessment = assess_quality(&img);
        assert_eq!(assessment.issue(), Some(QualityIssue::LowContrast));
        assert!((assessment.report.contrast - 20.0).abs() < 1e-6);
        assert!((assessment.report.brightness - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_tiny_image_has_no_sharpness() {
        let img = GrayImage::from_pixel(2, 2, Luma([90]));
        assert_eq!(measure(&img).sharpness, 0.0);
    }

    #[test]
    fn test_issue_messages() {
        assert_eq!(QualityIssue::TooBlurry.to_string(), "too blurry");
        assert_eq!(QualityIssue::LowContrast.to_string(), "low contrast");
    }
}
