//! Lighting-dependent acceptance threshold.

use crate::quality;
use image::GrayImage;

const DARK_BRIGHTNESS: f64 = 50.0;
const BRIGHT_BRIGHTNESS: f64 = 200.0;
const DARK_FACTOR: f32 = 0.85;
const BRIGHT_FACTOR: f32 = 0.9;

/// Lowers the acceptance bar for badly lit images, where genuine matches
/// score lower. Disable it where false accepts cost more than false rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPolicy {
    pub adaptive: bool,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self { adaptive: true }
    }
}

impl ThresholdPolicy {
    /// Threshold for this image given the caller's base threshold.
    pub fn acceptance_threshold(&self, image: &GrayImage, base: f32) -> f32 {
        self.threshold_for_brightness(quality::mean_brightness(image), base)
    }

    pub fn threshold_for_brightness(&self, brightness: f64, base: f32) -> f32 {
        if !self.adaptive {
            return base;
        }
        let adjusted = if brightness < DARK_BRIGHTNESS {
            base * DARK_FACTOR
        } else if brightness > BRIGHT_BRIGHTNESS {
            base * BRIGHT_FACTOR
        } else {
            base
        };
        if adjusted != base {
            tracing::debug!(brightness, base, adjusted, "acceptance threshold lowered for lighting");
        }
        adjusted
    }
}
