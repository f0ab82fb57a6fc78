use anyhow::{anyhow, Result};
use rollcall_core::{ExtractorKind, GalleryMatcher, QualityPolicy, ThresholdPolicy};
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Feature extraction strategy.
    pub extractor: ExtractorKind,
    /// Base acceptance threshold before lighting adjustment.
    pub match_threshold: f32,
    /// Lower the threshold for dark or overexposed images.
    pub adaptive_threshold: bool,
    /// Whether a failed quality check blocks check-in.
    pub quality_gate: QualityPolicy,
    /// Weight scores by embedding variance during the gallery scan.
    pub confidence_weighting: bool,
    /// Wall-clock budget for one gallery scan; 0 disables it.
    pub scan_budget_ms: u64,
    /// Gallery size at which the scan runs in parallel.
    pub parallel_scan_min: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let model_dir = var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(rollcall_core::default_model_dir);

        let db_path = var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| rollcall_core::data_dir().join("rollcall.db"));

        let extractor = match var("ROLLCALL_EXTRACTOR") {
            Some(v) => v.parse::<ExtractorKind>().map_err(|e| anyhow!("ROLLCALL_EXTRACTOR: {e}"))?,
            None => ExtractorKind::Embedding,
        };
        let quality_gate = match var("ROLLCALL_QUALITY_GATE") {
            Some(v) => v.parse::<QualityPolicy>().map_err(|e| anyhow!("ROLLCALL_QUALITY_GATE: {e}"))?,
            None => QualityPolicy::Advisory,
        };

        Ok(Self {
            model_dir,
            db_path,
            extractor,
            match_threshold: parse_or(var("ROLLCALL_MATCH_THRESHOLD"), 0.5),
            adaptive_threshold: flag(var("ROLLCALL_ADAPTIVE_THRESHOLD")),
            quality_gate,
            confidence_weighting: flag(var("ROLLCALL_CONFIDENCE_WEIGHTING")),
            scan_budget_ms: parse_or(var("ROLLCALL_SCAN_BUDGET_MS"), 2000),
            parallel_scan_min: parse_or(var("ROLLCALL_PARALLEL_SCAN_MIN"), 512),
        })
    }

    pub fn matcher(&self) -> GalleryMatcher {
        GalleryMatcher {
            weighting: self.confidence_weighting,
            parallel_min: self.parallel_scan_min,
            budget: (self.scan_budget_ms > 0).then(|| Duration::from_millis(self.scan_budget_ms)),
        }
    }

    pub fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy {
            adaptive: self.adaptive_threshold,
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// On unless set to "0".
fn flag(value: Option<String>) -> bool {
    value.map(|v| v != "0").unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.extractor, ExtractorKind::Embedding);
        assert_eq!(config.quality_gate, QualityPolicy::Advisory);
        assert_eq!(config.match_threshold, 0.5);
        assert!(config.adaptive_threshold);
        assert!(config.confidence_weighting);

        let matcher = config.matcher();
        assert_eq!(matcher.budget, Some(Duration::from_millis(2000)));
        assert_eq!(matcher.parallel_min, 512);
        assert!(config.model_dir.ends_with("rollcall/models"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("ROLLCALL_DB_PATH", "/var/lib/rollcall/school.db"),
            ("ROLLCALL_EXTRACTOR", "histogram"),
            ("ROLLCALL_QUALITY_GATE", "enforced"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.6"),
            ("ROLLCALL_ADAPTIVE_THRESHOLD", "0"),
            ("ROLLCALL_SCAN_BUDGET_MS", "0"),
        ])
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/rollcall/school.db"));
        assert_eq!(config.extractor, ExtractorKind::Histogram);
        assert_eq!(config.quality_gate, QualityPolicy::Enforced);
        assert_eq!(config.match_threshold, 0.6);
        assert!(!config.threshold_policy().adaptive);
        assert_eq!(config.matcher().budget, None);
    }

    #[test]
    fn test_bad_numbers_fall_back() {
        let config = load(&[
            ("ROLLCALL_MATCH_THRESHOLD", "high"),
            ("ROLLCALL_PARALLEL_SCAN_MIN", "-3"),
        ])
        .unwrap();
        assert_eq!(config.match_threshold, 0.5);
        assert_eq!(config.parallel_scan_min, 512);
    }

    #[test]
    fn test_bad_enums_are_errors() {
        assert!(load(&[("ROLLCALL_EXTRACTOR", "haar")]).is_err());
        assert!(load(&[("ROLLCALL_QUALITY_GATE", "sometimes")]).is_err());
    }
}
