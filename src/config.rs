use tracing::warn;

use crate::error::{AppError, Result};
use crate::types::{DetectorKind, DetectorSet};

/// Spike threshold in percent (strictly greater-than triggers).
pub const DEFAULT_SPIKE_THRESHOLD: f64 = 5.0;

/// 24h volume / liquidity ratio above which a spike escalates to a liquidity warning.
pub const DEFAULT_LVR_THRESHOLD: f64 = 8.0;

pub const DEFAULT_ZSCORE_THRESHOLD: f64 = 3.5;

/// Raw-MAD multiple for the price deviation detector.
pub const DEFAULT_MAD_MULTIPLIER: f64 = 3.0;

/// Observations a window needs before the statistical detectors trust it.
pub const WARMUP_MIN_OBSERVATIONS: usize = 30;

/// Converts a MAD into a normal-equivalent standard deviation.
pub const MAD_SCALE: f64 = 1.4826;

/// Channel capacity between the replay loop and the alert consumer.
pub const CHANNEL_CAPACITY: usize = 1024;

/// LVR health band edges. Lower edge of each band is inclusive.
pub mod lvr_bands {
    pub const ELEVATED_MIN: f64 = 2.0;
    pub const HIGH_RISK_MIN: f64 = 10.0;
}

/// Per-cycle detector thresholds. Immutable for the duration of a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub spike_threshold: f64,
    pub lvr_threshold: f64,
    pub zscore_threshold: f64,
    pub mad_multiplier: f64,
    pub warmup_min: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            spike_threshold: DEFAULT_SPIKE_THRESHOLD,
            lvr_threshold: DEFAULT_LVR_THRESHOLD,
            zscore_threshold: DEFAULT_ZSCORE_THRESHOLD,
            mad_multiplier: DEFAULT_MAD_MULTIPLIER,
            warmup_min: WARMUP_MIN_OBSERVATIONS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// JSON-lines file, one cycle (array of snapshots) per line (SNAPSHOT_PATH)
    pub snapshot_path: String,
    /// Pause between replayed cycles in milliseconds (REPLAY_INTERVAL_MS)
    pub replay_interval_ms: u64,
    pub thresholds: Thresholds,
    /// Resolved from DETECTORS: "all", "none", or a comma-separated list
    pub detectors: DetectorSet,
    /// Worker threads per cycle; 1 evaluates sequentially (WORKERS)
    pub workers: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let thresholds = Thresholds {
            spike_threshold: parse_or(&lookup, "SPIKE_THRESHOLD", DEFAULT_SPIKE_THRESHOLD)?,
            lvr_threshold: parse_or(&lookup, "LVR_THRESHOLD", DEFAULT_LVR_THRESHOLD)?,
            zscore_threshold: parse_or(&lookup, "ZSCORE_THRESHOLD", DEFAULT_ZSCORE_THRESHOLD)?,
            mad_multiplier: parse_or(&lookup, "MAD_MULTIPLIER", DEFAULT_MAD_MULTIPLIER)?,
            warmup_min: parse_or(&lookup, "WARMUP_MIN_OBSERVATIONS", WARMUP_MIN_OBSERVATIONS)?,
        };

        let cfg = Self {
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            snapshot_path: lookup("SNAPSHOT_PATH").unwrap_or_else(|| "snapshots.jsonl".to_string()),
            replay_interval_ms: parse_or(&lookup, "REPLAY_INTERVAL_MS", 0u64)?,
            thresholds,
            detectors: parse_detectors(lookup("DETECTORS").as_deref()),
            workers: parse_or(&lookup, "WORKERS", 1usize)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        let mut errors = Vec::new();

        if !(0.1..=100.0).contains(&t.spike_threshold) {
            errors.push("SPIKE_THRESHOLD must be between 0.1 and 100.0");
        }
        if !(0.1..=100.0).contains(&t.lvr_threshold) {
            errors.push("LVR_THRESHOLD must be between 0.1 and 100.0");
        }
        if !(t.zscore_threshold > 0.0 && t.zscore_threshold.is_finite()) {
            errors.push("ZSCORE_THRESHOLD must be a positive number");
        }
        if !(t.mad_multiplier > 0.0 && t.mad_multiplier.is_finite()) {
            errors.push("MAD_MULTIPLIER must be a positive number");
        }
        if t.warmup_min < 2 {
            errors.push("WARMUP_MIN_OBSERVATIONS must be at least 2");
        }
        if self.workers == 0 {
            errors.push("WORKERS must be at least 1");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config(errors.join("; ")))
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
    }
}

/// Resolves a detector selection string into a concrete set.
///
/// `None` and `"all"` enable every detector, `"none"` disables all of them,
/// anything else is a comma-separated list. Unknown names are dropped with a warning.
pub fn parse_detectors(value: Option<&str>) -> DetectorSet {
    let Some(raw) = value else {
        return DetectorSet::all();
    };

    match raw.trim().to_lowercase().as_str() {
        "all" => return DetectorSet::all(),
        "none" => return DetectorSet::none(),
        _ => {}
    }

    let mut set = DetectorSet::none();
    let mut invalid = Vec::new();
    for name in raw.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()) {
        match DetectorKind::parse(&name) {
            Some(kind) => set.insert(kind),
            None => invalid.push(name),
        }
    }

    if !invalid.is_empty() {
        invalid.sort();
        warn!("Invalid detector names ignored: {invalid:?}");
    }
    set
}
