use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One poll observation for one outcome (CLOB token).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub event_id: String,
    pub market_id: String,
    pub outcome: String,
    pub token_id: String,
    /// Outcome price in [0, 1].
    pub price: f64,
    pub volume_24h: f64,
    pub liquidity: f64,
    #[serde(default)]
    pub is_closed: bool,
    pub observed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Detector kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Closed,
    Spike,
    Lvr,
    ZScore,
    Mad,
}

impl DetectorKind {
    /// Fixed evaluation order. Closed runs first so a terminal price never
    /// reports as a spike; Spike runs before Lvr because Lvr consumes its result.
    pub const PIPELINE_ORDER: [DetectorKind; 5] = [
        DetectorKind::Closed,
        DetectorKind::Spike,
        DetectorKind::Lvr,
        DetectorKind::ZScore,
        DetectorKind::Mad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Closed => "closed",
            DetectorKind::Spike => "spike",
            DetectorKind::Lvr => "lvr",
            DetectorKind::ZScore => "zscore",
            DetectorKind::Mad => "mad",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(DetectorKind::Closed),
            "spike" => Some(DetectorKind::Spike),
            "lvr" => Some(DetectorKind::Lvr),
            "zscore" => Some(DetectorKind::ZScore),
            "mad" => Some(DetectorKind::Mad),
            _ => None,
        }
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The set of detectors enabled for a cycle. `all`/`none` are resolved by
/// the config layer before a set ever reaches the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorSet(HashSet<DetectorKind>);

impl DetectorSet {
    pub fn all() -> Self {
        Self(DetectorKind::PIPELINE_ORDER.into_iter().collect())
    }

    pub fn none() -> Self {
        Self(HashSet::new())
    }

    pub fn contains(&self, kind: DetectorKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn insert(&mut self, kind: DetectorKind) {
        self.0.insert(kind);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Enabled kinds in pipeline order.
    pub fn ordered(&self) -> Vec<DetectorKind> {
        DetectorKind::PIPELINE_ORDER
            .into_iter()
            .filter(|k| self.0.contains(k))
            .collect()
    }
}

impl FromIterator<DetectorKind> for DetectorSet {
    fn from_iter<I: IntoIterator<Item = DetectorKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for DetectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = self.ordered().iter().map(|k| k.as_str()).collect();
        write!(f, "{}", names.join(","))
    }
}

// ---------------------------------------------------------------------------
// Classifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Health band for a 24h-volume / liquidity ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LvrHealth {
    /// lvr < 2.0
    Healthy,
    /// 2.0 <= lvr < 10.0
    Elevated,
    /// lvr >= 10.0
    HighRisk,
}

impl LvrHealth {
    pub fn from_lvr(lvr: f64) -> Self {
        use crate::config::lvr_bands::*;
        if lvr < ELEVATED_MIN {
            LvrHealth::Healthy
        } else if lvr < HIGH_RISK_MIN {
            LvrHealth::Elevated
        } else {
            LvrHealth::HighRisk
        }
    }
}

impl std::fmt::Display for LvrHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LvrHealth::Healthy => "Healthy",
            LvrHealth::Elevated => "Elevated",
            LvrHealth::HighRisk => "High Risk",
        };
        write!(f, "{s}")
    }
}

/// Trailing span of a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowSpan {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
}

impl WindowSpan {
    pub const ALL: [WindowSpan; 2] = [WindowSpan::OneHour, WindowSpan::FourHours];

    pub fn duration(&self) -> Duration {
        match self {
            WindowSpan::OneHour => Duration::hours(1),
            WindowSpan::FourHours => Duration::hours(4),
        }
    }
}

impl std::fmt::Display for WindowSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowSpan::OneHour => write!(f, "1h"),
            WindowSpan::FourHours => write!(f, "4h"),
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeAlert {
    pub price_before: f64,
    pub price_after: f64,
    pub change_percent: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityWarning {
    pub lvr: f64,
    pub health: LvrHealth,
    /// Market-wide sums across all outcomes in the cycle.
    pub volume_24h: f64,
    pub liquidity: f64,
    /// The spike on this outcome that gated the warning.
    pub spike: SpikeAlert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZScoreAlert {
    pub window: WindowSpan,
    pub current_value: f64,
    pub median: f64,
    pub mad: f64,
    pub zscore: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MadAlert {
    pub window: WindowSpan,
    pub current_value: f64,
    pub median: f64,
    pub mad: f64,
    /// How many raw MADs the current value sits from the median.
    pub multiplier: f64,
    pub threshold_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedAlert {
    pub final_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertDetail {
    Spike(SpikeAlert),
    LiquidityWarning(LiquidityWarning),
    ZScore(ZScoreAlert),
    Mad(MadAlert),
    Closed(ClosedAlert),
}

/// Output record handed to the delivery side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub event_id: String,
    pub market_id: String,
    pub outcome: String,
    pub token_id: String,
    pub detected_at: DateTime<Utc>,
    pub detail: AlertDetail,
}

impl AlertEvent {
    pub fn new(snapshot: &Snapshot, detail: AlertDetail) -> Self {
        Self {
            event_id: snapshot.event_id.clone(),
            market_id: snapshot.market_id.clone(),
            outcome: snapshot.outcome.clone(),
            token_id: snapshot.token_id.clone(),
            detected_at: snapshot.observed_at,
            detail,
        }
    }

    pub fn kind(&self) -> DetectorKind {
        match self.detail {
            AlertDetail::Spike(_) => DetectorKind::Spike,
            AlertDetail::LiquidityWarning(_) => DetectorKind::Lvr,
            AlertDetail::ZScore(_) => DetectorKind::ZScore,
            AlertDetail::Mad(_) => DetectorKind::Mad,
            AlertDetail::Closed(_) => DetectorKind::Closed,
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle output
// ---------------------------------------------------------------------------

/// Aggregate warm-up indicator. Never an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmupProgress {
    pub ready: usize,
    pub total: usize,
}

impl WarmupProgress {
    pub fn is_complete(&self) -> bool {
        self.ready == self.total
    }
}

impl std::fmt::Display for WarmupProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} entities ready", self.ready, self.total)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Alerts in generation order: batch order, then pipeline order per entity.
    pub alerts: Vec<AlertEvent>,
    /// Events whose outcomes all reported closed; their entities were dropped
    /// from the state store and should no longer be fetched.
    pub removed_events: Vec<String>,
    pub warmup: WarmupProgress,
    /// Entity/detector pairs that faulted this cycle.
    pub faults: usize,
}
