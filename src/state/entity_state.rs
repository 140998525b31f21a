use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StateError;
use crate::stats::{RollingWindow, WindowSummary};
use crate::types::{Snapshot, WindowSpan};

/// Which observed series a window tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Price,
    Volume,
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Price => write!(f, "price"),
            Metric::Volume => write!(f, "volume"),
        }
    }
}

/// The "previous" fields as they stood before the current cycle's `record`.
/// Both are `None` for an entity seen for the first time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PreviousObservation {
    pub price: Option<f64>,
    pub is_closed: Option<bool>,
}

/// Cross-cycle state for one outcome / CLOB token.
#[derive(Debug, Clone)]
pub struct EntityState {
    pub event_id: String,
    pub market_id: String,
    pub outcome: String,
    pub token_id: String,
    previous_price: Option<f64>,
    previous_closed: Option<bool>,
    price_1h: RollingWindow,
    price_4h: RollingWindow,
    volume_1h: RollingWindow,
    volume_4h: RollingWindow,
    observations: u64,
    last_observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub token_id: String,
    pub market_id: String,
    pub observations: u64,
    pub last_observed_at: Option<DateTime<Utc>>,
    pub price_1h: WindowSummary,
    pub price_4h: WindowSummary,
    pub volume_1h: WindowSummary,
    pub volume_4h: WindowSummary,
}

impl EntityState {
    pub fn new(snapshot: &Snapshot) -> Self {
        Self {
            event_id: snapshot.event_id.clone(),
            market_id: snapshot.market_id.clone(),
            outcome: snapshot.outcome.clone(),
            token_id: snapshot.token_id.clone(),
            previous_price: None,
            previous_closed: None,
            price_1h: RollingWindow::new(WindowSpan::OneHour.duration()),
            price_4h: RollingWindow::new(WindowSpan::FourHours.duration()),
            volume_1h: RollingWindow::new(WindowSpan::OneHour.duration()),
            volume_4h: RollingWindow::new(WindowSpan::FourHours.duration()),
            observations: 0,
            last_observed_at: None,
        }
    }

    pub fn previous(&self) -> PreviousObservation {
        PreviousObservation {
            price: self.previous_price,
            is_closed: self.previous_closed,
        }
    }

    /// The single update point per cycle. Validates the snapshot, then moves the
    /// previous fields forward and appends to every window as one step.
    /// Returns the previous fields as they were before this call.
    /// On error nothing is mutated, including for a snapshot older than the
    /// last accepted one.
    pub fn record(&mut self, snapshot: &Snapshot) -> Result<PreviousObservation, StateError> {
        validate_snapshot(snapshot)?;
        if let Some(last_observed_at) = self.last_observed_at {
            if snapshot.observed_at < last_observed_at {
                return Err(StateError::StaleSnapshot {
                    token_id: snapshot.token_id.clone(),
                    observed_at: snapshot.observed_at,
                    last_observed_at,
                });
            }
        }

        let previous = self.previous();
        let at = snapshot.observed_at;

        self.price_1h.insert(at, snapshot.price);
        self.price_4h.insert(at, snapshot.price);
        self.volume_1h.insert(at, snapshot.volume_24h);
        self.volume_4h.insert(at, snapshot.volume_24h);

        self.previous_price = Some(snapshot.price);
        self.previous_closed = Some(snapshot.is_closed);
        self.observations += 1;
        self.last_observed_at = Some(at);

        Ok(previous)
    }

    pub fn window(&self, metric: Metric, span: WindowSpan) -> &RollingWindow {
        match (metric, span) {
            (Metric::Price, WindowSpan::OneHour) => &self.price_1h,
            (Metric::Price, WindowSpan::FourHours) => &self.price_4h,
            (Metric::Volume, WindowSpan::OneHour) => &self.volume_1h,
            (Metric::Volume, WindowSpan::FourHours) => &self.volume_4h,
        }
    }

    /// Ready once every window has at least `min_observations` live entries.
    pub fn is_warm(&self, min_observations: usize) -> bool {
        [&self.price_1h, &self.price_4h, &self.volume_1h, &self.volume_4h]
            .iter()
            .all(|w| w.is_warm(min_observations))
    }

    /// Lifetime count of accepted snapshots.
    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn summary(&self, min_observations: usize) -> EntitySummary {
        EntitySummary {
            token_id: self.token_id.clone(),
            market_id: self.market_id.clone(),
            observations: self.observations,
            last_observed_at: self.last_observed_at,
            price_1h: self.price_1h.summary(min_observations),
            price_4h: self.price_4h.summary(min_observations),
            volume_1h: self.volume_1h.summary(min_observations),
            volume_4h: self.volume_4h.summary(min_observations),
        }
    }
}

/// Rejects values that must never reach the windows or the previous fields.
pub fn validate_snapshot(snapshot: &Snapshot) -> Result<(), StateError> {
    let reason = if !snapshot.price.is_finite() {
        Some(format!("price is not finite ({})", snapshot.price))
    } else if !(0.0..=1.0).contains(&snapshot.price) {
        Some(format!("price {} outside [0, 1]", snapshot.price))
    } else if !snapshot.volume_24h.is_finite() {
        Some(format!("volume_24h is not finite ({})", snapshot.volume_24h))
    } else if snapshot.volume_24h < 0.0 {
        Some(format!("volume_24h is negative ({})", snapshot.volume_24h))
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StateError::InvalidSnapshot {
            token_id: snapshot.token_id.clone(),
            reason,
        }),
        None => Ok(()),
    }
}
