use tracing::{debug, info};

use crate::error::DetectorError;
use crate::state::PreviousObservation;
use crate::types::{Direction, Snapshot, SpikeAlert};

/// Price spike against the previous poll: fires when
/// `|current - previous| / previous * 100` is strictly above `threshold`.
pub fn detect_spike(
    snapshot: &Snapshot,
    previous: &PreviousObservation,
    threshold: f64,
) -> Result<Option<SpikeAlert>, DetectorError> {
    if snapshot.is_closed {
        return Ok(None);
    }
    let Some(price_before) = previous.price else {
        debug!(token_id = %snapshot.token_id, "[SPIKE] skip: first observation");
        return Ok(None);
    };
    if price_before == 0.0 {
        debug!(token_id = %snapshot.token_id, "[SPIKE] skip: previous price is zero");
        return Ok(None);
    }

    let price_after = snapshot.price;
    let change = price_after - price_before;
    let change_percent = change.abs() / price_before * 100.0;
    if !change_percent.is_finite() {
        return Err(DetectorError::NonFinite {
            what: "change_percent",
            value: change_percent,
        });
    }

    if change_percent <= threshold {
        return Ok(None);
    }

    let direction = if change > 0.0 { Direction::Up } else { Direction::Down };

    info!(
        token_id = %snapshot.token_id,
        change_percent,
        "[SPIKE] {} [{}] {:.4} → {:.4} ({} {:.1}%)",
        snapshot.market_id, snapshot.outcome, price_before, price_after, direction, change_percent,
    );

    Ok(Some(SpikeAlert {
        price_before,
        price_after,
        change_percent,
        direction,
    }))
}
