use std::collections::HashMap;

use tracing::info;

use crate::error::DetectorError;
use crate::state::PreviousObservation;
use crate::types::{ClosedAlert, Snapshot};

/// Open → Closed transition for one outcome. Fires only when the entity was
/// last seen open and is now closed, so it fires once per outcome. An entity
/// whose very first observation is already closed has no open state to leave.
pub fn detect_closed(
    snapshot: &Snapshot,
    previous: &PreviousObservation,
) -> Result<Option<ClosedAlert>, DetectorError> {
    if !snapshot.is_closed || previous.is_closed != Some(false) {
        return Ok(None);
    }

    info!(
        token_id = %snapshot.token_id,
        market_id = %snapshot.market_id,
        final_price = snapshot.price,
        "[CLOSED] {} [{}] closed | final_price={:.4}",
        snapshot.market_id, snapshot.outcome, snapshot.price,
    );

    Ok(Some(ClosedAlert {
        final_price: snapshot.price,
    }))
}

/// Events where every snapshot in the batch reports closed, in order of first appearance.
pub fn fully_closed_events(snapshots: &[Snapshot]) -> Vec<String> {
    let mut order = Vec::new();
    let mut all_closed: HashMap<&str, bool> = HashMap::new();

    for snapshot in snapshots {
        let entry = all_closed.entry(snapshot.event_id.as_str()).or_insert_with(|| {
            order.push(snapshot.event_id.as_str());
            true
        });
        *entry &= snapshot.is_closed;
    }

    order
        .into_iter()
        .filter(|id| all_closed.get(id).copied().unwrap_or(false))
        .map(str::to_string)
        .collect()
}
