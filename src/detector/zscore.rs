use tracing::{debug, info};

use crate::error::DetectorError;
use crate::state::{EntityState, Metric};
use crate::stats::robust_zscore;
use crate::types::{Snapshot, WindowSpan, ZScoreAlert};

/// Robust z-score of the current 24h volume against one volume window.
///
/// The window already holds the current observation. Skips silently until the
/// window has `warmup_min` entries, and when the window's MAD is zero.
pub fn detect_zscore(
    state: &EntityState,
    snapshot: &Snapshot,
    span: WindowSpan,
    threshold: f64,
    warmup_min: usize,
) -> Result<Option<ZScoreAlert>, DetectorError> {
    if snapshot.is_closed {
        return Ok(None);
    }

    let window = state.window(Metric::Volume, span);
    if !window.is_warm(warmup_min) {
        debug!(
            token_id = %snapshot.token_id,
            "[ZSCORE] skip {span}: warming up ({}/{warmup_min})",
            window.count(),
        );
        return Ok(None);
    }

    let Some((median, mad)) = window.median_and_mad() else {
        return Ok(None);
    };
    let current_value = snapshot.volume_24h;
    let Some(zscore) = robust_zscore(current_value, median, mad) else {
        debug!(token_id = %snapshot.token_id, "[ZSCORE] skip {span}: zero MAD");
        return Ok(None);
    };
    if !zscore.is_finite() {
        return Err(DetectorError::NonFinite { what: "zscore", value: zscore });
    }

    if zscore.abs() <= threshold {
        return Ok(None);
    }

    info!(
        token_id = %snapshot.token_id,
        zscore,
        "[ZSCORE] {} volume/{span} z={zscore:.2} (threshold={threshold})",
        snapshot.market_id,
    );

    Ok(Some(ZScoreAlert {
        window: span,
        current_value,
        median,
        mad,
        zscore,
        threshold,
    }))
}
