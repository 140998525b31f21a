use tracing::{debug, info};

use crate::error::DetectorError;
use crate::state::{EntityState, Metric};
use crate::types::{MadAlert, Snapshot, WindowSpan};

/// Raw-MAD deviation of the current price against one price window:
/// fires when `|price - median| > multiplier * mad`. Unlike the z-score there
/// is no 1.4826 scaling here.
pub fn detect_mad(
    state: &EntityState,
    snapshot: &Snapshot,
    span: WindowSpan,
    multiplier: f64,
    warmup_min: usize,
) -> Result<Option<MadAlert>, DetectorError> {
    if snapshot.is_closed {
        return Ok(None);
    }

    let window = state.window(Metric::Price, span);
    if !window.is_warm(warmup_min) {
        debug!(
            token_id = %snapshot.token_id,
            "[MAD] skip {span}: warming up ({}/{warmup_min})",
            window.count(),
        );
        return Ok(None);
    }

    let Some((median, mad)) = window.median_and_mad() else {
        return Ok(None);
    };
    if mad == 0.0 {
        debug!(token_id = %snapshot.token_id, "[MAD] skip {span}: zero MAD");
        return Ok(None);
    }

    let current_value = snapshot.price;
    let deviation = (current_value - median).abs();
    if !deviation.is_finite() {
        return Err(DetectorError::NonFinite { what: "deviation", value: deviation });
    }
    if deviation <= multiplier * mad {
        return Ok(None);
    }

    let actual = deviation / mad;
    info!(
        token_id = %snapshot.token_id,
        multiplier = actual,
        "[MAD] {} price/{span} {actual:.2}×MAD (threshold={multiplier})",
        snapshot.market_id,
    );

    Ok(Some(MadAlert {
        window: span,
        current_value,
        median,
        mad,
        multiplier: actual,
        threshold_multiplier: multiplier,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(i)
    }

    fn snap(price: f64, i: i64) -> Snapshot {
        Snapshot {
            event_id: "e".to_string(),
            market_id: "m".to_string(),
            outcome: "Yes".to_string(),
            token_id: "t".to_string(),
            price,
            volume_24h: 100.0,
            liquidity: 1_000.0,
            is_closed: false,
            observed_at: at(i),
        }
    }

    fn seeded(series: &[f64]) -> (EntityState, Snapshot) {
        let mut state = EntityState::new(&snap(series[0], 0));
        let mut last = snap(series[0], 0);
        for (i, p) in series.iter().enumerate() {
            last = snap(*p, i as i64);
            state.record(&last).unwrap();
        }
        (state, last)
    }

    #[test]
    fn flat_series_then_jump_skips_on_zero_mad() {
        let mut series = vec![0.50; 30];
        series.push(0.80);
        let (state, last) = seeded(&series);
        assert_eq!(state.window(Metric::Price, WindowSpan::OneHour).mad(), Some(0.0));
        assert!(detect_mad(&state, &last, WindowSpan::OneHour, 3.0, 30).unwrap().is_none());
        assert!(detect_mad(&state, &last, WindowSpan::FourHours, 3.0, 30).unwrap().is_none());
    }

    #[test]
    fn fires_beyond_raw_mad_multiple() {
        // 15 × 0.50, 14 × 0.52, then 0.70: median 0.51, MAD 0.01, deviation 0.19.
        let mut series = vec![0.50; 15];
        series.extend(std::iter::repeat(0.52).take(14));
        series.push(0.70);
        let (state, last) = seeded(&series);

        let alert = detect_mad(&state, &last, WindowSpan::OneHour, 3.0, 30).unwrap().unwrap();
        assert!((alert.median - 0.51).abs() < 1e-9);
        assert!((alert.mad - 0.01).abs() < 1e-9);
        assert!((alert.multiplier - 19.0).abs() < 1e-6);
        assert!((alert.threshold_multiplier - 3.0).abs() < 1e-12);
    }

    #[test]
    fn raw_mad_comparison_is_unscaled() {
        // deviation 0.025 vs MAD 0.01 is 2.5 raw MADs (1.69 scaled).
        // Silent at 3.0; fires at 2.0, which a scaled comparison would not.
        let mut series = vec![0.50; 15];
        series.extend(std::iter::repeat(0.52).take(14));
        series.push(0.535);
        let (state, last) = seeded(&series);
        assert!(detect_mad(&state, &last, WindowSpan::OneHour, 3.0, 30).unwrap().is_none());
        assert!(detect_mad(&state, &last, WindowSpan::OneHour, 2.0, 30).unwrap().is_some());
    }

    #[test]
    fn silent_before_warmup_even_for_huge_deviation() {
        let mut series = vec![0.50; 14];
        series.extend(std::iter::repeat(0.52).take(14));
        series.push(0.99);
        let (state, last) = seeded(&series);
        assert!(detect_mad(&state, &last, WindowSpan::OneHour, 3.0, 30).unwrap().is_none());
    }
}
