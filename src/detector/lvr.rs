use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::DetectorError;
use crate::types::{LiquidityWarning, LvrHealth, Snapshot, SpikeAlert};

/// Market-wide totals across every outcome seen in the cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarketLiquidity {
    pub volume_24h: f64,
    pub liquidity: f64,
}

/// Sums per-outcome volume and liquidity by market. A token repeated in the
/// batch contributes its last values once.
pub fn aggregate_by_market(snapshots: &[Snapshot]) -> HashMap<String, MarketLiquidity> {
    let mut per_token: HashMap<&str, HashMap<&str, (f64, f64)>> = HashMap::new();
    for s in snapshots {
        per_token
            .entry(s.market_id.as_str())
            .or_default()
            .insert(s.token_id.as_str(), (s.volume_24h, s.liquidity));
    }

    per_token
        .into_iter()
        .map(|(market_id, tokens)| {
            let totals = tokens.values().fold(MarketLiquidity::default(), |acc, (v, l)| {
                MarketLiquidity {
                    volume_24h: acc.volume_24h + v,
                    liquidity: acc.liquidity + l,
                }
            });
            (market_id.to_string(), totals)
        })
        .collect()
}

/// `volume_24h / liquidity`. `Ok(None)` when liquidity is zero or negative.
pub fn calculate_lvr(volume_24h: f64, liquidity: f64) -> Result<Option<f64>, DetectorError> {
    if !volume_24h.is_finite() {
        return Err(DetectorError::NonFinite { what: "volume_24h", value: volume_24h });
    }
    if !liquidity.is_finite() {
        return Err(DetectorError::NonFinite { what: "liquidity", value: liquidity });
    }
    if volume_24h < 0.0 {
        return Err(DetectorError::Negative { what: "volume_24h", value: volume_24h });
    }
    if liquidity <= 0.0 {
        return Ok(None);
    }
    Ok(Some(volume_24h / liquidity))
}

/// Escalates a same-cycle spike into a liquidity warning when the market's
/// LVR is strictly above `threshold`. Without a spike this never fires.
pub fn detect_liquidity_warning(
    spike: Option<&SpikeAlert>,
    market: &MarketLiquidity,
    threshold: f64,
) -> Result<Option<LiquidityWarning>, DetectorError> {
    let Some(spike) = spike else {
        return Ok(None);
    };

    let Some(lvr) = calculate_lvr(market.volume_24h, market.liquidity)? else {
        debug!(liquidity = market.liquidity, "[LVR] skip: no liquidity");
        return Ok(None);
    };

    if lvr <= threshold {
        return Ok(None);
    }

    let health = LvrHealth::from_lvr(lvr);
    info!(
        lvr,
        threshold,
        "[LVR] liquidity warning | lvr={lvr:.2} ({health}) | spike {:.1}% {}",
        spike.change_percent, spike.direction,
    );

    Ok(Some(LiquidityWarning {
        lvr,
        health,
        volume_24h: market.volume_24h,
        liquidity: market.liquidity,
        spike: spike.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use chrono::{TimeZone, Utc};

    fn spike() -> SpikeAlert {
        SpikeAlert {
            price_before: 0.40,
            price_after: 0.45,
            change_percent: 12.5,
            direction: Direction::Up,
        }
    }

    fn market(volume_24h: f64, liquidity: f64) -> MarketLiquidity {
        MarketLiquidity { volume_24h, liquidity }
    }

    fn snap(market_id: &str, token_id: &str, volume: f64, liquidity: f64) -> Snapshot {
        Snapshot {
            event_id: "e".to_string(),
            market_id: market_id.to_string(),
            outcome: "Yes".to_string(),
            token_id: token_id.to_string(),
            price: 0.5,
            volume_24h: volume,
            liquidity,
            is_closed: false,
            observed_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn high_lvr_with_spike_warns() {
        let w = detect_liquidity_warning(Some(&spike()), &market(125_000.0, 10_000.0), 8.0)
            .unwrap()
            .unwrap();
        assert!((w.lvr - 12.5).abs() < 1e-9);
        assert_eq!(w.health, LvrHealth::HighRisk);
        assert_eq!(w.health.to_string(), "High Risk");
        assert_eq!(w.spike, spike());
    }

    #[test]
    fn no_spike_never_warns() {
        for (v, l) in [(125_000.0, 10_000.0), (1e9, 1.0), (0.0, 0.0)] {
            assert!(detect_liquidity_warning(None, &market(v, l), 8.0).unwrap().is_none());
        }
    }

    #[test]
    fn lvr_at_threshold_is_silent() {
        assert!(detect_liquidity_warning(Some(&spike()), &market(80_000.0, 10_000.0), 8.0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn zero_liquidity_skips() {
        assert_eq!(calculate_lvr(1_000.0, 0.0).unwrap(), None);
        assert!(detect_liquidity_warning(Some(&spike()), &market(1_000.0, 0.0), 8.0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn negative_liquidity_skips() {
        assert_eq!(calculate_lvr(1_000.0, -5.0).unwrap(), None);
        assert!(detect_liquidity_warning(Some(&spike()), &market(1_000.0, -5.0), 8.0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn non_finite_aggregate_is_a_fault() {
        let err = calculate_lvr(1_000.0, f64::NAN).unwrap_err();
        assert!(matches!(err, DetectorError::NonFinite { what: "liquidity", .. }));
        let err = calculate_lvr(-1.0, 10.0).unwrap_err();
        assert!(matches!(err, DetectorError::Negative { what: "volume_24h", .. }));
    }

    #[test]
    fn aggregates_across_outcomes() {
        let batch = vec![
            snap("m1", "yes", 60_000.0, 4_000.0),
            snap("m1", "no", 65_000.0, 6_000.0),
            snap("m2", "yes", 10.0, 10.0),
        ];
        let totals = aggregate_by_market(&batch);
        let m1 = totals["m1"];
        assert!((m1.volume_24h - 125_000.0).abs() < 1e-9);
        assert!((m1.liquidity - 10_000.0).abs() < 1e-9);
        assert_eq!(calculate_lvr(m1.volume_24h, m1.liquidity).unwrap(), Some(12.5));
        assert_eq!(totals.len(), 2);
    }

    #[test]
    fn repeated_token_counts_once() {
        let batch = vec![snap("m1", "yes", 1.0, 1.0), snap("m1", "yes", 5.0, 2.0)];
        let totals = aggregate_by_market(&batch);
        assert_eq!(totals["m1"], market(5.0, 2.0));
    }
}
