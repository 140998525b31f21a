use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::config::Thresholds;
use crate::detector::closed::{detect_closed, fully_closed_events};
use crate::detector::lvr::{aggregate_by_market, detect_liquidity_warning, MarketLiquidity};
use crate::detector::mad::detect_mad;
use crate::detector::spike::detect_spike;
use crate::detector::zscore::detect_zscore;
use crate::error::DetectorError;
use crate::state::entity_state::validate_snapshot;
use crate::state::StateStore;
use crate::types::{
    AlertDetail, AlertEvent, CycleReport, DetectorKind, DetectorSet, Snapshot, WindowSpan,
};

/// Alerts and fault count produced for one snapshot.
#[derive(Debug, Default)]
struct EntityOutcome {
    alerts: Vec<AlertEvent>,
    faults: usize,
}

/// Runs the enabled detectors over one poll cycle's snapshots.
///
/// Per snapshot: record into the entity's state, then Closed, Spike, Lvr,
/// ZScore, Mad in that order. A detector fault is logged and counted and
/// never stops the rest of the batch.
pub struct DetectorPipeline {
    enabled: DetectorSet,
    thresholds: Thresholds,
    /// Present when the caller asked for more than one worker.
    pool: Option<ThreadPool>,
}

impl DetectorPipeline {
    pub fn new(enabled: DetectorSet, thresholds: Thresholds) -> Self {
        Self {
            enabled,
            thresholds,
            pool: None,
        }
    }

    /// Spreads entities over `workers` threads. Output order is unchanged.
    pub fn with_workers(mut self, workers: usize) -> Result<Self, ThreadPoolBuildError> {
        self.pool = if workers > 1 {
            Some(ThreadPoolBuilder::new().num_threads(workers).build()?)
        } else {
            None
        };
        Ok(self)
    }

    pub fn enabled(&self) -> &DetectorSet {
        &self.enabled
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Evaluates one cycle. Alerts come back in batch order, then pipeline
    /// order within each snapshot; the result is the same with or without workers.
    pub fn evaluate(&self, snapshots: &[Snapshot], store: &StateStore) -> CycleReport {
        let markets = aggregate_by_market(snapshots);

        let outcomes = match &self.pool {
            Some(pool) => self.evaluate_partitioned(pool, snapshots, &markets, store),
            None => snapshots
                .iter()
                .map(|s| self.evaluate_entity(s, &markets, store))
                .collect(),
        };

        let mut report = CycleReport::default();
        for outcome in outcomes {
            report.alerts.extend(outcome.alerts);
            report.faults += outcome.faults;
        }

        if self.enabled.contains(DetectorKind::Closed) {
            for event_id in fully_closed_events(snapshots) {
                let tokens = store.token_ids_for_event(&event_id);
                let removed = store.remove_event(&event_id);
                if removed > 0 {
                    info!(
                        event_id = %event_id,
                        removed,
                        "[PIPELINE] all outcomes closed, dropping event {event_id} | tokens={tokens:?}",
                    );
                    report.removed_events.push(event_id);
                }
            }
        }

        report.warmup = store.warmup_progress(self.thresholds.warmup_min);
        if !report.warmup.is_complete() {
            info!(
                ready = report.warmup.ready,
                total = report.warmup.total,
                "[PIPELINE] warm-up: {} (need {} observations)",
                report.warmup, self.thresholds.warmup_min,
            );
        }

        debug!(
            snapshots = snapshots.len(),
            alerts = report.alerts.len(),
            removed = report.removed_events.len(),
            faults = report.faults,
            "[PIPELINE] cycle complete",
        );
        report
    }

    /// Buckets snapshots by token so each entity is handled by exactly one
    /// worker in batch order, then restores batch order across buckets.
    fn evaluate_partitioned(
        &self,
        pool: &ThreadPool,
        snapshots: &[Snapshot],
        markets: &HashMap<String, MarketLiquidity>,
        store: &StateStore,
    ) -> Vec<EntityOutcome> {
        let workers = pool.current_num_threads().max(1);
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); workers];
        for (idx, snapshot) in snapshots.iter().enumerate() {
            buckets[bucket_for(&snapshot.token_id, workers)].push(idx);
        }

        let mut tagged: Vec<(usize, EntityOutcome)> = pool.install(|| {
            buckets
                .par_iter()
                .flat_map_iter(|indices| {
                    indices
                        .iter()
                        .map(|&idx| (idx, self.evaluate_entity(&snapshots[idx], markets, store)))
                        .collect::<Vec<_>>()
                })
                .collect()
        });

        tagged.sort_by_key(|(idx, _)| *idx);
        tagged.into_iter().map(|(_, outcome)| outcome).collect()
    }

    fn evaluate_entity(
        &self,
        snapshot: &Snapshot,
        markets: &HashMap<String, MarketLiquidity>,
        store: &StateStore,
    ) -> EntityOutcome {
        let mut out = EntityOutcome::default();

        if let Err(e) = validate_snapshot(snapshot) {
            warn!(token_id = %snapshot.token_id, "[PIPELINE] rejected snapshot: {e}");
            out.faults += 1;
            return out;
        }

        // Nothing to transition from and nothing left to detect on.
        if snapshot.is_closed && !store.contains(&snapshot.token_id) {
            debug!(token_id = %snapshot.token_id, "[PIPELINE] skip untracked closed outcome");
            return out;
        }

        // The guard is held until every detector for this entity has run.
        let mut entity = store.entry_for(snapshot);
        let previous = match entity.record(snapshot) {
            Ok(previous) => previous,
            Err(e) => {
                warn!(token_id = %snapshot.token_id, "[PIPELINE] rejected snapshot: {e}");
                out.faults += 1;
                return out;
            }
        };

        let t = &self.thresholds;
        let mut spike = None;

        for kind in self.enabled.ordered() {
            match kind {
                DetectorKind::Closed => {
                    let result = detect_closed(snapshot, &previous);
                    self.collect(kind, snapshot, result.map(|a| a.map(AlertDetail::Closed)), &mut out);
                }
                DetectorKind::Spike => {
                    let result = detect_spike(snapshot, &previous, t.spike_threshold);
                    if let Ok(Some(alert)) = &result {
                        spike = Some(alert.clone());
                    }
                    self.collect(kind, snapshot, result.map(|a| a.map(AlertDetail::Spike)), &mut out);
                }
                DetectorKind::Lvr => {
                    let market = markets.get(&snapshot.market_id).copied().unwrap_or_default();
                    let result = detect_liquidity_warning(spike.as_ref(), &market, t.lvr_threshold);
                    self.collect(
                        kind,
                        snapshot,
                        result.map(|a| a.map(AlertDetail::LiquidityWarning)),
                        &mut out,
                    );
                }
                DetectorKind::ZScore => {
                    for span in WindowSpan::ALL {
                        let result =
                            detect_zscore(&entity, snapshot, span, t.zscore_threshold, t.warmup_min);
                        self.collect(kind, snapshot, result.map(|a| a.map(AlertDetail::ZScore)), &mut out);
                    }
                }
                DetectorKind::Mad => {
                    for span in WindowSpan::ALL {
                        let result =
                            detect_mad(&entity, snapshot, span, t.mad_multiplier, t.warmup_min);
                        self.collect(kind, snapshot, result.map(|a| a.map(AlertDetail::Mad)), &mut out);
                    }
                }
            }
        }

        out
    }

    fn collect(
        &self,
        kind: DetectorKind,
        snapshot: &Snapshot,
        result: Result<Option<AlertDetail>, DetectorError>,
        out: &mut EntityOutcome,
    ) {
        match result {
            Ok(Some(detail)) => out.alerts.push(AlertEvent::new(snapshot, detail)),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    token_id = %snapshot.token_id,
                    market_id = %snapshot.market_id,
                    detector = %kind,
                    "[PIPELINE] {kind} detector fault on {}: {e}",
                    snapshot.token_id,
                );
                out.faults += 1;
            }
        }
    }
}

fn bucket_for(token_id: &str, buckets: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token_id.hash(&mut hasher);
    (hasher.finish() % buckets as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LvrHealth;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(cycle: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(cycle)
    }

    fn snap(event: &str, token: &str, price: f64, cycle: i64) -> Snapshot {
        Snapshot {
            event_id: event.to_string(),
            market_id: format!("{event}-m"),
            outcome: token.to_string(),
            token_id: token.to_string(),
            price,
            volume_24h: 1_000.0,
            liquidity: 1_000.0,
            is_closed: false,
            observed_at: at(cycle),
        }
    }

    fn pipeline(enabled: DetectorSet) -> DetectorPipeline {
        DetectorPipeline::new(enabled, Thresholds::default())
    }

    fn kinds(report: &CycleReport) -> Vec<DetectorKind> {
        report.alerts.iter().map(|a| a.kind()).collect()
    }

    #[test]
    fn spike_then_liquidity_warning_end_to_end() {
        let store = StateStore::new();
        let p = pipeline(DetectorSet::all());

        let first = p.evaluate(&[snap("e1", "yes", 0.40, 0)], &store);
        assert!(first.alerts.is_empty());

        let mut current = snap("e1", "yes", 0.45, 1);
        current.volume_24h = 125_000.0;
        current.liquidity = 10_000.0;
        let report = p.evaluate(&[current], &store);

        assert_eq!(kinds(&report), vec![DetectorKind::Spike, DetectorKind::Lvr]);
        match &report.alerts[0].detail {
            AlertDetail::Spike(s) => assert!((s.change_percent - 12.5).abs() < 1e-9),
            other => panic!("expected spike, got {other:?}"),
        }
        match &report.alerts[1].detail {
            AlertDetail::LiquidityWarning(w) => {
                assert!((w.lvr - 12.5).abs() < 1e-9);
                assert_eq!(w.health, LvrHealth::HighRisk);
                assert_eq!(w.health.to_string(), "High Risk");
            }
            other => panic!("expected liquidity warning, got {other:?}"),
        }
        assert_eq!(report.faults, 0);
    }

    #[test]
    fn lvr_never_fires_with_spike_disabled() {
        let store = StateStore::new();
        let p = pipeline([DetectorKind::Lvr].into_iter().collect());

        p.evaluate(&[snap("e1", "yes", 0.40, 0)], &store);
        let mut current = snap("e1", "yes", 0.45, 1);
        current.volume_24h = 1e9;
        current.liquidity = 1.0;
        let report = p.evaluate(&[current], &store);
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn closed_fires_once_and_suppresses_spike() {
        let store = StateStore::new();
        let p = pipeline(DetectorSet::all());

        // Two outcomes keep the event tracked while one of them closes.
        p.evaluate(&[snap("e1", "a", 0.40, 0), snap("e1", "b", 0.60, 0)], &store);

        let mut closed = snap("e1", "a", 1.0, 1);
        closed.is_closed = true;
        let report = p.evaluate(&[closed.clone(), snap("e1", "b", 0.60, 1)], &store);
        assert_eq!(kinds(&report), vec![DetectorKind::Closed]);
        match &report.alerts[0].detail {
            AlertDetail::Closed(c) => assert!((c.final_price - 1.0).abs() < 1e-9),
            other => panic!("expected closed, got {other:?}"),
        }
        assert!(report.removed_events.is_empty());

        for cycle in 2..5 {
            let mut again = closed.clone();
            again.observed_at = at(cycle);
            let report = p.evaluate(&[again, snap("e1", "b", 0.60, cycle)], &store);
            assert!(report.alerts.is_empty(), "cycle {cycle}: {:?}", report.alerts);
        }
    }

    #[test]
    fn fully_closed_event_is_removed_and_reported_once() {
        let store = StateStore::new();
        let p = pipeline(DetectorSet::all());
        p.evaluate(&[snap("e1", "a", 0.4, 0), snap("e2", "c", 0.5, 0)], &store);

        let mut closed = snap("e1", "a", 0.0, 1);
        closed.is_closed = true;
        let report = p.evaluate(&[closed.clone(), snap("e2", "c", 0.5, 1)], &store);
        assert_eq!(report.removed_events, vec!["e1".to_string()]);
        assert!(!store.contains("a"));
        assert!(store.contains("c"));

        // The scheduler may still send it once more; that is a no-op.
        closed.observed_at = at(2);
        let report = p.evaluate(&[closed], &store);
        assert!(report.alerts.is_empty());
        assert!(report.removed_events.is_empty());
    }

    #[test]
    fn closed_disabled_keeps_entities() {
        let store = StateStore::new();
        let p = pipeline([DetectorKind::Spike].into_iter().collect());
        p.evaluate(&[snap("e1", "a", 0.4, 0)], &store);
        let mut closed = snap("e1", "a", 1.0, 1);
        closed.is_closed = true;
        let report = p.evaluate(&[closed], &store);
        assert!(report.alerts.is_empty());
        assert!(report.removed_events.is_empty());
        assert!(store.contains("a"));
    }

    #[test]
    fn flat_prices_then_jump_produce_no_mad_alert() {
        let store = StateStore::new();
        let p = pipeline([DetectorKind::Mad].into_iter().collect());
        for cycle in 0..30 {
            p.evaluate(&[snap("e1", "a", 0.50, cycle)], &store);
        }
        let report = p.evaluate(&[snap("e1", "a", 0.80, 30)], &store);
        assert!(report.alerts.is_empty());
        assert_eq!(report.faults, 0);
    }

    #[test]
    fn bad_snapshot_is_isolated_from_the_rest_of_the_batch() {
        let store = StateStore::new();
        let p = pipeline(DetectorSet::all());
        p.evaluate(&[snap("e1", "a", 0.40, 0), snap("e2", "b", 0.40, 0)], &store);

        let bad = snap("e1", "a", f64::NAN, 1);
        let report = p.evaluate(&[bad, snap("e2", "b", 0.60, 1)], &store);

        assert_eq!(report.faults, 1);
        assert_eq!(kinds(&report), vec![DetectorKind::Spike]);
        assert_eq!(report.alerts[0].token_id, "b");
        // Entity "a" kept its previous price and is retried next cycle.
        assert_eq!(store.get("a").unwrap().previous().price, Some(0.40));
    }

    #[test]
    fn detector_fault_does_not_stop_later_detectors() {
        let store = StateStore::new();
        let p = pipeline(DetectorSet::all());
        p.evaluate(&[snap("e1", "a", 0.40, 0)], &store);

        let mut current = snap("e1", "a", 0.60, 1);
        current.liquidity = f64::NAN;
        let report = p.evaluate(&[current], &store);
        assert_eq!(report.faults, 1);
        assert_eq!(kinds(&report), vec![DetectorKind::Spike]);
    }

    #[test]
    fn negative_liquidity_is_skipped_not_faulted() {
        let store = StateStore::new();
        let p = pipeline(DetectorSet::all());
        p.evaluate(&[snap("e1", "a", 0.40, 0)], &store);

        let mut current = snap("e1", "a", 0.60, 1);
        current.liquidity = -1.0;
        let report = p.evaluate(&[current], &store);
        assert_eq!(report.faults, 0);
        assert_eq!(kinds(&report), vec![DetectorKind::Spike]);
    }

    #[test]
    fn out_of_order_snapshot_is_a_fault_and_keeps_state() {
        let store = StateStore::new();
        let p = pipeline(DetectorSet::all());
        p.evaluate(&[snap("e1", "a", 0.40, 300), snap("e2", "b", 0.40, 300)], &store);

        let report = p.evaluate(&[snap("e1", "a", 0.90, 0), snap("e2", "b", 0.60, 301)], &store);
        assert_eq!(report.faults, 1);
        assert_eq!(kinds(&report), vec![DetectorKind::Spike]);
        assert_eq!(report.alerts[0].token_id, "b");

        let a = store.get("a").unwrap();
        assert_eq!(a.previous().price, Some(0.40));
        assert_eq!(a.observations(), 1);
    }

    #[test]
    fn invalid_first_snapshot_creates_no_state() {
        let store = StateStore::new();
        let p = pipeline(DetectorSet::all());
        let report = p.evaluate(&[snap("e1", "a", 2.0, 0)], &store);
        assert_eq!(report.faults, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn warmup_progress_is_reported() {
        let store = StateStore::new();
        let p = pipeline(DetectorSet::all());
        let mut report = CycleReport::default();
        for cycle in 0..30 {
            let mut batch = vec![snap("e1", "a", 0.5, cycle)];
            if cycle >= 10 {
                batch.push(snap("e2", "b", 0.5, cycle));
            }
            report = p.evaluate(&batch, &store);
        }
        assert_eq!(report.warmup.total, 2);
        assert_eq!(report.warmup.ready, 1);
        assert_eq!(report.warmup.to_string(), "1/2 entities ready");
    }

    #[test]
    fn parallel_matches_sequential_order() {
        let tokens: Vec<String> = (0..16).map(|i| format!("tok{i}")).collect();
        let batch = |cycle: i64, price: f64| -> Vec<Snapshot> {
            tokens
                .iter()
                .map(|t| snap("e1", t, price, cycle))
                .collect()
        };

        let seq_store = StateStore::new();
        let seq = pipeline(DetectorSet::all());
        seq.evaluate(&batch(0, 0.40), &seq_store);
        let seq_report = seq.evaluate(&batch(1, 0.60), &seq_store);

        let par_store = StateStore::new();
        let par = pipeline(DetectorSet::all()).with_workers(4).unwrap();
        par.evaluate(&batch(0, 0.40), &par_store);
        let par_report = par.evaluate(&batch(1, 0.60), &par_store);

        assert_eq!(seq_report.alerts.len(), 16);
        assert_eq!(seq_report.alerts, par_report.alerts);
        let order: Vec<&str> = par_report.alerts.iter().map(|a| a.token_id.as_str()).collect();
        let expected: Vec<&str> = tokens.iter().map(String::as_str).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn repeated_token_in_batch_applies_in_order() {
        let store = StateStore::new();
        let p = pipeline([DetectorKind::Spike].into_iter().collect());
        let report = p.evaluate(
            &[snap("e1", "a", 0.40, 0), snap("e1", "a", 0.50, 1)],
            &store,
        );
        assert_eq!(kinds(&report), vec![DetectorKind::Spike]);
        assert_eq!(store.get("a").unwrap().previous().price, Some(0.50));
    }
}
