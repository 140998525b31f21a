use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use polymarket_anomaly::config::{Config, CHANNEL_CAPACITY};
use polymarket_anomaly::detector::DetectorPipeline;
use polymarket_anomaly::error::{AppError, Result};
use polymarket_anomaly::source::SnapshotSource;
use polymarket_anomaly::state::StateStore;
use polymarket_anomaly::types::{AlertDetail, AlertEvent, DetectorKind};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let pipeline = Arc::new(
        DetectorPipeline::new(cfg.detectors.clone(), cfg.thresholds).with_workers(cfg.workers)?,
    );

    let enabled = pipeline.enabled();
    if enabled.is_empty() {
        warn!("DETECTORS=none: snapshots will be tracked but no alerts raised");
    } else {
        info!("Enabled detectors ({}): {}", enabled.len(), enabled);
    }
    let t = pipeline.thresholds();
    info!(
        "Thresholds: spike={}% lvr={} zscore={} mad×{} warmup={} | workers={}",
        t.spike_threshold, t.lvr_threshold, t.zscore_threshold, t.mad_multiplier, t.warmup_min,
        cfg.workers,
    );
    let store = StateStore::new();

    // --- Alert consumer ---
    let (alert_tx, alert_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let consumer = tokio::spawn(alert_consumer(alert_rx));

    // --- Replay loop ---
    let mut source = SnapshotSource::open(&cfg.snapshot_path).await?;
    info!("[REPLAY] reading cycles from {}", cfg.snapshot_path);

    let interval = Duration::from_millis(cfg.replay_interval_ms);
    let mut cycles: u64 = 0;
    let mut total_faults: usize = 0;

    loop {
        let next = tokio::select! {
            next = source.next_batch() => next?,
            _ = tokio::signal::ctrl_c() => {
                info!("[REPLAY] interrupted, shutting down");
                break;
            }
        };
        let Some(batch) = next else {
            info!("[REPLAY] end of input");
            break;
        };
        cycles += 1;

        let report = {
            let pipeline = Arc::clone(&pipeline);
            let store = Arc::clone(&store);
            tokio::task::spawn_blocking(move || pipeline.evaluate(&batch, &store)).await?
        };
        total_faults += report.faults;

        for alert in report.alerts {
            alert_tx
                .send(alert)
                .await
                .map_err(|e| AppError::ChannelSend(e.to_string()))?;
        }

        for event_id in &report.removed_events {
            info!(event_id = %event_id, "[REPLAY] event {event_id} fully closed, no longer tracked");
        }

        debug!(
            cycle = cycles,
            entities = store.len(),
            windows = %serde_json::to_string(&store.summaries(t.warmup_min)).unwrap_or_default(),
            "[REPLAY] window statistics",
        );

        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    drop(alert_tx);
    let counts = consumer.await?;

    info!(
        "Replay complete: {cycles} cycles | {} entities tracked | {} faults | {} alerts {}",
        store.len(),
        total_faults,
        counts.values().sum::<u64>(),
        format_counts(&counts),
    );
    if source.parse_failures() > 0 {
        warn!("[REPLAY] {} malformed cycles skipped", source.parse_failures());
    }

    Ok(())
}

/// Logs every alert and tallies them per detector until the sender side closes.
async fn alert_consumer(mut rx: mpsc::Receiver<AlertEvent>) -> HashMap<DetectorKind, u64> {
    let mut counts = HashMap::new();
    while let Some(alert) = rx.recv().await {
        log_alert(&alert);
        *counts.entry(alert.kind()).or_insert(0) += 1;
    }
    counts
}

fn format_counts(counts: &HashMap<DetectorKind, u64>) -> String {
    let parts: Vec<String> = DetectorKind::PIPELINE_ORDER
        .iter()
        .filter_map(|kind| counts.get(kind).map(|n| format!("{kind}={n}")))
        .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!("({})", parts.join(" "))
    }
}

fn log_alert(a: &AlertEvent) {
    match &a.detail {
        AlertDetail::Spike(s) => info!(
            event = "PRICE_SPIKE",
            token_id = %a.token_id,
            market_id = %a.market_id,
            change_percent = s.change_percent,
            "PRICE SPIKE  | {} {} | {:.4} → {:.4} ({} {:.2}%)",
            a.market_id, a.outcome, s.price_before, s.price_after, s.direction, s.change_percent,
        ),
        AlertDetail::LiquidityWarning(w) => warn!(
            event = "LIQUIDITY_WARNING",
            token_id = %a.token_id,
            market_id = %a.market_id,
            lvr = w.lvr,
            health = %w.health,
            "LIQUIDITY    | {} {} | LVR {:.2} ({}) | vol24h: ${:.0} | liq: ${:.0} | spike {:.2}%",
            a.market_id, a.outcome, w.lvr, w.health, w.volume_24h, w.liquidity, w.spike.change_percent,
        ),
        AlertDetail::ZScore(z) => info!(
            event = "VOLUME_ZSCORE",
            token_id = %a.token_id,
            market_id = %a.market_id,
            window = %z.window,
            zscore = z.zscore,
            "VOLUME Z     | {} {} | {} z={:.2} (threshold {}) | vol: {:.0} median: {:.0}",
            a.market_id, a.outcome, z.window, z.zscore, z.threshold, z.current_value, z.median,
        ),
        AlertDetail::Mad(m) => info!(
            event = "PRICE_MAD",
            token_id = %a.token_id,
            market_id = %a.market_id,
            window = %m.window,
            multiplier = m.multiplier,
            "PRICE MAD    | {} {} | {} {:.2}×MAD (threshold {}×) | price: {:.4} median: {:.4}",
            a.market_id, a.outcome, m.window, m.multiplier, m.threshold_multiplier, m.current_value, m.median,
        ),
        AlertDetail::Closed(c) => info!(
            event = "MARKET_CLOSED",
            token_id = %a.token_id,
            market_id = %a.market_id,
            "CLOSED       | {} {} | final price: {:.4}",
            a.market_id, a.outcome, c.final_price,
        ),
    }
}
