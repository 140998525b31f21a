//! Multi-detector anomaly pipeline for prediction-market snapshots.
//!
//! Each poll cycle hands a batch of [`types::Snapshot`]s to
//! [`detector::DetectorPipeline::evaluate`], which updates the per-token
//! [`state::StateStore`] and returns the cycle's alerts in a stable order.

pub mod config;
pub mod detector;
pub mod error;
pub mod source;
pub mod state;
pub mod stats;
pub mod types;
