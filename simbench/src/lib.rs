//! Deterministic load scenarios for the ghost snapshot sender.
//!
//! This crate provides:
//!
//! - A seeded world of moving units, static props, bursts and churn
//! - Per-connection packet loss with acks flowing back from decoding clients
//! - End-of-run verification that every client matches the world
//! - A JSON summary of packet sizes, tick times and retries
//!
//! # Design Principles
//!
//! - **Reproducible** - All scenarios are deterministic given a seed.
//! - **End to end** - Packets go through the real transport and client path.
//! - **Measurable** - Output format suitable for CI regression tracking.

mod rng;
mod scenario;
mod summary;

pub use rng::Rng;
pub use scenario::{registry, Scenario, ScenarioConfig};
pub use summary::Summary;
