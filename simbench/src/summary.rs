//! Aggregated results of a scenario run.

use anyhow::{bail, Result};
use serde::Serialize;
use server::{SendOutcome, TickReport};
use wire::ChannelKind;

/// Totals and percentiles written to `summary.json`.
#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub connections: u32,
    pub units: usize,
    pub props: usize,
    pub ticks: u32,
    pub seed: u64,
    pub loss_percent: u32,
    pub churn_every: Option<u32>,
    pub burst_every: Option<u32>,
    pub packets_sent: u64,
    pub fragmented_packets: u64,
    pub bytes_total: u64,
    pub avg_packet_bytes: u64,
    pub p95_packet_bytes: u64,
    pub max_packet_bytes: u64,
    pub avg_tick_us: u64,
    pub p95_tick_us: u64,
    /// Packet attempts beyond the first, summed over all sends.
    pub retries: u64,
    pub failures: u64,
    pub gave_up: u64,
    pub entities_written: u64,
    pub partial_chunks: u64,
    pub oversized_chunks: u64,
    pub despawns_sent: u64,
    pub recycled_ids: u64,
    pub pre_serialized_chunks: u64,
    pub dropped_packets: u64,
    pub decode_errors: u64,
    /// Field values a client disagrees on after the settle ticks.
    pub mismatches: u64,
    /// Ghosts a client still holds that left the world.
    pub stale_ghosts: u64,
    #[serde(skip)]
    packet_sizes: Vec<u64>,
    #[serde(skip)]
    tick_us: Vec<u64>,
}

impl Summary {
    /// Folds one tick's report into the totals.
    pub fn record_tick(&mut self, report: &TickReport, elapsed_us: u64) {
        self.tick_us.push(elapsed_us);
        self.recycled_ids += report.recycled_ids as u64;
        self.pre_serialized_chunks += report.pre_serialized_chunks as u64;
        for conn in &report.connections {
            match &conn.outcome {
                SendOutcome::Sent(stats) => {
                    let bytes = stats.bytes as u64;
                    self.packets_sent += 1;
                    self.bytes_total += bytes;
                    self.max_packet_bytes = self.max_packet_bytes.max(bytes);
                    self.packet_sizes.push(bytes);
                    self.retries += stats.attempts.saturating_sub(1) as u64;
                    self.entities_written += stats.entities as u64;
                    self.partial_chunks += stats.partial_chunks as u64;
                    self.oversized_chunks += stats.oversized_chunks as u64;
                    self.despawns_sent += stats.despawns as u64;
                    if stats.channel == Some(ChannelKind::Fragmented) {
                        self.fragmented_packets += 1;
                    }
                }
                SendOutcome::GaveUp { attempts } => {
                    self.gave_up += 1;
                    self.retries += attempts.saturating_sub(1) as u64;
                }
                SendOutcome::Failed(_) => self.failures += 1,
                SendOutcome::NotInGame => {}
            }
        }
    }

    pub fn finalize(&mut self) {
        if self.packets_sent > 0 {
            self.avg_packet_bytes = self.bytes_total / self.packets_sent;
            self.p95_packet_bytes = p95(&mut self.packet_sizes);
        }
        if !self.tick_us.is_empty() {
            let total: u64 = self.tick_us.iter().sum();
            self.avg_tick_us = total / self.tick_us.len() as u64;
            self.p95_tick_us = p95(&mut self.tick_us);
        }
    }

    /// Fails when a size budget is exceeded or a client diverged.
    pub fn assert_budgets(&self, max_p95: Option<u64>, max_avg: Option<u64>) -> Result<()> {
        if let Some(max_p95) = max_p95 {
            if self.p95_packet_bytes > max_p95 {
                bail!(
                    "p95 packet bytes {} exceeds budget {}",
                    self.p95_packet_bytes,
                    max_p95
                );
            }
        }
        if let Some(max_avg) = max_avg {
            if self.avg_packet_bytes > max_avg {
                bail!(
                    "avg packet bytes {} exceeds budget {}",
                    self.avg_packet_bytes,
                    max_avg
                );
            }
        }
        if self.mismatches > 0 || self.stale_ghosts > 0 {
            bail!(
                "clients diverged: {} mismatched fields, {} stale ghosts",
                self.mismatches,
                self.stale_ghosts
            );
        }
        Ok(())
    }
}

fn p95(values: &mut [u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    let idx = (values.len() * 95).div_ceil(100);
    values[idx.saturating_sub(1).min(values.len() - 1)]
}
