use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use codec::GhostSendConfig;
use simbench::{Scenario, ScenarioConfig, Summary};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "simbench",
    version,
    about = "ghost snapshot replication benchmark harness"
)]
struct Cli {
    /// Number of client connections.
    #[arg(long, default_value_t = 4)]
    connections: u32,
    /// Number of moving units.
    #[arg(long, default_value_t = 256)]
    units: usize,
    /// Number of static props.
    #[arg(long, default_value_t = 64)]
    props: usize,
    /// Entities per chunk.
    #[arg(long, default_value_t = 32)]
    per_chunk: usize,
    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 300)]
    ticks: u32,
    /// Lossless ticks before verification.
    #[arg(long, default_value_t = 32)]
    settle_ticks: u32,
    /// RNG seed for deterministic results.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Percent of packets dropped before reaching a client.
    #[arg(long, default_value_t = 5)]
    loss_percent: u32,
    /// Destroy and respawn one unit every N ticks.
    #[arg(long)]
    churn_every: Option<u32>,
    /// Damage every unit every N ticks.
    #[arg(long)]
    burst_every: Option<u32>,
    /// Scale chunk importance by distance to each connection's viewer.
    #[arg(long)]
    distance_scaling: bool,
    /// Maximum chunks per packet, 0 for unlimited.
    #[arg(long, default_value_t = 0)]
    max_chunks: usize,
    /// Maximum entities per packet, 0 for unlimited.
    #[arg(long, default_value_t = 0)]
    max_entities: usize,
    /// First packet size tried each tick.
    #[arg(long, default_value_t = 1200)]
    packet_size: usize,
    /// Output directory for summary.json.
    #[arg(long, default_value = "target/simbench")]
    out_dir: PathBuf,
    /// Fail if p95 packet size exceeds this value.
    #[arg(long)]
    max_p95_bytes: Option<u64>,
    /// Fail if average packet size exceeds this value.
    #[arg(long)]
    max_avg_bytes: Option<u64>,
}

impl Cli {
    fn scenario(&self) -> ScenarioConfig {
        let send = GhostSendConfig {
            max_chunks_per_tick: self.max_chunks,
            max_entities_per_tick: self.max_entities,
            default_packet_size: self.packet_size,
            ..GhostSendConfig::default()
        };
        ScenarioConfig {
            connections: self.connections,
            units: self.units,
            props: self.props,
            per_chunk: self.per_chunk,
            ticks: self.ticks,
            settle_ticks: self.settle_ticks,
            seed: self.seed,
            loss_percent: self.loss_percent.min(100),
            churn_every: self.churn_every,
            burst_every: self.burst_every,
            distance_scaling: self.distance_scaling,
            send,
        }
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("create output dir {}", cli.out_dir.display()))?;

    let summary = Scenario::new(cli.scenario())?.run()?;
    write_summary_json(&cli.out_dir, &summary)?;
    summary.assert_budgets(cli.max_p95_bytes, cli.max_avg_bytes)?;
    Ok(())
}

fn write_summary_json(out_dir: &Path, summary: &Summary) -> Result<()> {
    let path = out_dir.join("summary.json");
    let contents = serde_json::to_string_pretty(summary).context("serialize summary")?;
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
