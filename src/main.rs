//! filter-bench - WebSocket subscription filtering benchmark
//!
//! Thin CLI over the benchmark engine: parse flags and environment, start
//! tracing, run one scenario, print the summary for the harness to scrape.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use tracing::info;

use filter_bench::config::RunConfig;
use filter_bench::runner;

#[derive(Parser, Debug)]
#[command(name = "filter-bench")]
#[command(about = "WebSocket subscription filtering benchmark", long_about = None)]
struct Args {
    /// WebSocket host
    #[arg(long, env = "WS_HOST", default_value = "127.0.0.1")]
    ws_host: String,

    /// WebSocket port (443 selects TLS)
    #[arg(long, env = "WS_PORT", default_value = "443")]
    ws_port: u16,

    /// Application key
    #[arg(long, env = "APP_KEY", default_value = "app-key")]
    app_key: String,

    /// Channel name
    #[arg(long, env = "CHANNEL", default_value = "filtered_events_v1")]
    channel: String,

    /// Scenario (1-5)
    #[arg(long, env = "SCENARIO", default_value = "1")]
    scenario: u8,

    /// Filter value pool JSON file
    #[arg(long, env = "ADDRESS_FILE", default_value = "addresses.json")]
    address_file: PathBuf,

    /// Filter update interval in milliseconds (scenario 2)
    #[arg(long, env = "FILTER_UPDATE_INTERVAL", default_value = "5000")]
    filter_update_interval: u64,

    /// Target number of clients
    #[arg(long, env = "NUM_CLIENTS", default_value = "1000")]
    num_clients: usize,

    /// Seconds to ramp up to the target client count
    #[arg(long, env = "RAMP_DURATION", default_value = "30")]
    ramp_duration: u64,

    /// Warm-up seconds after ramp-up (data metrics discarded)
    #[arg(long, env = "WARMUP_DURATION", default_value = "0")]
    warmup_duration: u64,

    /// Seconds to hold at the target client count
    #[arg(long, env = "HOLD_DURATION", default_value = "60")]
    hold_duration: u64,

    /// Seconds to ramp back down
    #[arg(long, env = "RAMP_DOWN_DURATION", default_value = "10")]
    ramp_down_duration: u64,

    /// Extra seconds before stragglers are forcibly terminated
    #[arg(long, env = "GRACE_PERIOD", default_value = "15")]
    grace_period: u64,

    /// Transport connect timeout in milliseconds
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "10000")]
    connect_timeout_ms: u64,

    /// Subscribe/update ack timeout in milliseconds
    #[arg(long, env = "SUBSCRIBE_TIMEOUT_MS", default_value = "10000")]
    subscribe_timeout_ms: u64,

    /// Client id offset for multi-machine benchmarking
    #[arg(long, env = "CLIENT_ID_OFFSET", default_value = "0")]
    client_id_offset: usize,
}

impl Args {
    fn into_config(self) -> RunConfig {
        RunConfig {
            ws_host: self.ws_host,
            ws_port: self.ws_port,
            app_key: self.app_key,
            channel: self.channel,
            scenario: self.scenario,
            num_clients: self.num_clients,
            ramp_up_secs: self.ramp_duration,
            warmup_secs: self.warmup_duration,
            hold_secs: self.hold_duration,
            ramp_down_secs: self.ramp_down_duration,
            grace_secs: self.grace_period,
            connect_timeout_ms: self.connect_timeout_ms,
            subscribe_timeout_ms: self.subscribe_timeout_ms,
            filter_update_interval_ms: self.filter_update_interval,
            client_id_offset: self.client_id_offset,
            address_file: Some(self.address_file),
            wire: Default::default(),
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("filter_bench=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(
        host = %args.ws_host,
        port = args.ws_port,
        channel = %args.channel,
        scenario = args.scenario,
        clients = args.num_clients,
        ramp_secs = args.ramp_duration,
        hold_secs = args.hold_duration,
        "filter_bench_start"
    );

    let summary = runner::run(args.into_config()).await?;

    println!("{}", summary);
    Ok(())
}
