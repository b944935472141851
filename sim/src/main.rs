// Copyright (c) 2022-2023 The MobileCoin Foundation

use clap::Parser;
use log::{debug, info, LevelFilter};

use dbb_sim::*;

/// Mock pairing relay server
///
/// Serves the relay protocol locally for use with `dbb-cli pair --relay-url`
/// or integration tests. Payloads may be queued for the host with `--push`.
#[derive(Clone, Debug, PartialEq, Parser)]
pub struct Args {
    /// Port to listen on (0 for an ephemeral port)
    #[clap(long, default_value = "8080")]
    port: u16,

    /// Queue a base64 payload for delivery (`CHANNEL:PAYLOAD`)
    #[clap(long)]
    push: Vec<String>,

    /// Log level
    #[clap(long, default_value = "debug")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging
    let mut c = simplelog::ConfigBuilder::new();
    c.add_filter_allow_str("dbb_sim");

    let _ = simplelog::SimpleLogger::init(args.log_level, c.build());

    // Start relay
    let r = MockRelay::start(args.port).await?;
    info!("Relay running at: {}", r.url());

    for p in &args.push {
        let (channel, payload) = p
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("invalid push argument '{}'", p))?;
        r.push(channel, payload);
    }

    // Exit on ctrl + c
    tokio::signal::ctrl_c().await?;
    debug!("Exit!");

    for q in r.requests() {
        debug!("{:?}", q);
    }

    Ok(())
}
