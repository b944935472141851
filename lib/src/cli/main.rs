// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command line utility for interacting with the signing device

use clap::Parser;
use log::{debug, info, warn, LevelFilter};

use dbb::{
    dbb_core::pairing::{PairingIdentity, PairingKey},
    proto::{
        command::{DeviceAction, LedAction, RandomMode},
        relay::RELAY_URL,
        Command,
    },
    firmware::KeypressReplug,
    DeviceProvider, Executor, FirmwareUpgrade, RelayChannel, RelayConfig, UpgradeConfig,
};

mod helpers;
use helpers::*;

/// Signing device command line utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Device index (where more than one device is available)
    #[clap(long, default_value = "0")]
    device_index: usize,

    /// Device password, commands are sent in plaintext when unset
    #[clap(long, env = "DBB_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Enable verbose logging
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, PartialEq, Debug, Parser)]
#[non_exhaustive]
enum Actions {
    /// List available devices
    List,

    /// Probe device mode
    Probe,

    /// Ping the device
    Ping,

    /// Toggle the device LED
    Led,

    /// Fetch device info
    DeviceInfo,

    /// Fetch a random value from the device
    GetRandom {
        /// Use the pseudo random generator
        #[clap(long)]
        pseudo: bool,
    },

    /// Send a raw JSON command
    Raw {
        /// JSON command object
        json: String,
    },

    /// Upgrade device firmware
    Upgrade {
        /// Firmware file
        file: String,

        /// Firmware file has no signature block
        #[clap(long)]
        unsigned: bool,

        /// Verify against a dummy signature (development firmware)
        #[clap(long)]
        dummy_signature: bool,

        /// Leave the bootloader unlocked after upgrading
        #[clap(long)]
        no_lock: bool,
    },

    /// Generate a pairing identity and print relay payloads
    Pair {
        /// Relay server URL
        #[clap(long, env = "DBB_RELAY_URL", default_value = RELAY_URL)]
        relay_url: String,

        /// Write pairing data to a `.json` file
        #[clap(long)]
        output: Option<String>,
    },

    /// Post a payload to a relay channel
    Post {
        /// Relay channel ID
        #[clap(long)]
        channel: String,

        /// Base58check encoded pairing key
        #[clap(long)]
        key: String,

        /// Payload to post
        payload: String,

        /// Relay server URL
        #[clap(long, env = "DBB_RELAY_URL", default_value = RELAY_URL)]
        relay_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Options::parse();

    // Setup logging
    let mut c = simplelog::ConfigBuilder::new();
    c.add_filter_ignore_str("hyper");
    c.add_filter_ignore_str("reqwest");

    let _ = simplelog::SimpleLogger::init(args.log_level, c.build());

    // Relay operations do not need a device
    match &args.cmd {
        Actions::Pair { relay_url, output } => return pair(relay_url, output.as_deref()).await,
        Actions::Post {
            channel,
            key,
            payload,
            relay_url,
        } => return post(relay_url, channel, key, payload).await,
        _ => (),
    }

    let p = DeviceProvider::new()?;

    // List available devices
    let devices = p.list_devices()?;

    // Handle list and probe commands
    match args.cmd {
        Actions::List => {
            info!("Devices:");
            for (i, d) in devices.iter().enumerate() {
                info!("  {}: {}", i, d);
            }
            return Ok(());
        }
        Actions::Probe => {
            info!("Device mode: {}", p.probe()?);
            return Ok(());
        }
        _ => (),
    }

    if devices.is_empty() {
        return Err(anyhow::anyhow!("No devices found"));
    }

    // Select device by index
    if args.device_index >= devices.len() {
        return Err(anyhow::anyhow!(
            "Invalid device index: {} (max: {})",
            args.device_index,
            devices.len() - 1
        ));
    }

    let d = &devices[args.device_index];
    debug!("Using device {}: {}", args.device_index, d);

    let password = args.password.as_deref();

    // Firmware upgrades manage their own connection
    if let Actions::Upgrade {
        file,
        unsigned,
        dummy_signature,
        no_lock,
    } = args.cmd
    {
        let password = password.ok_or_else(|| anyhow::anyhow!("upgrade requires --password"))?;

        let u = FirmwareUpgrade::new(
            Executor::detached()?,
            p,
            KeypressReplug,
            password,
            UpgradeConfig {
                signed: !unsigned,
                dummy_signature,
                lock: !no_lock,
            },
        );

        let f = std::fs::File::open(&file)?;
        let image = u.load(std::io::BufReader::new(f))?;
        info!("Loaded firmware '{}': {:?}", file, image);

        let r = u.run(&image, print_progress).await?;
        info!("Upgrade complete: {:?}", r);

        if !r.relocked {
            warn!("Bootloader left unlocked");
        }

        return Ok(());
    }

    // Connect to device
    let t = p.open(d)?;
    let e = Executor::new(t)?;

    // Build command
    let cmd = match args.cmd {
        Actions::Ping => Command::ping(),
        Actions::Led => Command::Led(LedAction::Toggle),
        Actions::DeviceInfo => Command::Device(DeviceAction::Info),
        Actions::GetRandom { pseudo: true } => Command::Random(RandomMode::Pseudo),
        Actions::GetRandom { pseudo: false } => Command::Random(RandomMode::True),
        Actions::Raw { json } => {
            let r = e.execute(json, password).await?;
            info!("Reply: {}", r);
            return Ok(());
        }
        _ => unreachable!(),
    };

    debug!("Executing command: {}", cmd.name());

    let r = e.request(&cmd, password).await?;
    info!("Reply: {}", serde_json::Value::Object(r.fields().clone()));

    Ok(())
}

/// Generate a pairing identity and print payloads until interrupted
async fn pair(relay_url: &str, output: Option<&str>) -> anyhow::Result<()> {
    let i = PairingIdentity::generate();
    let d = i.pairing_data();

    info!("Pairing data: {}", serde_json::to_string(&d)?);
    if let Some(o) = output {
        write_output(o, &d).await?;
    }

    let r = RelayChannel::new(RelayConfig {
        url: relay_url.to_string(),
        ..Default::default()
    })?
    .with_identity(&i);

    r.start_long_poll(|p: Vec<u8>| {
        println!("{}", String::from_utf8_lossy(&p));
    })?;

    // Exit on ctrl + c
    tokio::signal::ctrl_c().await?;
    debug!("Exit!");

    r.shutdown().await;

    Ok(())
}

/// Post a single payload to a relay channel
async fn post(relay_url: &str, channel: &str, key: &str, payload: &str) -> anyhow::Result<()> {
    let r = RelayChannel::new(RelayConfig {
        url: relay_url.to_string(),
        ..Default::default()
    })?;
    r.set_channel(channel, PairingKey::from_b58(key)?);

    r.post_now(payload.as_bytes()).await?;
    info!("Posted {} bytes to channel {}", payload.len(), channel);

    Ok(())
}
