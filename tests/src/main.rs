// Copyright (c) 2022-2023 The MobileCoin Foundation

use clap::{clap_derive::ArgEnum, Parser};
use log::{debug, info, LevelFilter};
use strum::{Display, EnumString, EnumVariantNames};

use dbb::{dbb_core::firmware::FirmwareImage, Connect, Executor, Replug, UpgradeConfig};
use dbb_sim::Sim;

/// Test CLI arguments
#[derive(Clone, Debug, Parser)]
pub struct Opts {
    #[clap(subcommand)]
    pub test: Tests,

    /// Target for test execution
    #[clap(long, value_enum, default_value = "sim", env)]
    pub target: Target,

    /// Device password (must be shared between test util and target)
    #[clap(long, env = "DBB_PASSWORD", default_value = dbb_tests::PASSWORD)]
    pub password: String,

    /// Log level
    #[clap(long, default_value = "debug", env)]
    pub log_level: LevelFilter,

    /// Enable logging for the simulator
    #[clap(long)]
    pub log_sim: bool,
}

/// Test modes
#[derive(Clone, PartialEq, Debug, Parser, Display, EnumString, EnumVariantNames)]
pub enum Tests {
    /// Test basic device commands
    Device,
    /// Test encrypted envelopes
    Envelope,
    /// Test command ordering
    Ordering {
        /// Number of commands to enqueue
        #[clap(long, default_value = "16")]
        n: usize,
    },
    /// Test firmware upgrade
    Upgrade {
        /// Firmware file (a blank development image is used when unset)
        #[clap(long)]
        file: Option<String>,

        /// Firmware file has no signature block
        #[clap(long)]
        unsigned: bool,

        /// Leave the bootloader unlocked after upgrading
        #[clap(long)]
        no_lock: bool,
    },
}

/// Test target connection
#[derive(Clone, PartialEq, Debug, ArgEnum, Display, EnumString, EnumVariantNames)]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum Target {
    /// USB-HID connection for physical devices
    Hid,
    /// In-process simulator
    Sim,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load command line options
    let opts = Opts::parse();

    // Setup logging
    let mut c = simplelog::ConfigBuilder::new();
    if !opts.log_sim {
        c.add_filter_ignore_str("dbb_sim");
    }

    let _ = simplelog::SimpleLogger::init(opts.log_level, c.build());

    debug!("options: {:?}", opts);

    info!("Running test '{}` via {}", opts.test, opts.target);

    // Connect to target and execute test
    match opts.target {
        Target::Sim => {
            let s = Sim::new(Some(opts.password.as_str()));

            execute(s.provider(), s.replugger(), opts).await?;
        }
        #[cfg(feature = "transport_hid")]
        Target::Hid => {
            let p = dbb::DeviceProvider::new()?;

            let devices = p.list_devices()?;
            debug!("Found devices: {:?}", devices);

            execute(p, dbb::firmware::KeypressReplug, opts).await?;
        }
        #[cfg(not(feature = "transport_hid"))]
        _ => {
            return Err(anyhow::anyhow!(
                "transport: {} feature not enabled",
                opts.target
            ));
        }
    };

    log::info!("Test OK!");

    Ok(())
}

/// Execute a test with the provided connector
async fn execute<C, R>(connector: C, replug: R, opts: Opts) -> anyhow::Result<()>
where
    C: Connect,
    R: Replug,
{
    use dbb_tests::*;

    let password = opts.password.as_str();

    match opts.test {
        Tests::Device => {
            let e = Executor::new(connector.connect().await?)?;
            device::test(&e, password).await?
        }
        Tests::Envelope => {
            let e = Executor::new(connector.connect().await?)?;
            envelope::test(&e, password).await?
        }
        Tests::Ordering { n } => {
            let e = Executor::new(connector.connect().await?)?;
            ordering::test(&e, password, n).await?
        }
        Tests::Upgrade {
            file,
            unsigned,
            no_lock,
        } => {
            let (image, dummy_signature) = match file {
                Some(f) => {
                    let f = std::fs::File::open(f)?;
                    (FirmwareImage::read(std::io::BufReader::new(f), !unsigned)?, false)
                }
                None => (FirmwareImage::from_bytes(&[], false)?, true),
            };

            let config = UpgradeConfig {
                signed: !unsigned,
                dummy_signature,
                lock: !no_lock,
            };

            upgrade::test(
                Executor::detached()?,
                connector,
                replug,
                password,
                config,
                &image,
            )
            .await?
        }
    }

    Ok(())
}
