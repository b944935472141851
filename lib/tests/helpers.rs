use std::str::FromStr;

use log::LevelFilter;
use simplelog::SimpleLogger;

use dbb::Executor;
use dbb_sim::*;

/// Password configured on simulated devices
#[allow(unused)]
pub const PASSWORD: &str = dbb_tests::PASSWORD;

/// Setup logging from the `LOG_LEVEL` environment variable
pub fn setup_logging() {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("reqwest")
        .build();

    let _ = SimpleLogger::init(log_level, log_cfg);
}

/// Setup a simulated device and an executor connected to it
#[allow(unused)]
pub fn setup() -> (Sim, Executor) {
    setup_logging();

    let sim = Sim::new(Some(PASSWORD));
    let t = sim.transport().expect("transport open failed");
    let e = Executor::new(t).expect("executor start failed");

    (sim, e)
}
