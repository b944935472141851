// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Basic device command tests

use log::info;
use serde_json::Value;

use dbb::{
    proto::command::{Command, DeviceAction, LedAction},
    Executor,
};

/// Ping the device, fetch device info and toggle the LED
pub async fn test(e: &Executor, password: &str) -> anyhow::Result<()> {
    // Ping is always sent in plaintext
    let r = e.request(&Command::ping(), None).await?;
    info!("ping: {:?}", r.status("ping"));

    assert_eq!(r.status("ping"), Some("password"));

    // Fetch device info
    let r = e
        .request(&Command::Device(DeviceAction::Info), Some(password))
        .await?;

    let info = r
        .get("device")
        .ok_or_else(|| anyhow::anyhow!("missing device info"))?;
    info!("device info: {}", info);

    let version = info.get("version").and_then(Value::as_str);
    assert!(version.is_some(), "missing firmware version");

    // Toggle the LED
    let r = e
        .request(&Command::Led(LedAction::Toggle), Some(password))
        .await?;
    assert_eq!(r.status("led"), Some("toggle"));

    Ok(())
}
