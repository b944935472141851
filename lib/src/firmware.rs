// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Firmware upgrade APIs
//!
//! An upgrade runs as a sequence of operator gated steps:
//!
//! 1. Probe the device mode
//! 2. In application mode, request `{"bootloader":"unlock"}` (touch
//!    confirmed on the device), then wait for the operator to replug the
//!    device so it enumerates in bootloader mode
//! 3. In bootloader mode, handshake (`v0`), erase (`e`), write every image
//!    chunk (`w`) and verify the signature (`s0`)
//! 4. Wait for a second replug (without holding the touch button) so the
//!    device boots the new application
//! 5. Relock the bootloader with `{"bootloader":"lock"}`
//!
//! Replug points are never polled on a timer, each waits on [Replug::replug].
//! Any failing step ends the upgrade, a new attempt starts from the top.

use std::fmt;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use zeroize::Zeroizing;

use dbb_core::firmware::{dummy_signature, FirmwareImage};
use dbb_proto::{
    bootloader::BootCommand,
    command::{BootloaderAction, Command},
    report, DeviceMode, BOOTLOADER_REPORT,
};

use crate::{Connect, Error, Executor};

/// Operator replug synchronisation point
#[async_trait]
pub trait Replug: Send + Sync {
    /// Prompt the operator and resolve once the device has been replugged
    async fn replug(&self, prompt: ReplugPrompt) -> Result<(), Error>;
}

/// Replug synchronisation via operator keypress on stdin
pub struct KeypressReplug;

#[async_trait]
impl Replug for KeypressReplug {
    async fn replug(&self, prompt: ReplugPrompt) -> Result<(), Error> {
        println!("{prompt}, then press ENTER to continue");

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());

        match stdin.read_line(&mut line).await? {
            0 => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Replug reasons, displayed as operator instructions
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ReplugPrompt {
    /// Bootloader unlocked, replug to enter the bootloader
    EnterBootloader,
    /// Firmware written, replug to start the application
    StartApplication,
}

impl fmt::Display for ReplugPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnterBootloader => write!(
                f,
                "Unplug the device and plug it back in to enter the bootloader"
            ),
            Self::StartApplication => write!(
                f,
                "Unplug the device and plug it back in, do NOT hold the touch button this time"
            ),
        }
    }
}

/// Firmware upgrade configuration
#[derive(Clone, Debug, PartialEq)]
pub struct UpgradeConfig {
    /// Firmware source starts with a signature block
    pub signed: bool,

    /// Verify against a locally computed dummy signature (development firmware)
    pub dummy_signature: bool,

    /// Relock the bootloader once the new application is running
    pub lock: bool,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            signed: true,
            dummy_signature: false,
            lock: true,
        }
    }
}

/// Per-chunk transfer progress
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Progress {
    /// Chunks written so far
    pub written: usize,
    /// Total chunks in the image
    pub total: usize,
}

/// Result of a completed upgrade
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct UpgradeReport {
    /// Number of chunks written
    pub chunks_written: usize,
    /// Bootloader was relocked after the upgrade
    pub relocked: bool,
}

/// Firmware upgrade session
pub struct FirmwareUpgrade<C, R> {
    executor: Executor,
    connector: C,
    replug: R,
    password: Zeroizing<String>,
    config: UpgradeConfig,
}

impl<C: Connect, R: Replug> FirmwareUpgrade<C, R> {
    /// Create an upgrade session
    ///
    /// `executor` may start detached, a transport is attached once the
    /// device mode is known
    pub fn new(
        executor: Executor,
        connector: C,
        replug: R,
        password: &str,
        config: UpgradeConfig,
    ) -> Self {
        Self {
            executor,
            connector,
            replug,
            password: Zeroizing::new(password.to_string()),
            config,
        }
    }

    /// Load a firmware image using the session configuration
    pub fn load(&self, r: impl std::io::Read) -> Result<FirmwareImage, Error> {
        Ok(FirmwareImage::read(r, self.config.signed)?)
    }

    /// Run the full upgrade sequence
    pub async fn run(
        &self,
        image: &FirmwareImage,
        progress: impl FnMut(Progress) + Send,
    ) -> Result<UpgradeReport, Error> {
        // Step 1: probe mode
        let mode = self.connector.detect().await?;
        info!("Device mode: {}", mode);

        // Step 2: reach bootloader mode
        match mode {
            DeviceMode::Application => {
                self.reattach().await?;
                self.unlock().await?;

                self.executor.detach().await?;
                self.replug.replug(ReplugPrompt::EnterBootloader).await?;

                let mode = self.connector.detect().await?;
                check_mode(mode, DeviceMode::Bootloader)?;
            }
            DeviceMode::Bootloader => {
                info!("Device already in bootloader");
            }
            DeviceMode::NoDevice => return Err(Error::DeviceNotFound),
            DeviceMode::Unknown => return Err(Error::ModeMismatch(mode, DeviceMode::Bootloader)),
        }

        self.reattach().await?;

        // Step 3: write firmware
        let chunks_written = self.transfer(image, progress).await?;

        // Step 4: boot into the new application
        self.executor.detach().await?;
        self.replug.replug(ReplugPrompt::StartApplication).await?;

        let mode = self.connector.detect().await?;
        if mode != DeviceMode::Application {
            warn!("Firmware written but device did not start ({})", mode);
            return Err(Error::ModeMismatch(mode, DeviceMode::Application));
        }

        self.reattach().await?;

        // Step 5: relock bootloader
        let relocked = match self.config.lock {
            true => self.lock().await?,
            false => false,
        };

        info!("Firmware upgrade complete");

        Ok(UpgradeReport {
            chunks_written,
            relocked,
        })
    }

    /// Request a bootloader unlock, requires touch confirmation on the device
    pub async fn unlock(&self) -> Result<(), Error> {
        info!("Unlocking bootloader, confirm on the device");

        let r = self
            .executor
            .request(
                &Command::Bootloader(BootloaderAction::Unlock),
                Some(self.password.as_str()),
            )
            .await?;

        match r.status("bootloader") {
            Some("unlock") => Ok(()),
            _ => Err(Error::UnexpectedResponse(format!(
                "bootloader unlock: {:?}",
                r.fields()
            ))),
        }
    }

    /// Request a bootloader lock, returning whether the lock was applied
    ///
    /// A user abort leaves the bootloader unlocked but does not fail the upgrade
    pub async fn lock(&self) -> Result<bool, Error> {
        info!("Locking bootloader, confirm on the device (hold touch button for ~3s)");

        let r = self
            .executor
            .request(
                &Command::Bootloader(BootloaderAction::Lock),
                Some(self.password.as_str()),
            )
            .await;

        match r {
            Ok(v) if v.status("bootloader") == Some("lock") => Ok(true),
            Ok(v) => Err(Error::UnexpectedResponse(format!(
                "bootloader lock: {:?}",
                v.fields()
            ))),
            Err(Error::UserAborted) => {
                warn!("Bootloader lock aborted by user, bootloader remains unlocked");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Write the firmware image, the device must already be in bootloader mode
    ///
    /// Returns the number of chunks written, a rejected signature is an error
    pub async fn transfer(
        &self,
        image: &FirmwareImage,
        mut progress: impl FnMut(Progress) + Send,
    ) -> Result<usize, Error> {
        // Gate on mode before any byte is sent
        let mode = self.connector.detect().await?;
        check_mode(mode, DeviceMode::Bootloader)?;

        let signature = match self.config.dummy_signature {
            true => hex::encode(dummy_signature(image)),
            false => image.signature_hex(),
        };

        // Handshake and erase
        let r = self.boot(BootCommand::Version).await?;
        debug!(
            "Bootloader version: {}",
            String::from_utf8_lossy(report::payload(&r))
        );

        self.boot(BootCommand::Erase).await?;

        // Write chunks
        let total = image.num_chunks();
        let mut written = 0;

        for (index, chunk) in image.chunks() {
            self.boot(BootCommand::Write { index, chunk }).await?;

            written += 1;
            progress(Progress { written, total });
        }

        info!("Wrote {} chunks, verifying signature", written);

        // Verify signature
        self.boot(BootCommand::Verify {
            signature: &signature,
        })
        .await?;

        Ok(written)
    }

    /// Close any open transport and reconnect to the (re-enumerated) device
    async fn reattach(&self) -> Result<(), Error> {
        self.executor.detach().await?;

        let t = self.connector.connect().await?;
        self.executor.attach(t).await
    }

    /// Issue a bootloader command, checking for the success reply
    async fn boot(&self, cmd: BootCommand<'_>) -> Result<Vec<u8>, Error> {
        let r = self.executor.exchange(cmd.encode(), BOOTLOADER_REPORT).await?;

        if !cmd.is_success(&r) {
            let name = match &cmd {
                BootCommand::Version => "version".to_string(),
                BootCommand::Erase => "erase".to_string(),
                BootCommand::Write { index, .. } => format!("write chunk {index}"),
                BootCommand::Verify { .. } => "verify".to_string(),
            };

            return Err(Error::UnexpectedResponse(format!(
                "bootloader {} failed: '{}'",
                name,
                String::from_utf8_lossy(report::payload(&r))
            )));
        }

        Ok(r)
    }
}

/// Check the device is in the expected mode
fn check_mode(actual: DeviceMode, expected: DeviceMode) -> Result<(), Error> {
    if actual != expected {
        return Err(Error::ModeMismatch(actual, expected));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mode_checks() {
        let tests = &[
            (DeviceMode::Bootloader, DeviceMode::Bootloader, true),
            (DeviceMode::Application, DeviceMode::Bootloader, false),
            (DeviceMode::NoDevice, DeviceMode::Application, false),
            (DeviceMode::Unknown, DeviceMode::Application, false),
        ];

        for (actual, expected, ok) in tests {
            let r = check_mode(*actual, *expected);
            assert_eq!(r.is_ok(), *ok, "{actual} / {expected}");
        }
    }

    #[test]
    fn replug_prompts() {
        assert!(ReplugPrompt::StartApplication
            .to_string()
            .contains("do NOT hold the touch button"));
    }
}
