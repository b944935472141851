// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Typed application commands
//!
//! Each [Command] variant encodes to a single-key JSON object, for example
//! `Command::Led(LedAction::Toggle)` encodes to `{"led":"toggle"}`.

use core::fmt;

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// Application command, encoded as JSON and optionally wrapped in an envelope
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum Command {
    /// Control the device LED
    Led(LedAction),
    /// Set a new device password
    Password(String),
    /// Create or restore the wallet seed
    Seed(SeedRequest),
    /// Lock or unlock the bootloader
    Bootloader(BootloaderAction),
    /// Request a signature
    Sign(SignRequest),
    /// Device information / lock
    Device(DeviceAction),
    /// Fetch a random value
    Random(RandomMode),
    /// Check whether a password is set (argument is always empty)
    Ping(String),
    /// Fetch an extended public key for a keypath
    Xpub(String),
    /// Set the device name
    Name(String),
    /// Manage backups on the device micro SD card
    Backup(BackupAction),
    /// Factory reset the device
    Reset(ResetAction),
}

/// LED actions
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedAction {
    Toggle,
    Blink,
}

/// Bootloader actions
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootloaderAction {
    /// Allow firmware writes after the next replug
    Unlock,
    /// Refuse firmware writes
    Lock,
}

/// Device actions
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAction {
    Info,
    Lock,
}

/// Random number source
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RandomMode {
    True,
    Pseudo,
}

/// Backup actions
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupAction {
    List,
    Erase,
}

/// Reset actions
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ResetAction {
    /// Erase all device state
    #[serde(rename = "__ERASE__")]
    Erase,
}

/// Seed sources
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedSource {
    /// Generate a new seed on the device
    Create,
    /// Restore from a backup file
    Backup,
}

/// Seed request
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SeedRequest {
    pub source: SeedSource,

    /// Backup file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Backup encryption key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl SeedRequest {
    /// Request creation of a new seed
    pub fn create() -> Self {
        Self {
            source: SeedSource::Create,
            filename: None,
            key: None,
        }
    }
}

/// Signature types
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignType {
    /// Sign a hash
    Hash,
    /// Transaction metadata for the verification app
    Meta,
}

/// Signing request
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SignRequest {
    #[serde(rename = "type")]
    pub kind: SignType,

    /// Hex encoded hash or metadata
    pub data: String,

    /// BIP32 key path
    pub keypath: String,
}

impl Command {
    /// Ping the device
    pub fn ping() -> Self {
        Self::Ping(String::new())
    }

    /// Command name (JSON key), safe for logging
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Encode the command to its JSON wire format
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a command from its JSON wire format
    pub fn decode(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.encode().map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_wire_format() {
        let tests = &[
            (Command::Led(LedAction::Toggle), r#"{"led":"toggle"}"#),
            (Command::Password("1234".to_string()), r#"{"password":"1234"}"#),
            (
                Command::Seed(SeedRequest::create()),
                r#"{"seed":{"source":"create"}}"#,
            ),
            (
                Command::Bootloader(BootloaderAction::Unlock),
                r#"{"bootloader":"unlock"}"#,
            ),
            (
                Command::Bootloader(BootloaderAction::Lock),
                r#"{"bootloader":"lock"}"#,
            ),
            (
                Command::Sign(SignRequest {
                    kind: SignType::Hash,
                    data: "aabb".to_string(),
                    keypath: "m/44'/0'/0'/0/1".to_string(),
                }),
                r#"{"sign":{"type":"hash","data":"aabb","keypath":"m/44'/0'/0'/0/1"}}"#,
            ),
            (Command::Random(RandomMode::True), r#"{"random":"true"}"#),
            (Command::ping(), r#"{"ping":""}"#),
            (Command::Reset(ResetAction::Erase), r#"{"reset":"__ERASE__"}"#),
        ];

        for (cmd, expected) in tests {
            assert_eq!(&cmd.encode().unwrap(), expected);
            assert_eq!(&cmd.to_string(), expected);

            let decoded = Command::decode(expected).unwrap();
            assert_eq!(&decoded, cmd, "decode mismatch for {expected}");
        }
    }

    #[test]
    fn command_names() {
        assert_eq!(Command::Led(LedAction::Blink).name(), "led");
        assert_eq!(Command::Password("secret".into()).name(), "password");
        assert_eq!(Command::Bootloader(BootloaderAction::Lock).name(), "bootloader");
    }

    #[test]
    fn decode_rejects_unknown() {
        assert!(Command::decode(r#"{"led":"dance"}"#).is_err());
        assert!(Command::decode(r#"{"launch":"missiles"}"#).is_err());
        assert!(Command::decode("not json").is_err());
    }
}
