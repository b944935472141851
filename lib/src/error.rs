// Copyright (c) 2022-2023 The MobileCoin Foundation

use dbb_core::DecryptError;
use dbb_proto::{report::ReportError, DeviceMode};

/// Signing device API Error Type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HID Init Error
    #[error("could not create HidApi instance")]
    HidInit,

    /// No matching device enumerated
    #[error("Device not found")]
    DeviceNotFound,

    /// Device already has an open handle
    #[error("Device already open")]
    AlreadyOpen,

    /// HID transport error
    #[cfg(feature = "transport_hid")]
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// Transport read / write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload does not fit the report
    #[error("Report framing failed: {0}")]
    Report(#[from] ReportError),

    /// Envelope could not be decrypted
    #[error("Decryption failed: {0}")]
    Decrypt(DecryptError),

    /// Device returned an explicit error
    #[error("Device reported error: {0}")]
    DeviceReported(String),

    /// Operation invoked in the wrong device mode
    #[error("Device in unexpected mode (actual: {0}, expected: {1})")]
    ModeMismatch(DeviceMode, DeviceMode),

    /// User cancelled the operation on the device
    #[error("Operation aborted by user")]
    UserAborted,

    /// Relay operation without a channel ID
    #[error("Relay channel not configured")]
    ChannelNotConfigured,

    /// Relay HTTP call failed or timed out
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Unexpected device or relay response
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Command executor worker is no longer running
    #[error("Command executor stopped")]
    ExecutorStopped,

    /// Operation cancelled before completion
    #[error("Operation cancelled")]
    Cancelled,

    /// Background task spawned outside a tokio runtime
    #[error("No tokio runtime available")]
    NoRuntime,

    /// Envelope encryption requires a password
    #[error("Password must not be empty")]
    EmptyPassword,

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Firmware image or key material error
    #[error("{0}")]
    Core(dbb_core::Error),
}

/// Map core errors onto the API taxonomy
impl From<dbb_core::Error> for Error {
    fn from(e: dbb_core::Error) -> Self {
        use dbb_core::Error as E;

        match e {
            E::EmptyPassword => Error::EmptyPassword,
            E::Decrypt(d) => Error::Decrypt(d),
            E::DeviceReported(m) => Error::DeviceReported(m),
            E::Io(e) => Error::Io(e),
            E::Encoding(e) => Error::Json(e),
            e => Error::Core(e),
        }
    }
}

impl From<DecryptError> for Error {
    fn from(e: DecryptError) -> Self {
        Error::Decrypt(e)
    }
}

impl From<dbb_proto::DeviceError> for Error {
    fn from(e: dbb_proto::DeviceError) -> Self {
        match e.is_aborted() {
            true => Error::UserAborted,
            false => Error::DeviceReported(e.message),
        }
    }
}
