// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device replies
//!
//! Replies are JSON objects keyed by the command name on success
//! (`{"led":"toggle"}`) or carrying an `error` object on failure
//! (`{"error":{"message":"...","code":600,"command":"bootloader"}}`).

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ERR_TOUCH_ABORT, ERR_TOUCH_TIMEOUT};

/// Error object returned by the device
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct DeviceError {
    /// Human readable message
    pub message: String,

    /// Numeric error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,

    /// Command that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl DeviceError {
    /// Create an error with only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            command: None,
        }
    }

    /// Check whether the user aborted the operation on the device
    pub fn is_aborted(&self) -> bool {
        self.code == Some(ERR_TOUCH_ABORT)
    }

    /// Check whether the touch confirmation timed out
    pub fn is_timeout(&self) -> bool {
        self.code == Some(ERR_TOUCH_TIMEOUT)
    }
}

/// Parsed reply object
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Reply {
    fields: Map<String, Value>,
}

impl Reply {
    /// Parse a reply from its JSON wire format
    pub fn parse(s: &str) -> Result<Self, serde_json::Error> {
        let fields: Map<String, Value> = serde_json::from_str(s)?;

        #[cfg(feature = "log")]
        log::trace!("reply keys: {:?}", fields.keys().collect::<Vec<_>>());

        Ok(Self { fields })
    }

    /// Fetch the device error, if present
    ///
    /// Both the structured form and a bare string message are accepted
    pub fn error(&self) -> Option<DeviceError> {
        match self.fields.get("error")? {
            Value::String(s) => Some(DeviceError::new(s.clone())),
            v @ Value::Object(_) => Some(
                serde_json::from_value(v.clone()).unwrap_or_else(|_| DeviceError::new(v.to_string())),
            ),
            v => Some(DeviceError::new(v.to_string())),
        }
    }

    /// Check whether the reply signals a user abort
    pub fn is_aborted(&self) -> bool {
        self.error().map(|e| e.is_aborted()).unwrap_or(false)
    }

    /// Fetch a reply field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Fetch a string reply field, e.g. `status("bootloader") == Some("unlock")`
    pub fn status(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Access all reply fields
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Convert into a result, splitting out device errors
    pub fn into_result(self) -> Result<Self, DeviceError> {
        match self.error() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

impl FromStr for Reply {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Build the textual failure marker handed to continuations in place of a reply
pub fn failure_marker(message: &str) -> String {
    serde_json::json!({ "error": { "message": message } }).to_string()
}
