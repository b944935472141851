// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Encrypted envelope wire format
//!
//! ```text
//! { "ciphertext": base64(IV || AES-256-CBC(PKCS7(command))) }
//! { "input": { "error": "<message>" } }
//! ```

use serde::{Deserialize, Serialize};

/// AES block / IV length
pub const IV_LEN: usize = 16;

/// Envelope carrying an encrypted command or reply
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Base64 encoded IV and ciphertext
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,

    /// Device side input error, returned in place of ciphertext
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputError>,
}

/// Input processing error reported by the device
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct InputError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// Create an envelope carrying ciphertext
    pub fn new(ciphertext: String) -> Self {
        Self {
            ciphertext: Some(ciphertext),
            input: None,
        }
    }

    /// Create an envelope carrying an input error
    pub fn input_error(message: impl Into<String>) -> Self {
        Self {
            ciphertext: None,
            input: Some(InputError {
                error: Some(message.into()),
            }),
        }
    }

    /// Fetch the input error message, if present
    pub fn error(&self) -> Option<&str> {
        self.input.as_ref().and_then(|i| i.error.as_deref())
    }
}
