// Copyright (c) 2022-2023 The MobileCoin Foundation

/// Core operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Envelope encryption requires a password
    #[error("password must not be empty")]
    EmptyPassword,

    /// Envelope or payload could not be decrypted
    #[error("decryption failed: {0}")]
    Decrypt(#[from] DecryptError),

    /// Device returned an input error in place of ciphertext
    #[error("device reported error: {0}")]
    DeviceReported(String),

    /// Invalid key material
    #[error("invalid key")]
    InvalidKey,

    /// Firmware source exceeds the image length
    #[error("firmware image too large ({0} bytes, max {max})", max = dbb_proto::FIRMWARE_LEN)]
    FirmwareTooLarge(usize),

    /// Firmware source ended inside the signature block
    #[error("firmware signature block truncated")]
    SignatureTruncated,

    /// Error reading firmware source
    #[error("firmware read failed: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope encoding failed
    #[error("envelope encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Reasons for [Error::Decrypt]
#[derive(Copy, Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum DecryptError {
    /// Envelope is not valid JSON or carries no ciphertext
    #[error("malformed envelope")]
    Envelope,

    /// Ciphertext is not valid base64
    #[error("invalid base64")]
    Base64,

    /// Ciphertext is shorter than IV plus one block or not block aligned
    #[error("invalid ciphertext length")]
    Length,

    /// Padding length outside `[1, 16]`
    #[error("invalid padding")]
    Padding,

    /// Plaintext is not valid UTF-8
    #[error("invalid utf-8")]
    Utf8,
}

impl Error {
    /// Fetch the decryption failure reason, if any
    pub fn decrypt_error(&self) -> Option<DecryptError> {
        match self {
            Self::Decrypt(e) => Some(*e),
            _ => None,
        }
    }
}
