// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Signing device core
//!
//! Pure cryptography and image building shared by the host library and the
//! device simulator, see [dbb_proto] for wire objects.
//!
//! ## Operations
//!
//! ### Envelope codec
//!
//! Commands sent to a device with a password set are wrapped with
//! [`envelope::encrypt`], replies unwrapped with [`envelope::decrypt`].
//! Both derive the key as `SHA256(SHA256(password))` on each call and carry
//! `base64(IV || AES-256-CBC(PKCS7(plaintext)))` in a `{"ciphertext": ..}`
//! object. Envelopes carrying a device `input.error` are reported as
//! [`Error::DeviceReported`].
//!
//! ### Firmware images
//!
//! [`firmware::FirmwareImage`] reads an (optionally signed) firmware file,
//! pads it with `0xFF` to the full flash length and splits it into the
//! chunks written by the bootloader. Unsigned development images are
//! verified against a [dummy signature][firmware::dummy_signature].
//!
//! ### Pairing identity
//!
//! [`pairing::PairingIdentity`] generates the keypair, channel ID and
//! symmetric key used to reach the mobile verification app over the relay.

pub mod envelope;

pub mod firmware;

pub mod pairing;

mod error;
pub use error::{DecryptError, Error};

/// Re-export `dbb-proto` for consumers
pub use dbb_proto as proto;
