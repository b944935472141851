// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Envelope codec
//!
//! Commands and replies are encrypted with AES-256-CBC under a key derived
//! from the device password as `SHA256(SHA256(password))`. The ciphertext is
//! prefixed with a random 16 byte IV, base64 encoded and carried in an
//! [Envelope] object.
//!
//! The codec is stateless, each call derives its own key and IV.

use aes::cipher::{
    block_padding::{NoPadding, Pkcs7},
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use dbb_proto::envelope::{Envelope, IV_LEN};

use crate::{DecryptError, Error};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Symmetric key length
pub const KEY_LEN: usize = 32;

/// AES block length
const BLOCK_LEN: usize = 16;

/// Symmetric key, zeroized on drop
pub type Key = Zeroizing<[u8; KEY_LEN]>;

/// Derive the envelope key for a password
pub fn derive_key(password: &str) -> Key {
    let mut h = Zeroizing::new([0u8; KEY_LEN]);
    h.copy_from_slice(&Sha256::digest(password.as_bytes()));

    let mut k = Zeroizing::new([0u8; KEY_LEN]);
    k.copy_from_slice(&Sha256::digest(&h[..]));
    k
}

/// Encrypt `plaintext` with a random IV, returning `IV || ciphertext`
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    seal_with_iv(key, &iv, plaintext)
}

/// Encrypt `plaintext` with the provided IV, returning `IV || ciphertext`
pub fn seal_with_iv(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, Error> {
    let c = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| Error::InvalidKey)?;
    let ct = c.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut blob = Vec::with_capacity(IV_LEN + ct.len());
    blob.extend_from_slice(iv);
    blob.extend_from_slice(&ct);

    Ok(blob)
}

/// Decrypt an `IV || ciphertext` blob, returning the unpadded plaintext
pub fn open(key: &[u8; KEY_LEN], blob: &[u8]) -> Result<Vec<u8>, Error> {
    // IV plus at least one block, block aligned
    if blob.len() < IV_LEN + BLOCK_LEN || blob.len() % BLOCK_LEN != 0 {
        return Err(DecryptError::Length.into());
    }

    let (iv, body) = blob.split_at(IV_LEN);

    let c = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| Error::InvalidKey)?;
    let mut pt = c
        .decrypt_padded_vec_mut::<NoPadding>(body)
        .map_err(|_| DecryptError::Length)?;

    // Strip padding, only the pad length is checked
    let n = match pt.last() {
        Some(n) => *n as usize,
        None => return Err(DecryptError::Length.into()),
    };
    if n == 0 || n > BLOCK_LEN || n > pt.len() {
        pt.fill(0);
        return Err(DecryptError::Padding.into());
    }
    pt.truncate(pt.len() - n);

    Ok(pt)
}

/// Encrypt a command for the device, returning the envelope JSON
pub fn encrypt(command: &str, password: &str) -> Result<String, Error> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    encrypt_with_iv(command, password, &iv)
}

/// Encrypt a command with a fixed IV (for reproducible vectors)
pub fn encrypt_with_iv(command: &str, password: &str, iv: &[u8; IV_LEN]) -> Result<String, Error> {
    if password.is_empty() {
        return Err(Error::EmptyPassword);
    }

    let key = derive_key(password);
    let blob = seal_with_iv(&key, iv, command.as_bytes())?;

    let e = Envelope::new(BASE64_STANDARD.encode(blob));
    Ok(serde_json::to_string(&e)?)
}

/// Decrypt an envelope from the device, returning the plaintext reply
pub fn decrypt(envelope: &str, password: &str) -> Result<String, Error> {
    if password.is_empty() {
        return Err(Error::EmptyPassword);
    }

    let e: Envelope = serde_json::from_str(envelope).map_err(|_| DecryptError::Envelope)?;

    // Device side errors are returned in place of ciphertext
    if let Some(m) = e.error() {
        return Err(Error::DeviceReported(m.to_string()));
    }

    let ct = e.ciphertext.ok_or(DecryptError::Envelope)?;
    let blob = BASE64_STANDARD
        .decode(ct.as_bytes())
        .map_err(|_| DecryptError::Base64)?;

    let key = derive_key(password);
    let pt = open(&key, &blob)?;

    String::from_utf8(pt).map_err(|_| DecryptError::Utf8.into())
}
