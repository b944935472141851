// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Firmware image construction
//!
//! Firmware files consist of an optional [`FIRMWARE_SIG_LEN`] signature block
//! followed by the raw application image. Images are padded with `0xFF`
//! (erased flash) to exactly [`FIRMWARE_LEN`] bytes before transfer.

use std::io::{ErrorKind, Read};

use sha2::{Digest, Sha256};

use dbb_proto::{FIRMWARE_CHUNK_LEN, FIRMWARE_LEN, FIRMWARE_SIG_LEN};

use crate::Error;

/// Erased flash value used for image padding
pub const PAD_BYTE: u8 = 0xff;

/// Padded firmware image ready for transfer
#[derive(Clone, PartialEq)]
pub struct FirmwareImage {
    /// Padded image, always [`FIRMWARE_LEN`] bytes
    image: Vec<u8>,
    /// Length of the firmware read from the source
    source_len: usize,
    /// Signature block, if the source was signed
    signature: Option<Vec<u8>>,
}

impl FirmwareImage {
    /// Read a firmware image from `r`, consuming a leading signature block when `signed` is set
    pub fn read<R: Read>(mut r: R, signed: bool) -> Result<Self, Error> {
        let signature = match signed {
            true => {
                let mut s = vec![0u8; FIRMWARE_SIG_LEN];
                r.read_exact(&mut s).map_err(|e| match e.kind() {
                    ErrorKind::UnexpectedEof => Error::SignatureTruncated,
                    _ => Error::Io(e),
                })?;
                Some(s)
            }
            false => None,
        };

        // Read firmware in chunks until the source is exhausted
        let mut image = Vec::with_capacity(FIRMWARE_LEN);
        let mut chunk = vec![0u8; FIRMWARE_CHUNK_LEN];
        loop {
            let n = read_chunk(&mut r, &mut chunk)?;
            if n == 0 {
                break;
            }
            if image.len() + n > FIRMWARE_LEN {
                return Err(Error::FirmwareTooLarge(image.len() + n));
            }
            image.extend_from_slice(&chunk[..n]);
        }

        let source_len = image.len();
        image.resize(FIRMWARE_LEN, PAD_BYTE);

        #[cfg(feature = "log")]
        log::debug!(
            "loaded firmware: {} bytes ({} padding, signed: {})",
            source_len,
            FIRMWARE_LEN - source_len,
            signature.is_some()
        );

        Ok(Self {
            image,
            source_len,
            signature,
        })
    }

    /// Build an image from an in-memory firmware file
    pub fn from_bytes(b: &[u8], signed: bool) -> Result<Self, Error> {
        Self::read(b, signed)
    }

    /// Padded image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    /// Number of firmware bytes read from the source (excluding padding)
    pub fn source_len(&self) -> usize {
        self.source_len
    }

    /// Signature block, if present
    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    /// Iterate over `(index, chunk)` pairs for transfer
    pub fn chunks(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.image
            .chunks(FIRMWARE_CHUNK_LEN)
            .enumerate()
            .map(|(i, c)| (i as u8, c))
    }

    /// Number of chunks in the image
    pub fn num_chunks(&self) -> usize {
        self.image.len() / FIRMWARE_CHUNK_LEN
    }

    /// Double SHA-256 digest over the padded image
    pub fn digest(&self) -> [u8; 32] {
        let h = Sha256::digest(Sha256::digest(&self.image));

        let mut d = [0u8; 32];
        d.copy_from_slice(&h);
        d
    }

    /// Hex signature string for device verification
    ///
    /// Unsigned (test) images use a locally computed [dummy_signature]
    pub fn signature_hex(&self) -> String {
        match &self.signature {
            Some(s) => hex::encode(s),
            None => hex::encode(dummy_signature(self)),
        }
    }
}

impl core::fmt::Debug for FirmwareImage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FirmwareImage")
            .field("source_len", &self.source_len)
            .field("signed", &self.signature.is_some())
            .field("digest", &hex::encode(self.digest()))
            .finish()
    }
}

/// Dummy signature for development firmware, the image digest repeated over the signature block
pub fn dummy_signature(image: &FirmwareImage) -> [u8; FIRMWARE_SIG_LEN] {
    let d = image.digest();

    let mut s = [0u8; FIRMWARE_SIG_LEN];
    for c in s.chunks_mut(d.len()) {
        c.copy_from_slice(&d[..c.len()]);
    }
    s
}

/// Fill `buff` from `r`, returning fewer bytes only at end of stream
fn read_chunk<R: Read>(r: &mut R, buff: &mut [u8]) -> Result<usize, Error> {
    let mut n = 0;
    while n < buff.len() {
        match r.read(&mut buff[n..]) {
            Ok(0) => break,
            Ok(v) => n += v,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(n)
}
