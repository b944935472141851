// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Bootloader command frames
//!
//! Bootloader commands are raw ASCII opcodes exchanged over
//! [BOOTLOADER_REPORT][crate::BOOTLOADER_REPORT] sized reports, replies
//! are ASCII strings echoing the opcode followed by a status.
//!
//! | Command | Frame                        | Success reply |
//! |---------|------------------------------|---------------|
//! | Version | `v0`                         | `v...`        |
//! | Erase   | `e`                          | `e0`          |
//! | Write   | `w`, index byte, chunk bytes | `w0`          |
//! | Verify  | `s0`, hex signature          | `s0`          |

use thiserror::Error;

use crate::{report, FIRMWARE_CHUNK_LEN};

/// Bootloader command
#[derive(Clone, PartialEq, Debug)]
pub enum BootCommand<'a> {
    /// Version handshake
    Version,
    /// Erase the application flash
    Erase,
    /// Write a firmware chunk
    Write { index: u8, chunk: &'a [u8] },
    /// Verify the written image against a hex encoded signature
    Verify { signature: &'a str },
}

/// Bootloader frame decoding errors
#[derive(Copy, Clone, PartialEq, Eq, Debug, Error)]
pub enum BootError {
    #[error("empty bootloader frame")]
    Empty,
    #[error("unknown bootloader opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("truncated bootloader frame")]
    Truncated,
    #[error("invalid signature encoding")]
    InvalidSignature,
}

impl<'a> BootCommand<'a> {
    /// Encode the command frame (unpadded)
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Version => b"v0".to_vec(),
            Self::Erase => b"e".to_vec(),
            Self::Write { index, chunk } => {
                let mut b = Vec::with_capacity(2 + chunk.len());
                b.push(b'w');
                b.push(*index);
                b.extend_from_slice(chunk);
                b
            }
            Self::Verify { signature } => {
                let mut b = b"s0".to_vec();
                b.extend_from_slice(signature.as_bytes());
                b
            }
        }
    }

    /// Decode a (padded) command frame
    pub fn decode(frame: &'a [u8]) -> Result<Self, BootError> {
        let op = *frame.first().ok_or(BootError::Empty)?;

        match op {
            b'v' => Ok(Self::Version),
            b'e' => Ok(Self::Erase),
            b'w' => {
                if frame.len() < 2 + FIRMWARE_CHUNK_LEN {
                    return Err(BootError::Truncated);
                }
                Ok(Self::Write {
                    index: frame[1],
                    chunk: &frame[2..][..FIRMWARE_CHUNK_LEN],
                })
            }
            b's' => {
                let p = report::payload(frame);
                if p.len() < 2 {
                    return Err(BootError::Truncated);
                }
                let signature =
                    core::str::from_utf8(&p[2..]).map_err(|_| BootError::InvalidSignature)?;
                Ok(Self::Verify { signature })
            }
            _ => Err(BootError::UnknownOpcode(op)),
        }
    }

    /// Expected reply prefix for a successful command
    pub fn expected_reply(&self) -> &'static [u8] {
        match self {
            Self::Version => b"v",
            Self::Erase => b"e0",
            Self::Write { .. } => b"w0",
            Self::Verify { .. } => b"s0",
        }
    }

    /// Check a reply payload indicates success
    pub fn is_success(&self, reply: &[u8]) -> bool {
        report::payload(reply).starts_with(self.expected_reply())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::BOOTLOADER_REPORT;

    #[test]
    fn write_frame_layout() {
        let chunk = [0xabu8; FIRMWARE_CHUNK_LEN];
        let cmd = BootCommand::Write {
            index: 7,
            chunk: &chunk,
        };

        let f = report::frame(&cmd.encode(), BOOTLOADER_REPORT.write).unwrap();
        assert_eq!(f[0], b'w');
        assert_eq!(f[1], 7);
        assert!(f[2..].iter().all(|b| *b == 0xab));

        assert_eq!(BootCommand::decode(&f), Ok(cmd));
    }

    #[test]
    fn verify_frame_layout() {
        let cmd = BootCommand::Verify { signature: "00ff" };

        let f = report::frame(&cmd.encode(), BOOTLOADER_REPORT.write).unwrap();
        assert_eq!(&f[..6], b"s000ff");
        assert_eq!(BootCommand::decode(&f), Ok(cmd));
    }

    #[test]
    fn decode_errors() {
        assert_eq!(BootCommand::decode(&[]), Err(BootError::Empty));
        assert_eq!(BootCommand::decode(b"w\x01abc"), Err(BootError::Truncated));
        assert_eq!(BootCommand::decode(b"x"), Err(BootError::UnknownOpcode(b'x')));
    }

    #[test]
    fn reply_checks() {
        assert!(BootCommand::Version.is_success(b"v1.0.0\0\0"));
        assert!(BootCommand::Erase.is_success(b"e0\0"));
        assert!(!BootCommand::Erase.is_success(b"e1\0"));
        assert!(!BootCommand::Verify { signature: "" }.is_success(b"\0s0"));
    }
}
