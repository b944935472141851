// Copyright (c) 2022-2023 The MobileCoin Foundation

//! HID report framing
//!
//! Reports are always exchanged at their full size, short payloads are
//! padded with zero bytes and received payloads end at the first zero byte.

use thiserror::Error;

/// Write and read sizes for one report exchange
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ReportSizes {
    /// Size of the outgoing report
    pub write: usize,
    /// Size of the incoming report
    pub read: usize,
}

/// Report framing errors
#[derive(Copy, Clone, PartialEq, Eq, Debug, Error)]
pub enum ReportError {
    /// Payload exceeds the report size
    #[error("payload of {actual} bytes exceeds report size ({max} bytes)")]
    PayloadTooLarge { actual: usize, max: usize },
}

/// Build a fully sized report from `payload`, zero-padding to `size`
pub fn frame(payload: &[u8], size: usize) -> Result<Vec<u8>, ReportError> {
    if payload.len() > size {
        return Err(ReportError::PayloadTooLarge {
            actual: payload.len(),
            max: size,
        });
    }

    let mut report = vec![0u8; size];
    report[..payload.len()].copy_from_slice(payload);

    Ok(report)
}

/// Fetch the logical payload from a received report (up to the first zero byte)
pub fn payload(report: &[u8]) -> &[u8] {
    match report.iter().position(|b| *b == 0) {
        Some(n) => &report[..n],
        None => report,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_pads_with_zeros() {
        let r = frame(b"{\"led\":\"toggle\"}", 64).unwrap();

        assert_eq!(r.len(), 64);
        assert_eq!(&r[..16], b"{\"led\":\"toggle\"}");
        assert!(r[16..].iter().all(|b| *b == 0));
    }

    #[test]
    fn frame_rejects_oversize() {
        assert_eq!(
            frame(&[1u8; 65], 64),
            Err(ReportError::PayloadTooLarge {
                actual: 65,
                max: 64
            })
        );
    }

    #[test]
    fn payload_stops_at_terminator() {
        let mut r = vec![0u8; 32];
        r[..4].copy_from_slice(b"w0ok");

        assert_eq!(payload(&r), b"w0ok");
        assert_eq!(payload(b"full"), b"full");
        assert_eq!(payload(&[0u8; 8]), b"");
    }
}
