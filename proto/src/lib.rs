// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol / wire definitions for communication with the signing device
//!
//! The device speaks two protocols over the same USB HID interface:
//!
//! - In _application_ mode, commands are UTF-8 JSON objects (see [command]),
//!   optionally wrapped in an encrypted [envelope], carried in fixed
//!   [`APP_REPORT`] sized reports.
//! - In _bootloader_ mode, a small binary command set (see [bootloader])
//!   is used to erase, write and verify the firmware image, using the
//!   asymmetric [`BOOTLOADER_REPORT`] sizes.
//!
//! The [relay] module describes the wire format of the pairing relay server
//! used to reach the mobile verification app.
//!
//! This crate contains no I/O and no cryptography, see `dbb-core` for the
//! envelope codec and `dbb` for transports.

pub mod bootloader;
pub mod command;
pub mod envelope;
pub mod mode;
pub mod relay;
pub mod reply;
pub mod report;

pub use command::Command;
pub use mode::DeviceMode;
pub use reply::{DeviceError, Reply};
pub use report::ReportSizes;

/// USB vendor ID for device enumeration
pub const VENDOR_ID: u16 = 0x03eb;

/// USB product ID for device enumeration
pub const PRODUCT_ID: u16 = 0x2402;

/// Report sizes for the JSON (application) protocol
pub const APP_REPORT: ReportSizes = ReportSizes {
    write: 2048,
    read: 2048,
};

/// Report sizes for the binary bootloader protocol
pub const BOOTLOADER_REPORT: ReportSizes = ReportSizes {
    write: 4098,
    read: 256,
};

/// Length of the firmware image (flash size minus bootloader)
pub const FIRMWARE_LEN: usize = 0x37000;

/// Firmware transfer chunk size
pub const FIRMWARE_CHUNK_LEN: usize = 4096;

/// Length of the signature block preceding signed firmware images
pub const FIRMWARE_SIG_LEN: usize = 7 * 64;

/// Number of chunks in a complete firmware image
pub const FIRMWARE_CHUNKS: usize = FIRMWARE_LEN / FIRMWARE_CHUNK_LEN;

/// Device error code signalling the user aborted a touch confirmation
pub const ERR_TOUCH_ABORT: u16 = 600;

/// Device error code signalling a touch confirmation timed out
pub const ERR_TOUCH_TIMEOUT: u16 = 601;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn firmware_fits_chunks() {
        assert_eq!(FIRMWARE_LEN % FIRMWARE_CHUNK_LEN, 0);
        assert_eq!(FIRMWARE_CHUNKS, 55);

        // Chunk index must fit in the single index byte of a write frame
        assert!(FIRMWARE_CHUNKS <= u8::MAX as usize);

        // Write frames carry opcode + index + one chunk
        assert_eq!(BOOTLOADER_REPORT.write, FIRMWARE_CHUNK_LEN + 2);
    }
}
