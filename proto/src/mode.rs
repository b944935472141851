// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device mode detection

use strum::{Display, EnumString, EnumVariantNames};

/// Serial number prefix reported by the application firmware
pub const APP_SERIAL_PREFIX: &str = "dbb.fw:";

/// Serial number prefix reported by the bootloader
pub const BOOTLOADER_SERIAL_PREFIX: &str = "dbb.bl:";

/// Device mode, determines which protocol may be used
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, EnumVariantNames)]
#[strum(serialize_all = "snake_case")]
pub enum DeviceMode {
    /// No matching device enumerated
    NoDevice,
    /// Bootloader, accepts firmware writes only
    Bootloader,
    /// Application firmware, accepts JSON commands
    Application,
    /// Device present but mode could not be determined
    Unknown,
}

impl DeviceMode {
    /// Determine the mode of an enumerated device from its serial number string
    pub fn from_serial(serial: Option<&str>) -> Self {
        match serial {
            Some(s) if s.starts_with(APP_SERIAL_PREFIX) => Self::Application,
            Some(s) if s.starts_with(BOOTLOADER_SERIAL_PREFIX) => Self::Bootloader,
            _ => Self::Unknown,
        }
    }

    /// Version string following the mode prefix, if any
    pub fn version(serial: &str) -> Option<&str> {
        serial
            .strip_prefix(APP_SERIAL_PREFIX)
            .or_else(|| serial.strip_prefix(BOOTLOADER_SERIAL_PREFIX))
    }
}
