// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Signing device API Library (and CLI)
//!
//! - [DeviceProvider] enumerates USB-HID devices and probes their [DeviceMode]
//! - [Executor] owns the device [Transport] and serialises command execution
//! - [FirmwareUpgrade] drives the bootloader unlock, flash and relock sequence
//! - [RelayChannel] exchanges encrypted payloads with the mobile verification app

use async_trait::async_trait;

/// Re-export transports for consumer use
pub mod transport;
pub use transport::Transport;

mod error;
pub use error::Error;

pub mod executor;
pub use executor::Executor;

pub mod firmware;
pub use firmware::{FirmwareUpgrade, Replug, UpgradeConfig};

pub mod relay;
pub use relay::{RelayChannel, RelayConfig};

/// Re-export `dbb-core` and `dbb-proto` for consumers
pub use dbb_core;
pub use dbb_proto::{self as proto};
pub use dbb_proto::DeviceMode;

/// Connect trait for device providers
#[async_trait]
pub trait Connect: Send + Sync {
    /// Probe the mode of the attached device
    async fn detect(&self) -> Result<DeviceMode, Error>;

    /// Open a transport to the attached device
    async fn connect(&self) -> Result<Box<dyn Transport>, Error>;
}

#[cfg(feature = "transport_hid")]
pub use provider::{DeviceInfo, DeviceProvider};

#[cfg(feature = "transport_hid")]
mod provider {
    use std::{
        ffi::CString,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use hidapi::HidApi;
    use log::debug;

    use dbb_proto::{DeviceMode, PRODUCT_ID, VENDOR_ID};

    use crate::{
        transport::{lock, HandleRegistry, HidTransport},
        Connect, Error, Transport,
    };

    /// Device provider manages HID enumeration and connections
    ///
    /// NOTE: only one provider should exist at a time (global HID context on macos)
    #[derive(Clone)]
    pub struct DeviceProvider {
        api: Arc<Mutex<HidApi>>,
        handles: HandleRegistry<CString>,
    }

    /// Enumerated device information
    #[derive(Clone, PartialEq, Debug)]
    pub struct DeviceInfo {
        /// Platform device path
        pub path: CString,
        /// Serial number string
        pub serial: Option<String>,
        /// Product string
        pub product: Option<String>,
        /// Mode derived from the serial number
        pub mode: DeviceMode,
    }

    impl DeviceProvider {
        /// Create a new device provider
        pub fn new() -> Result<Self, Error> {
            let api = HidApi::new().map_err(|_| Error::HidInit)?;

            Ok(Self {
                api: Arc::new(Mutex::new(api)),
                handles: HandleRegistry::new(),
            })
        }

        /// List devices matching the vendor / product filter
        pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, Error> {
            let mut api = lock(&self.api);
            api.refresh_devices()?;

            let devices: Vec<_> = api
                .device_list()
                .filter(|d| d.vendor_id() == VENDOR_ID && d.product_id() == PRODUCT_ID)
                .map(|d| DeviceInfo {
                    path: d.path().to_owned(),
                    serial: d.serial_number().map(str::to_string),
                    product: d.product_string().map(str::to_string),
                    mode: DeviceMode::from_serial(d.serial_number()),
                })
                .collect();

            debug!("Found {} devices: {:?}", devices.len(), devices);

            Ok(devices)
        }

        /// Probe the mode of the first matching device
        pub fn probe(&self) -> Result<DeviceMode, Error> {
            let m = match self.list_devices()?.first() {
                Some(d) => d.mode,
                None => DeviceMode::NoDevice,
            };
            Ok(m)
        }

        /// Open a transport to the specified device
        pub fn open(&self, info: &DeviceInfo) -> Result<HidTransport, Error> {
            HidTransport::open(self.api.clone(), &self.handles, info.path.clone())
        }

        /// Open a transport to the first matching device
        pub fn open_first(&self) -> Result<HidTransport, Error> {
            let d = self
                .list_devices()?
                .into_iter()
                .next()
                .ok_or(Error::DeviceNotFound)?;
            self.open(&d)
        }
    }

    #[async_trait]
    impl Connect for DeviceProvider {
        async fn detect(&self) -> Result<DeviceMode, Error> {
            self.probe()
        }

        async fn connect(&self) -> Result<Box<dyn Transport>, Error> {
            let t = self.open_first()?;
            Ok(Box::new(t))
        }
    }

    impl DeviceInfo {
        /// Firmware or bootloader version from the serial number
        pub fn version(&self) -> Option<&str> {
            self.serial.as_deref().and_then(DeviceMode::version)
        }
    }

    impl std::fmt::Display for DeviceInfo {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "{:16} (USB, {:04x}:{:04x}, {} {})",
                self.product.as_deref().unwrap_or("UNKNOWN"),
                VENDOR_ID,
                PRODUCT_ID,
                self.mode,
                self.version().unwrap_or("UNKNOWN"),
            )
        }
    }

}

/// Shared providers
#[async_trait]
impl<C: Connect + ?Sized> Connect for std::sync::Arc<C> {
    async fn detect(&self) -> Result<DeviceMode, Error> {
        (**self).detect().await
    }

    async fn connect(&self) -> Result<Box<dyn Transport>, Error> {
        (**self).connect().await
    }
}
