// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transport abstraction for exchanging fixed size reports with a device
//!
//! Transports are synchronous and owned by the [Executor][crate::Executor]
//! worker, no other component calls a transport while the worker holds it.

use std::{
    collections::HashSet,
    fmt::Debug,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard},
};

use log::trace;

use dbb_proto::{ReportSizes, APP_REPORT};

use crate::Error;

/// Report exchange with a connected device
pub trait Transport: Send {
    /// Write one report of `sizes.write` bytes (zero padding `payload`),
    /// then block until `sizes.read` bytes have been read back
    fn exchange(&mut self, payload: &[u8], sizes: ReportSizes) -> Result<Vec<u8>, Error>;

    /// Exchange an application protocol report
    fn send(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        self.exchange(payload, APP_REPORT)
    }

    /// Check the transport holds a handle and the device is still present
    fn is_open(&self) -> bool;

    /// Release the device handle, safe to call when already closed
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn exchange(&mut self, payload: &[u8], sizes: ReportSizes) -> Result<Vec<u8>, Error> {
        (**self).exchange(payload, sizes)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Registry of open device handles, allowing at most one handle per device
/// identity (a platform path for HID devices)
pub struct HandleRegistry<K> {
    open: Arc<Mutex<HashSet<K>>>,
}

impl<K: Clone + Eq + Hash + Debug> HandleRegistry<K> {
    pub fn new() -> Self {
        Self {
            open: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Claim the handle for `id`, failing with [Error::AlreadyOpen] while
    /// another [HandleGuard] for the same device is live
    pub fn claim(&self, id: K) -> Result<HandleGuard<K>, Error> {
        if !lock(&self.open).insert(id.clone()) {
            return Err(Error::AlreadyOpen);
        }

        trace!("Claimed device handle: {:?}", id);

        Ok(HandleGuard {
            id,
            open: self.open.clone(),
        })
    }

    /// Check whether a handle is held for `id`
    pub fn is_open(&self, id: &K) -> bool {
        lock(&self.open).contains(id)
    }
}

impl<K: Clone + Eq + Hash + Debug> Default for HandleRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for HandleRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            open: self.open.clone(),
        }
    }
}

/// Claimed device handle, released on drop
pub struct HandleGuard<K: Eq + Hash> {
    id: K,
    open: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash> HandleGuard<K> {
    /// Device identity for this handle
    pub fn id(&self) -> &K {
        &self.id
    }
}

impl<K: Eq + Hash> Drop for HandleGuard<K> {
    fn drop(&mut self) {
        lock(&self.open).remove(&self.id);
    }
}

/// Write a complete report buffer (including the report ID) in one call,
/// short writes are an error
#[cfg_attr(not(feature = "transport_hid"), allow(dead_code))]
pub(crate) fn write_report(
    buff: &[u8],
    write: impl FnOnce(&[u8]) -> Result<usize, Error>,
) -> Result<(), Error> {
    let n = write(buff)?;
    if n < buff.len() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            format!("short HID write ({n} of {} bytes)", buff.len()),
        )));
    }
    Ok(())
}

/// Read until a full `len` byte report has arrived, a zero length read
/// before completion is an unexpected EOF
#[cfg_attr(not(feature = "transport_hid"), allow(dead_code))]
pub(crate) fn read_report(
    len: usize,
    mut read: impl FnMut(&mut [u8]) -> Result<usize, Error>,
) -> Result<Vec<u8>, Error> {
    let mut resp = vec![0u8; len];
    let mut n = 0;

    while n < len {
        let v = read(&mut resp[n..])?;
        if v == 0 {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        n += v;
    }

    Ok(resp)
}

/// Lock a mutex, recovering the value from a poisoned lock
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(feature = "transport_hid")]
pub use hid::HidTransport;

#[cfg(feature = "transport_hid")]
mod hid {
    use std::{
        ffi::CString,
        sync::{Arc, Mutex},
    };

    use hidapi::{HidApi, HidDevice};
    use log::{debug, trace};

    use dbb_proto::{report, ReportSizes};

    use super::{lock, read_report, write_report, HandleGuard, HandleRegistry, Transport};
    use crate::Error;

    /// Report ID prefixed to every HID write
    const REPORT_ID: u8 = 0x00;

    /// USB-HID transport for a single device path
    pub struct HidTransport {
        device: Option<HidDevice>,
        path: CString,
        api: Arc<Mutex<HidApi>>,
        handle: Option<HandleGuard<CString>>,
    }

    impl HidTransport {
        /// Open the device at `path`, claiming its handle in `handles`
        pub(crate) fn open(
            api: Arc<Mutex<HidApi>>,
            handles: &HandleRegistry<CString>,
            path: CString,
        ) -> Result<Self, Error> {
            // Released on error by dropping the guard
            let handle = handles.claim(path.clone())?;

            let device = lock(&api).open_path(&path)?;

            debug!("Opened HID device: {:?}", path);

            Ok(Self {
                device: Some(device),
                path,
                api,
                handle: Some(handle),
            })
        }

        /// Device path for this transport
        pub fn path(&self) -> &CString {
            &self.path
        }
    }

    impl Transport for HidTransport {
        fn exchange(&mut self, payload: &[u8], sizes: ReportSizes) -> Result<Vec<u8>, Error> {
            let d = self.device.as_ref().ok_or(Error::DeviceNotFound)?;

            // Build report with leading report ID
            let r = report::frame(payload, sizes.write)?;

            let mut buff = Vec::with_capacity(r.len() + 1);
            buff.push(REPORT_ID);
            buff.extend_from_slice(&r);

            trace!("HID write {} bytes", buff.len());

            write_report(&buff, |b| Ok(d.write(b)?))?;

            let resp = read_report(sizes.read, |b| Ok(d.read(b)?))?;

            trace!("HID read {} bytes", resp.len());

            Ok(resp)
        }

        fn is_open(&self) -> bool {
            if self.device.is_none() {
                return false;
            }

            // Re-check bus presence
            let mut api = lock(&self.api);
            if let Err(e) = api.refresh_devices() {
                debug!("HID refresh failed: {}", e);
                return false;
            }

            api.device_list()
                .any(|d| d.path() == self.path.as_c_str())
        }

        fn close(&mut self) {
            if self.device.take().is_some() {
                debug!("Closed HID device: {:?}", self.path);
            }
            self.handle = None;
        }
    }

    impl Drop for HidTransport {
        fn drop(&mut self) {
            self.close();
        }
    }
}
