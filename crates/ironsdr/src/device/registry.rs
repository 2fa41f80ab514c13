// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Device enumeration and opening.
//!
//! Transports register a [`ConnectionFactory`]; enumeration yields opaque
//! handle strings of the form
//! `ironsdr:media=usb,name=IronSDR-USB,serial=0000000000000009,addr=1.4`
//! and [`open`] routes a handle back to the factory that produced it.

use crate::device::facade::SdrDevice;
use crate::error::{Error, Result};
use parking_lot::RwLock;

/// Parsed device handle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceHandle {
    /// Transport kind: `usb`, `pcie`, `mock`...
    pub media: String,
    /// Board name.
    pub name: String,
    /// Serial number, hex.
    pub serial: String,
    /// Transport address (bus.port, BDF, ...).
    pub addr: String,
}

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ironsdr:media={},name={},serial={},addr={}",
            self.media, self.name, self.serial, self.addr
        )
    }
}

impl DeviceHandle {
    /// Parse a handle string produced by [`DeviceHandle::to_string`].
    pub fn parse(text: &str) -> Result<Self> {
        let body = text
            .strip_prefix("ironsdr:")
            .ok_or_else(|| Error::InvalidArgument(format!("not an ironsdr handle: {}", text)))?;
        let mut handle = DeviceHandle::default();
        for field in body.split(',') {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| Error::InvalidArgument(format!("malformed handle field: {}", field)))?;
            match key {
                "media" => handle.media = value.to_string(),
                "name" => handle.name = value.to_string(),
                "serial" => handle.serial = value.to_string(),
                "addr" => handle.addr = value.to_string(),
                _ => {}
            }
        }
        if handle.media.is_empty() {
            return Err(Error::InvalidArgument(format!("handle names no media: {}", text)));
        }
        Ok(handle)
    }
}

/// A transport backend able to discover and open boards.
pub trait ConnectionFactory: Send + Sync {
    /// Transport kind this factory serves (`usb`, `pcie`, `mock`).
    fn media(&self) -> &'static str;
    /// Probe for attached boards.
    fn enumerate(&self) -> Vec<DeviceHandle>;
    /// Open one of this factory's handles.
    fn open(&self, handle: &DeviceHandle) -> Result<SdrDevice>;
}

static FACTORIES: RwLock<Vec<Box<dyn ConnectionFactory>>> = RwLock::new(Vec::new());

/// Register a transport backend. Typically called once per linked transport
/// at startup; tests register mock factories.
pub fn register_factory(factory: Box<dyn ConnectionFactory>) {
    FACTORIES.write().push(factory);
}

/// Drop all registered factories.
pub fn clear_factories() {
    FACTORIES.write().clear();
}

/// Serialized handles of every board every registered transport can see.
#[must_use]
pub fn get_device_list() -> Vec<String> {
    FACTORIES
        .read()
        .iter()
        .flat_map(|f| f.enumerate())
        .map(|h| h.to_string())
        .collect()
}

/// Open a device by handle string.
pub fn open(handle: &str) -> Result<SdrDevice> {
    let parsed = DeviceHandle::parse(handle)?;
    let factories = FACTORIES.read();
    let factory = factories
        .iter()
        .find(|f| f.media() == parsed.media)
        .ok_or_else(|| {
            Error::InvalidArgument(format!("no transport registered for media '{}'", parsed.media))
        })?;
    log::info!("[DEV] opening {}", parsed);
    factory.open(&parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_roundtrip() {
        let handle = DeviceHandle {
            media: "usb".to_string(),
            name: "IronSDR-USB".to_string(),
            serial: "0009".to_string(),
            addr: "1.4".to_string(),
        };
        let text = handle.to_string();
        assert_eq!(DeviceHandle::parse(&text).expect("parse should succeed"), handle);
    }

    #[test]
    fn test_rejects_foreign_handles() {
        assert!(DeviceHandle::parse("soapy:driver=rtlsdr").is_err());
        assert!(DeviceHandle::parse("ironsdr:name=X").is_err());
    }
}
