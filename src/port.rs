use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{BackendRef, RawPort};
use crate::status::{backend_error, Result, Status};

/// How a device is attached to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    Native,
    Usb,
    Bluetooth,
}

/// USB bus and device address of a port. `-1` marks an inapplicable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbBusAddress {
    pub bus: i32,
    pub address: i32,
}

impl Default for UsbBusAddress {
    fn default() -> Self {
        Self { bus: -1, address: -1 }
    }
}

/// USB vendor and product ID of a port. `-1` marks an inapplicable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbVidPid {
    pub vid: i32,
    pub pid: i32,
}

impl Default for UsbVidPid {
    fn default() -> Self {
        Self { vid: -1, pid: -1 }
    }
}

/// Shared handle to one discoverable serial device.
///
/// Clones share a single backend allocation; the backend handle is freed
/// exactly once, when the last clone is dropped. The default value is the
/// inert invalid port: every accessor returns its empty/`-1` sentinel and
/// opening it fails with `InvalidArgument`.
#[derive(Clone, Default)]
pub struct Port {
    inner: Option<Arc<PortInner>>,
}

struct PortInner {
    backend: BackendRef,
    raw: RawPort,
}

impl Drop for PortInner {
    fn drop(&mut self) {
        self.backend.free_port(self.raw);
    }
}

impl Port {
    /// The inert invalid-port sentinel, equal to `Port::default()`.
    pub fn invalid() -> Self {
        Self { inner: None }
    }

    pub(crate) fn from_raw(backend: BackendRef, raw: RawPort) -> Self {
        Self {
            inner: Some(Arc::new(PortInner { backend, raw })),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    pub(crate) fn session(&self) -> Option<(BackendRef, RawPort)> {
        self.inner
            .as_ref()
            .map(|inner| (inner.backend.clone(), inner.raw))
    }

    fn string_attr<F>(&self, attr: F) -> String
    where
        F: FnOnce(&BackendRef, RawPort) -> Option<String>,
    {
        match &self.inner {
            Some(inner) => attr(&inner.backend, inner.raw).unwrap_or_default(),
            None => String::new(),
        }
    }

    /// OS name of the port (e.g. `COM1` or `/dev/ttyUSB0`).
    pub fn name(&self) -> String {
        self.string_attr(|b, p| b.port_name(p))
    }

    /// Human-readable description for end users.
    pub fn description(&self) -> String {
        self.string_attr(|b, p| b.port_description(p))
    }

    /// Transport kind; the invalid port reports [`Transport::Native`].
    pub fn transport(&self) -> Transport {
        match &self.inner {
            Some(inner) => inner.backend.port_transport(inner.raw),
            None => Transport::Native,
        }
    }

    /// USB bus/address pair, or the `-1` sentinels for an invalid or
    /// non-USB port.
    pub fn usb_bus_address(&self) -> UsbBusAddress {
        match &self.inner {
            Some(inner) => match inner.backend.usb_bus_address(inner.raw) {
                Ok((bus, address)) => UsbBusAddress { bus, address },
                Err(_) => UsbBusAddress::default(),
            },
            None => UsbBusAddress::default(),
        }
    }

    /// USB VID/PID pair, or the `-1` sentinels for an invalid or non-USB
    /// port.
    pub fn usb_vid_pid(&self) -> UsbVidPid {
        match &self.inner {
            Some(inner) => match inner.backend.usb_vid_pid(inner.raw) {
                Ok((vid, pid)) => UsbVidPid { vid, pid },
                Err(_) => UsbVidPid::default(),
            },
            None => UsbVidPid::default(),
        }
    }

    pub fn usb_manufacturer(&self) -> String {
        self.string_attr(|b, p| b.usb_manufacturer(p))
    }

    pub fn usb_product(&self) -> String {
        self.string_attr(|b, p| b.usb_product(p))
    }

    pub fn usb_serial_number(&self) -> String {
        self.string_attr(|b, p| b.usb_serial_number(p))
    }

    pub fn bluetooth_address(&self) -> String {
        self.string_attr(|b, p| b.bluetooth_address(p))
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            f.debug_struct("Port").field("name", &self.name()).finish()
        } else {
            f.write_str("Port(invalid)")
        }
    }
}

/// Resolves a single port by its OS name.
pub fn get_port_by_name(backend: &BackendRef, name: &str) -> Result<Port> {
    match backend.port_by_name(name) {
        Ok(raw) => Ok(Port::from_raw(backend.clone(), raw)),
        Err(status) => Err(backend_error(backend, status)),
    }
}

/// Enumerates the available ports, preserving backend order.
///
/// The backend's list container is released before this returns; each
/// returned [`Port`] individually owns its handle. A cut-short enumeration
/// is reported as an error and any partially transferred handles are
/// released, not surfaced.
pub fn list_ports(backend: &BackendRef) -> Result<Vec<Port>> {
    let (status, list) = backend.list_ports();

    let mut ports = Vec::new();
    if let Some(list) = list {
        let raws = backend.take_list_entries(list);
        backend.free_port_list(list);
        ports = raws
            .into_iter()
            .map(|raw| Port::from_raw(backend.clone(), raw))
            .collect();
    }

    if status != Status::Ok {
        return Err(backend_error(backend, status));
    }
    log::debug!("enumerated {} port(s)", ports.len());
    Ok(ports)
}
