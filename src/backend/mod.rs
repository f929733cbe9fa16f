pub mod mock;
pub mod native;

pub use mock::{MockBackend, MockDevice};
pub use native::NativeBackend;

use std::sync::Arc;
use std::time::Duration;

use crate::config::Parity;
use crate::connection::{Buffers, Mode};
use crate::port::Transport;
use crate::status::Status;

/// Opaque token for a backend-allocated device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawPort(pub u64);

/// Opaque token for a backend-allocated list container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawPortList(pub u64);

/// Opaque token for a backend-allocated configuration object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawConfig(pub u64);

/// Opaque token for a backend-allocated error-message string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawMessage(pub u64);

/// Outcome of a backend primitive: a value on success, a non-`Ok` status
/// otherwise.
pub type BackendResult<T> = std::result::Result<T, Status>;

/// The narrow capability contract the core builds on.
///
/// Every `Raw*` token handed out by an allocating primitive must be released
/// through its matching free primitive exactly once; the ownership layer in
/// [`crate::port`], [`crate::config`] and [`crate::status`] is what enforces
/// that. Implementations use interior mutability and must tolerate calls in
/// any externally serialized order.
pub trait SerialBackend: Send + Sync {
    // Discovery

    /// Resolves a device by its OS name.
    fn port_by_name(&self, name: &str) -> BackendResult<RawPort>;

    /// Enumerates all devices into a freshly allocated list container.
    ///
    /// A container may be returned together with a non-`Ok` status when the
    /// enumeration was cut short; the caller still owns the container and
    /// every handle inside it.
    fn list_ports(&self) -> (Status, Option<RawPortList>);

    /// Transfers ownership of every handle out of the container, in
    /// enumeration order. The emptied container must still be released with
    /// [`SerialBackend::free_port_list`].
    fn take_list_entries(&self, list: RawPortList) -> Vec<RawPort>;

    /// Releases the list container only, never the handles it referenced.
    fn free_port_list(&self, list: RawPortList);

    fn free_port(&self, port: RawPort);

    // Metadata (`None` mirrors the backend's NULL for inapplicable fields)

    fn port_name(&self, port: RawPort) -> Option<String>;
    fn port_description(&self, port: RawPort) -> Option<String>;
    fn port_transport(&self, port: RawPort) -> Transport;
    fn usb_bus_address(&self, port: RawPort) -> BackendResult<(i32, i32)>;
    fn usb_vid_pid(&self, port: RawPort) -> BackendResult<(i32, i32)>;
    fn usb_manufacturer(&self, port: RawPort) -> Option<String>;
    fn usb_product(&self, port: RawPort) -> Option<String>;
    fn usb_serial_number(&self, port: RawPort) -> Option<String>;
    fn bluetooth_address(&self, port: RawPort) -> Option<String>;

    // Session

    fn open(&self, port: RawPort, mode: Mode) -> Status;
    fn close(&self, port: RawPort) -> Status;

    // Configuration

    fn new_config(&self) -> BackendResult<RawConfig>;
    fn free_config(&self, config: RawConfig);

    /// Populates `config` from the live device.
    fn read_config(&self, port: RawPort, config: RawConfig) -> Status;

    /// Applies the fields set in `config` to the live device.
    fn apply_config(&self, port: RawPort, config: RawConfig) -> Status;

    fn config_baud_rate(&self, config: RawConfig) -> BackendResult<i32>;
    fn set_config_baud_rate(&self, config: RawConfig, baud_rate: i32) -> Status;
    fn config_bits(&self, config: RawConfig) -> BackendResult<i32>;
    fn set_config_bits(&self, config: RawConfig, bits: i32) -> Status;
    fn config_stop_bits(&self, config: RawConfig) -> BackendResult<i32>;
    fn set_config_stop_bits(&self, config: RawConfig, stop_bits: i32) -> Status;
    fn config_parity(&self, config: RawConfig) -> BackendResult<Parity>;
    fn set_config_parity(&self, config: RawConfig, parity: Parity) -> Status;

    // I/O

    fn read_blocking(&self, port: RawPort, buf: &mut [u8], timeout: Duration)
        -> BackendResult<usize>;
    fn read_next_blocking(&self, port: RawPort, buf: &mut [u8], timeout: Duration)
        -> BackendResult<usize>;
    fn read_nonblocking(&self, port: RawPort, buf: &mut [u8]) -> BackendResult<usize>;
    fn write_blocking(&self, port: RawPort, buf: &[u8], timeout: Duration)
        -> BackendResult<usize>;
    fn write_nonblocking(&self, port: RawPort, buf: &[u8]) -> BackendResult<usize>;
    fn input_waiting(&self, port: RawPort) -> BackendResult<usize>;
    fn output_waiting(&self, port: RawPort) -> BackendResult<usize>;
    fn flush(&self, port: RawPort, buffers: Buffers) -> Status;
    fn drain(&self, port: RawPort) -> Status;

    // Error reporting

    /// Allocates a backend-owned copy of the current system-error string.
    fn last_error_message(&self) -> RawMessage;
    fn message_text(&self, message: RawMessage) -> String;
    fn free_error_message(&self, message: RawMessage);
}

/// Shared reference to a backend implementation.
pub type BackendRef = Arc<dyn SerialBackend>;
