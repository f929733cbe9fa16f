//! Ownership, lifetime, and connection-state layer over a native
//! serial-port backend.
//!
//! The backend is reached only through the [`backend::SerialBackend`]
//! capability trait; [`backend::NativeBackend`] talks to real devices and
//! [`backend::MockBackend`] is an allocation-counting test double.

pub mod backend;
pub mod config;
pub mod connection;
pub mod port;
pub mod status;

pub use backend::{BackendRef, SerialBackend};
pub use config::{Parity, PortConfig};
pub use connection::{Buffers, Connection, Mode};
pub use port::{get_port_by_name, list_ports, Port, Transport, UsbBusAddress, UsbVidPid};
pub use status::{Error, ErrorMessage, Result, Status};
