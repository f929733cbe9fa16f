//! Allocation-counting test double for the backend contract.
//!
//! Every allocating primitive is tracked in a live table, so tests can
//! assert that each resource kind is released exactly once and that nothing
//! stays outstanding. Open sessions carry a loopback buffer: written bytes
//! become readable on the same handle.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{BackendResult, RawConfig, RawMessage, RawPort, RawPortList, SerialBackend};
use crate::config::Parity;
use crate::connection::{Buffers, Mode};
use crate::port::Transport;
use crate::status::Status;

/// Description of one simulated device.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub name: String,
    pub description: String,
    pub transport: Transport,
    pub usb_bus_address: (i32, i32),
    pub usb_vid_pid: (i32, i32),
    pub usb_manufacturer: Option<String>,
    pub usb_product: Option<String>,
    pub usb_serial_number: Option<String>,
    pub bluetooth_address: Option<String>,
}

impl MockDevice {
    pub fn native(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: format!("native port {name}"),
            transport: Transport::Native,
            usb_bus_address: (-1, -1),
            usb_vid_pid: (-1, -1),
            usb_manufacturer: None,
            usb_product: None,
            usb_serial_number: None,
            bluetooth_address: None,
        }
    }

    pub fn usb(name: &str, vid: i32, pid: i32) -> Self {
        Self {
            name: name.to_string(),
            description: format!("usb port {name}"),
            transport: Transport::Usb,
            usb_bus_address: (1, 1),
            usb_vid_pid: (vid, pid),
            usb_manufacturer: Some("Mock Industries".to_string()),
            usb_product: Some("Mock Serial".to_string()),
            usb_serial_number: Some("MOCK-0001".to_string()),
            bluetooth_address: None,
        }
    }

    pub fn bluetooth(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            description: format!("bluetooth port {name}"),
            transport: Transport::Bluetooth,
            usb_bus_address: (-1, -1),
            usb_vid_pid: (-1, -1),
            usb_manufacturer: None,
            usb_product: None,
            usb_serial_number: None,
            bluetooth_address: Some(address.to_string()),
        }
    }
}

// Device-side settings of an open session.
#[derive(Debug, Clone, Copy)]
struct Settings {
    baud_rate: i32,
    bits: i32,
    stop_bits: i32,
    parity: Parity,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

// A configuration object: fields stay unset until written.
#[derive(Debug, Clone, Copy, Default)]
struct StoredConfig {
    baud_rate: Option<i32>,
    bits: Option<i32>,
    stop_bits: Option<i32>,
    parity: Option<Parity>,
}

struct Session {
    mode: Mode,
    settings: Settings,
    loopback: VecDeque<u8>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    devices: Vec<MockDevice>,
    ports: HashMap<u64, usize>,
    lists: HashMap<u64, Vec<RawPort>>,
    configs: HashMap<u64, StoredConfig>,
    messages: HashMap<u64, String>,
    sessions: HashMap<u64, Session>,
    next_status: Option<Status>,
    partial_enumeration: bool,
    system_error: Option<String>,
    close_calls: usize,
}

impl MockState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn injected(&self) -> Status {
        self.next_status.unwrap_or(Status::Ok)
    }

    fn alloc_port(&mut self, device: usize) -> RawPort {
        let id = self.alloc_id();
        self.ports.insert(id, device);
        RawPort(id)
    }
}

/// In-memory stand-in for the native backend.
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            state: Mutex::new(MockState {
                devices,
                ..MockState::default()
            }),
        }
    }

    /// Makes the next fallible primitives report `status` until reset.
    pub fn set_next_status(&self, status: Status) {
        self.state.lock().next_status = Some(status);
    }

    /// Overrides the text handed out for system errors.
    pub fn set_system_error(&self, text: &str) {
        self.state.lock().system_error = Some(text.to_string());
    }

    /// When set, a failing enumeration still hands out a populated list
    /// container, exercising the cut-short path.
    pub fn set_partial_enumeration(&self, partial: bool) {
        self.state.lock().partial_enumeration = partial;
    }

    pub fn allocated_ports(&self) -> usize {
        self.state.lock().ports.len()
    }

    pub fn allocated_lists(&self) -> usize {
        self.state.lock().lists.len()
    }

    pub fn allocated_configs(&self) -> usize {
        self.state.lock().configs.len()
    }

    pub fn allocated_messages(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Total number of close calls the backend has seen.
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }
}

impl SerialBackend for MockBackend {
    fn port_by_name(&self, name: &str) -> BackendResult<RawPort> {
        let mut st = self.state.lock();
        if st.injected() != Status::Ok {
            return Err(st.injected());
        }
        match st.devices.iter().position(|d| d.name == name) {
            Some(device) => Ok(st.alloc_port(device)),
            None => Err(Status::InvalidArgument),
        }
    }

    fn list_ports(&self) -> (Status, Option<RawPortList>) {
        let mut st = self.state.lock();
        let status = st.injected();
        if status != Status::Ok && !st.partial_enumeration {
            return (status, None);
        }
        let entries: Vec<RawPort> = (0..st.devices.len()).map(|i| st.alloc_port(i)).collect();
        let id = st.alloc_id();
        st.lists.insert(id, entries);
        (status, Some(RawPortList(id)))
    }

    fn take_list_entries(&self, list: RawPortList) -> Vec<RawPort> {
        let mut st = self.state.lock();
        st.lists
            .get_mut(&list.0)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn free_port_list(&self, list: RawPortList) {
        self.state.lock().lists.remove(&list.0);
    }

    fn free_port(&self, port: RawPort) {
        self.state.lock().ports.remove(&port.0);
    }

    fn port_name(&self, port: RawPort) -> Option<String> {
        let st = self.state.lock();
        let device = *st.ports.get(&port.0)?;
        Some(st.devices[device].name.clone())
    }

    fn port_description(&self, port: RawPort) -> Option<String> {
        let st = self.state.lock();
        let device = *st.ports.get(&port.0)?;
        Some(st.devices[device].description.clone())
    }

    fn port_transport(&self, port: RawPort) -> Transport {
        let st = self.state.lock();
        match st.ports.get(&port.0) {
            Some(&device) => st.devices[device].transport,
            None => Transport::Native,
        }
    }

    fn usb_bus_address(&self, port: RawPort) -> BackendResult<(i32, i32)> {
        let st = self.state.lock();
        match st.ports.get(&port.0) {
            Some(&device) if st.devices[device].transport == Transport::Usb => {
                Ok(st.devices[device].usb_bus_address)
            }
            _ => Err(Status::InvalidArgument),
        }
    }

    fn usb_vid_pid(&self, port: RawPort) -> BackendResult<(i32, i32)> {
        let st = self.state.lock();
        match st.ports.get(&port.0) {
            Some(&device) if st.devices[device].transport == Transport::Usb => {
                Ok(st.devices[device].usb_vid_pid)
            }
            _ => Err(Status::InvalidArgument),
        }
    }

    fn usb_manufacturer(&self, port: RawPort) -> Option<String> {
        let st = self.state.lock();
        let device = *st.ports.get(&port.0)?;
        st.devices[device].usb_manufacturer.clone()
    }

    fn usb_product(&self, port: RawPort) -> Option<String> {
        let st = self.state.lock();
        let device = *st.ports.get(&port.0)?;
        st.devices[device].usb_product.clone()
    }

    fn usb_serial_number(&self, port: RawPort) -> Option<String> {
        let st = self.state.lock();
        let device = *st.ports.get(&port.0)?;
        st.devices[device].usb_serial_number.clone()
    }

    fn bluetooth_address(&self, port: RawPort) -> Option<String> {
        let st = self.state.lock();
        let device = *st.ports.get(&port.0)?;
        st.devices[device].bluetooth_address.clone()
    }

    fn open(&self, port: RawPort, mode: Mode) -> Status {
        let mut st = self.state.lock();
        let status = st.injected();
        if status != Status::Ok {
            return status;
        }
        if !st.ports.contains_key(&port.0) || st.sessions.contains_key(&port.0) {
            return Status::InvalidArgument;
        }
        st.sessions.insert(
            port.0,
            Session {
                mode,
                settings: Settings::default(),
                loopback: VecDeque::new(),
            },
        );
        Status::Ok
    }

    fn close(&self, port: RawPort) -> Status {
        let mut st = self.state.lock();
        st.close_calls += 1;
        match st.sessions.remove(&port.0) {
            Some(_) => Status::Ok,
            None => Status::InvalidArgument,
        }
    }

    fn new_config(&self) -> BackendResult<RawConfig> {
        let mut st = self.state.lock();
        if st.injected() != Status::Ok {
            return Err(st.injected());
        }
        let id = st.alloc_id();
        st.configs.insert(id, StoredConfig::default());
        Ok(RawConfig(id))
    }

    fn free_config(&self, config: RawConfig) {
        self.state.lock().configs.remove(&config.0);
    }

    fn read_config(&self, port: RawPort, config: RawConfig) -> Status {
        let mut st = self.state.lock();
        if st.injected() != Status::Ok {
            return st.injected();
        }
        let settings = match st.sessions.get(&port.0) {
            Some(session) => session.settings,
            None => return Status::InvalidArgument,
        };
        match st.configs.get_mut(&config.0) {
            Some(stored) => {
                *stored = StoredConfig {
                    baud_rate: Some(settings.baud_rate),
                    bits: Some(settings.bits),
                    stop_bits: Some(settings.stop_bits),
                    parity: Some(settings.parity),
                };
                Status::Ok
            }
            None => Status::InvalidArgument,
        }
    }

    fn apply_config(&self, port: RawPort, config: RawConfig) -> Status {
        let mut st = self.state.lock();
        if st.injected() != Status::Ok {
            return st.injected();
        }
        let stored = match st.configs.get(&config.0) {
            Some(stored) => *stored,
            None => return Status::InvalidArgument,
        };
        match st.sessions.get_mut(&port.0) {
            Some(session) => {
                if let Some(baud_rate) = stored.baud_rate {
                    session.settings.baud_rate = baud_rate;
                }
                if let Some(bits) = stored.bits {
                    session.settings.bits = bits;
                }
                if let Some(stop_bits) = stored.stop_bits {
                    session.settings.stop_bits = stop_bits;
                }
                if let Some(parity) = stored.parity {
                    session.settings.parity = parity;
                }
                Status::Ok
            }
            None => Status::InvalidArgument,
        }
    }

    fn config_baud_rate(&self, config: RawConfig) -> BackendResult<i32> {
        let st = self.state.lock();
        match st.configs.get(&config.0) {
            Some(stored) => Ok(stored.baud_rate.unwrap_or(-1)),
            None => Err(Status::InvalidArgument),
        }
    }

    fn set_config_baud_rate(&self, config: RawConfig, baud_rate: i32) -> Status {
        let mut st = self.state.lock();
        match st.configs.get_mut(&config.0) {
            Some(stored) => {
                stored.baud_rate = Some(baud_rate);
                Status::Ok
            }
            None => Status::InvalidArgument,
        }
    }

    fn config_bits(&self, config: RawConfig) -> BackendResult<i32> {
        let st = self.state.lock();
        match st.configs.get(&config.0) {
            Some(stored) => Ok(stored.bits.unwrap_or(-1)),
            None => Err(Status::InvalidArgument),
        }
    }

    fn set_config_bits(&self, config: RawConfig, bits: i32) -> Status {
        let mut st = self.state.lock();
        match st.configs.get_mut(&config.0) {
            Some(stored) => {
                stored.bits = Some(bits);
                Status::Ok
            }
            None => Status::InvalidArgument,
        }
    }

    fn config_stop_bits(&self, config: RawConfig) -> BackendResult<i32> {
        let st = self.state.lock();
        match st.configs.get(&config.0) {
            Some(stored) => Ok(stored.stop_bits.unwrap_or(-1)),
            None => Err(Status::InvalidArgument),
        }
    }

    fn set_config_stop_bits(&self, config: RawConfig, stop_bits: i32) -> Status {
        let mut st = self.state.lock();
        match st.configs.get_mut(&config.0) {
            Some(stored) => {
                stored.stop_bits = Some(stop_bits);
                Status::Ok
            }
            None => Status::InvalidArgument,
        }
    }

    fn config_parity(&self, config: RawConfig) -> BackendResult<Parity> {
        let st = self.state.lock();
        match st.configs.get(&config.0) {
            Some(stored) => Ok(stored.parity.unwrap_or(Parity::Invalid)),
            None => Err(Status::InvalidArgument),
        }
    }

    fn set_config_parity(&self, config: RawConfig, parity: Parity) -> Status {
        let mut st = self.state.lock();
        match st.configs.get_mut(&config.0) {
            Some(stored) => {
                stored.parity = Some(parity);
                Status::Ok
            }
            None => Status::InvalidArgument,
        }
    }

    // Reads drain the loopback buffer immediately; a short count stands in
    // for an expired timeout.
    fn read_blocking(
        &self,
        port: RawPort,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> BackendResult<usize> {
        self.pop_bytes(port, buf)
    }

    fn read_next_blocking(
        &self,
        port: RawPort,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> BackendResult<usize> {
        self.pop_bytes(port, buf)
    }

    fn read_nonblocking(&self, port: RawPort, buf: &mut [u8]) -> BackendResult<usize> {
        self.pop_bytes(port, buf)
    }

    fn write_blocking(
        &self,
        port: RawPort,
        buf: &[u8],
        _timeout: Duration,
    ) -> BackendResult<usize> {
        self.push_bytes(port, buf)
    }

    fn write_nonblocking(&self, port: RawPort, buf: &[u8]) -> BackendResult<usize> {
        self.push_bytes(port, buf)
    }

    fn input_waiting(&self, port: RawPort) -> BackendResult<usize> {
        let st = self.state.lock();
        if st.injected() != Status::Ok {
            return Err(st.injected());
        }
        match st.sessions.get(&port.0) {
            Some(session) => Ok(session.loopback.len()),
            None => Err(Status::InvalidArgument),
        }
    }

    fn output_waiting(&self, port: RawPort) -> BackendResult<usize> {
        let st = self.state.lock();
        if st.injected() != Status::Ok {
            return Err(st.injected());
        }
        if st.sessions.contains_key(&port.0) {
            Ok(0)
        } else {
            Err(Status::InvalidArgument)
        }
    }

    fn flush(&self, port: RawPort, buffers: Buffers) -> Status {
        let mut st = self.state.lock();
        if st.injected() != Status::Ok {
            return st.injected();
        }
        match st.sessions.get_mut(&port.0) {
            Some(session) => {
                if matches!(buffers, Buffers::Input | Buffers::Both) {
                    session.loopback.clear();
                }
                Status::Ok
            }
            None => Status::InvalidArgument,
        }
    }

    fn drain(&self, port: RawPort) -> Status {
        let st = self.state.lock();
        if st.injected() != Status::Ok {
            return st.injected();
        }
        if st.sessions.contains_key(&port.0) {
            Status::Ok
        } else {
            Status::InvalidArgument
        }
    }

    fn last_error_message(&self) -> RawMessage {
        let mut st = self.state.lock();
        let text = st
            .system_error
            .clone()
            .unwrap_or_else(|| "mock system error".to_string());
        let id = st.alloc_id();
        st.messages.insert(id, text);
        RawMessage(id)
    }

    fn message_text(&self, message: RawMessage) -> String {
        self.state
            .lock()
            .messages
            .get(&message.0)
            .cloned()
            .unwrap_or_default()
    }

    fn free_error_message(&self, message: RawMessage) {
        self.state.lock().messages.remove(&message.0);
    }
}

impl MockBackend {
    fn pop_bytes(&self, port: RawPort, buf: &mut [u8]) -> BackendResult<usize> {
        let mut st = self.state.lock();
        if st.injected() != Status::Ok {
            return Err(st.injected());
        }
        match st.sessions.get_mut(&port.0) {
            Some(session) => {
                if session.mode == Mode::Write {
                    return Err(Status::InvalidArgument);
                }
                let mut count = 0;
                while count < buf.len() {
                    match session.loopback.pop_front() {
                        Some(byte) => {
                            buf[count] = byte;
                            count += 1;
                        }
                        None => break,
                    }
                }
                Ok(count)
            }
            None => Err(Status::InvalidArgument),
        }
    }

    fn push_bytes(&self, port: RawPort, buf: &[u8]) -> BackendResult<usize> {
        let mut st = self.state.lock();
        if st.injected() != Status::Ok {
            return Err(st.injected());
        }
        match st.sessions.get_mut(&port.0) {
            Some(session) => {
                if session.mode == Mode::Read {
                    return Err(Status::InvalidArgument);
                }
                session.loopback.extend(buf.iter().copied());
                Ok(buf.len())
            }
            None => Err(Status::InvalidArgument),
        }
    }
}
