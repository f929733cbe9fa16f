//! Backend implementation over the `serialport` crate.
//!
//! Handles are entries in an internal table, so the core's ownership layer
//! sees the same allocate/free pairing it would get from a C backend.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serialport::{ClearBuffer, DataBits, SerialPort, SerialPortInfo, SerialPortType, StopBits};

use crate::backend::{BackendResult, RawConfig, RawMessage, RawPort, RawPortList, SerialBackend};
use crate::config::Parity;
use crate::connection::{Buffers, Mode};
use crate::port::Transport;
use crate::status::Status;

const OPEN_BAUD_RATE: u32 = 9600;

#[derive(Debug, Clone, Copy, Default)]
struct StoredConfig {
    baud_rate: Option<i32>,
    bits: Option<i32>,
    stop_bits: Option<i32>,
    parity: Option<Parity>,
}

struct Session {
    port: Box<dyn SerialPort>,
    mode: Mode,
}

#[derive(Default)]
struct NativeState {
    next_id: u64,
    ports: HashMap<u64, SerialPortInfo>,
    lists: HashMap<u64, Vec<RawPort>>,
    configs: HashMap<u64, StoredConfig>,
    messages: HashMap<u64, String>,
    sessions: HashMap<u64, Session>,
    last_error: String,
}

impl NativeState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn alloc_port(&mut self, info: SerialPortInfo) -> RawPort {
        let id = self.alloc_id();
        self.ports.insert(id, info);
        RawPort(id)
    }
}

fn record(last_error: &mut String, err: &serialport::Error) -> Status {
    *last_error = err.to_string();
    match err.kind() {
        serialport::ErrorKind::InvalidInput => Status::InvalidArgument,
        _ => Status::SystemError,
    }
}

fn record_io(last_error: &mut String, err: &io::Error) -> Status {
    *last_error = err.to_string();
    match err.kind() {
        io::ErrorKind::InvalidInput => Status::InvalidArgument,
        io::ErrorKind::Unsupported => Status::NotSupported,
        _ => Status::SystemError,
    }
}

/// Production backend talking to real devices through `serialport`.
#[derive(Default)]
pub struct NativeBackend {
    state: Mutex<NativeState>,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SerialBackend for NativeBackend {
    fn port_by_name(&self, name: &str) -> BackendResult<RawPort> {
        let mut st = self.state.lock();
        let infos = match serialport::available_ports() {
            Ok(infos) => infos,
            Err(err) => return Err(record(&mut st.last_error, &err)),
        };
        match infos.into_iter().find(|info| info.port_name == name) {
            Some(info) => Ok(st.alloc_port(info)),
            None => Err(Status::InvalidArgument),
        }
    }

    fn list_ports(&self) -> (Status, Option<RawPortList>) {
        let mut st = self.state.lock();
        let infos = match serialport::available_ports() {
            Ok(infos) => infos,
            Err(err) => return (record(&mut st.last_error, &err), None),
        };
        let entries: Vec<RawPort> = infos.into_iter().map(|info| st.alloc_port(info)).collect();
        let id = st.alloc_id();
        st.lists.insert(id, entries);
        (Status::Ok, Some(RawPortList(id)))
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
        st.ports.get(&port.0).map(|info| info.port_name.clone())
    }

    fn port_description(&self, port: RawPort) -> Option<String> {
        let st = self.state.lock();
        match &st.ports.get(&port.0)?.port_type {
            SerialPortType::UsbPort(usb) => usb.product.clone(),
            _ => None,
        }
    }

    fn port_transport(&self, port: RawPort) -> Transport {
        let st = self.state.lock();
        match st.ports.get(&port.0).map(|info| &info.port_type) {
            Some(SerialPortType::UsbPort(_)) => Transport::Usb,
            Some(SerialPortType::BluetoothPort) => Transport::Bluetooth,
            _ => Transport::Native,
        }
    }

    fn usb_bus_address(&self, _port: RawPort) -> BackendResult<(i32, i32)> {
        // Not exposed by the serialport crate on any platform.
        Err(Status::NotSupported)
    }

    fn usb_vid_pid(&self, port: RawPort) -> BackendResult<(i32, i32)> {
        let st = self.state.lock();
        match st.ports.get(&port.0).map(|info| &info.port_type) {
            Some(SerialPortType::UsbPort(usb)) => Ok((i32::from(usb.vid), i32::from(usb.pid))),
            _ => Err(Status::InvalidArgument),
        }
    }

    fn usb_manufacturer(&self, port: RawPort) -> Option<String> {
        let st = self.state.lock();
        match &st.ports.get(&port.0)?.port_type {
            SerialPortType::UsbPort(usb) => usb.manufacturer.clone(),
            _ => None,
        }
    }

    fn usb_product(&self, port: RawPort) -> Option<String> {
        let st = self.state.lock();
        match &st.ports.get(&port.0)?.port_type {
            SerialPortType::UsbPort(usb) => usb.product.clone(),
            _ => None,
        }
    }

    fn usb_serial_number(&self, port: RawPort) -> Option<String> {
        let st = self.state.lock();
        match &st.ports.get(&port.0)?.port_type {
            SerialPortType::UsbPort(usb) => usb.serial_number.clone(),
            _ => None,
        }
    }

    fn bluetooth_address(&self, _port: RawPort) -> Option<String> {
        // Not exposed by the serialport crate.
        None
    }

    fn open(&self, port: RawPort, mode: Mode) -> Status {
        let mut st = self.state.lock();
        if st.sessions.contains_key(&port.0) {
            return Status::InvalidArgument;
        }
        let name = match st.ports.get(&port.0) {
            Some(info) => info.port_name.clone(),
            None => return Status::InvalidArgument,
        };
        match serialport::new(&name, OPEN_BAUD_RATE)
            .timeout(Duration::from_millis(100))
            .open()
        {
            Ok(opened) => {
                st.sessions.insert(port.0, Session { port: opened, mode });
                Status::Ok
            }
            Err(err) => record(&mut st.last_error, &err),
        }
    }

    fn close(&self, port: RawPort) -> Status {
        // Dropping the boxed port closes the OS handle.
        match self.state.lock().sessions.remove(&port.0) {
            Some(_) => Status::Ok,
            None => Status::InvalidArgument,
        }
    }

    fn new_config(&self) -> BackendResult<RawConfig> {
        let mut st = self.state.lock();
        let id = st.alloc_id();
        st.configs.insert(id, StoredConfig::default());
        Ok(RawConfig(id))
    }

    fn free_config(&self, config: RawConfig) {
        self.state.lock().configs.remove(&config.0);
    }

    fn read_config(&self, port: RawPort, config: RawConfig) -> Status {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let session = match st.sessions.get(&port.0) {
            Some(session) => session,
            None => return Status::InvalidArgument,
        };

        let baud_rate = session.port.baud_rate();
        let bits = session.port.data_bits();
        let stop_bits = session.port.stop_bits();
        let parity = session.port.parity();
        let (baud_rate, bits, stop_bits, parity) =
            match (baud_rate, bits, stop_bits, parity) {
                (Ok(baud_rate), Ok(bits), Ok(stop_bits), Ok(parity)) => {
                    (baud_rate, bits, stop_bits, parity)
                }
                (Err(err), ..) => return record(&mut st.last_error, &err),
                (_, Err(err), ..) => return record(&mut st.last_error, &err),
                (_, _, Err(err), _) => return record(&mut st.last_error, &err),
                (_, _, _, Err(err)) => return record(&mut st.last_error, &err),
            };

        match st.configs.get_mut(&config.0) {
            Some(stored) => {
                stored.baud_rate = Some(baud_rate as i32);
                stored.bits = Some(match bits {
                    DataBits::Five => 5,
                    DataBits::Six => 6,
                    DataBits::Seven => 7,
                    DataBits::Eight => 8,
                });
                stored.stop_bits = Some(match stop_bits {
                    StopBits::One => 1,
                    StopBits::Two => 2,
                });
                stored.parity = Some(match parity {
                    serialport::Parity::None => Parity::None,
                    serialport::Parity::Odd => Parity::Odd,
                    serialport::Parity::Even => Parity::Even,
                });
                Status::Ok
            }
            None => Status::InvalidArgument,
        }
    }

    fn apply_config(&self, port: RawPort, config: RawConfig) -> Status {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let stored = match st.configs.get(&config.0) {
            Some(stored) => *stored,
            None => return Status::InvalidArgument,
        };
        let session = match st.sessions.get_mut(&port.0) {
            Some(session) => session,
            None => return Status::InvalidArgument,
        };

        if let Some(baud_rate) = stored.baud_rate {
            if baud_rate < 0 {
                return Status::InvalidArgument;
            }
            if let Err(err) = session.port.set_baud_rate(baud_rate as u32) {
                return record(&mut st.last_error, &err);
            }
        }
        if let Some(bits) = stored.bits {
            let bits = match bits {
                5 => DataBits::Five,
                6 => DataBits::Six,
                7 => DataBits::Seven,
                8 => DataBits::Eight,
                _ => return Status::InvalidArgument,
            };
            if let Err(err) = session.port.set_data_bits(bits) {
                return record(&mut st.last_error, &err);
            }
        }
        if let Some(stop_bits) = stored.stop_bits {
            let stop_bits = match stop_bits {
                1 => StopBits::One,
                2 => StopBits::Two,
                _ => return Status::InvalidArgument,
            };
            if let Err(err) = session.port.set_stop_bits(stop_bits) {
                return record(&mut st.last_error, &err);
            }
        }
        if let Some(parity) = stored.parity {
            let parity = match parity {
                Parity::None => serialport::Parity::None,
                Parity::Odd => serialport::Parity::Odd,
                Parity::Even => serialport::Parity::Even,
                // No mark/space support in the serialport crate.
                Parity::Mark | Parity::Space => return Status::NotSupported,
                Parity::Invalid => return Status::InvalidArgument,
            };
            if let Err(err) = session.port.set_parity(parity) {
                return record(&mut st.last_error, &err);
            }
        }
        Status::Ok
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

    fn read_blocking(
        &self,
        port: RawPort,
        buf: &mut [u8],
        timeout: Duration,
    ) -> BackendResult<usize> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let session = st.sessions.get_mut(&port.0).ok_or(Status::InvalidArgument)?;
        if session.mode == Mode::Write {
            return Err(Status::InvalidArgument);
        }

        let deadline = Instant::now() + timeout;
        let mut total = 0;
        while total < buf.len() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if let Err(err) = session.port.set_timeout(deadline - now) {
                return Err(record(&mut st.last_error, &err));
            }
            match session.port.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(record_io(&mut st.last_error, &err)),
            }
        }
        Ok(total)
    }

    fn read_next_blocking(
        &self,
        port: RawPort,
        buf: &mut [u8],
        timeout: Duration,
    ) -> BackendResult<usize> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let session = st.sessions.get_mut(&port.0).ok_or(Status::InvalidArgument)?;
        if session.mode == Mode::Write {
            return Err(Status::InvalidArgument);
        }

        if let Err(err) = session.port.set_timeout(timeout) {
            return Err(record(&mut st.last_error, &err));
        }
        match session.port.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(record_io(&mut st.last_error, &err)),
        }
    }

    fn read_nonblocking(&self, port: RawPort, buf: &mut [u8]) -> BackendResult<usize> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let session = st.sessions.get_mut(&port.0).ok_or(Status::InvalidArgument)?;
        if session.mode == Mode::Write {
            return Err(Status::InvalidArgument);
        }

        let available = match session.port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(err) => return Err(record(&mut st.last_error, &err)),
        };
        if available == 0 {
            return Ok(0);
        }
        let want = available.min(buf.len());
        if let Err(err) = session.port.set_timeout(Duration::from_millis(1)) {
            return Err(record(&mut st.last_error, &err));
        }
        match session.port.read(&mut buf[..want]) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(record_io(&mut st.last_error, &err)),
        }
    }

    fn write_blocking(
        &self,
        port: RawPort,
        buf: &[u8],
        timeout: Duration,
    ) -> BackendResult<usize> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let session = st.sessions.get_mut(&port.0).ok_or(Status::InvalidArgument)?;
        if session.mode == Mode::Read {
            return Err(Status::InvalidArgument);
        }

        let deadline = Instant::now() + timeout;
        let mut total = 0;
        while total < buf.len() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if let Err(err) = session.port.set_timeout(deadline - now) {
                return Err(record(&mut st.last_error, &err));
            }
            match session.port.write(&buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(record_io(&mut st.last_error, &err)),
            }
        }
        Ok(total)
    }

    fn write_nonblocking(&self, port: RawPort, buf: &[u8]) -> BackendResult<usize> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let session = st.sessions.get_mut(&port.0).ok_or(Status::InvalidArgument)?;
        if session.mode == Mode::Read {
            return Err(Status::InvalidArgument);
        }

        if let Err(err) = session.port.set_timeout(Duration::from_millis(1)) {
            return Err(record(&mut st.last_error, &err));
        }
        match session.port.write(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(record_io(&mut st.last_error, &err)),
        }
    }

    fn input_waiting(&self, port: RawPort) -> BackendResult<usize> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let session = st.sessions.get(&port.0).ok_or(Status::InvalidArgument)?;
        match session.port.bytes_to_read() {
            Ok(n) => Ok(n as usize),
            Err(err) => Err(record(&mut st.last_error, &err)),
        }
    }

    fn output_waiting(&self, port: RawPort) -> BackendResult<usize> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let session = st.sessions.get(&port.0).ok_or(Status::InvalidArgument)?;
        match session.port.bytes_to_write() {
            Ok(n) => Ok(n as usize),
            Err(err) => Err(record(&mut st.last_error, &err)),
        }
    }

    fn flush(&self, port: RawPort, buffers: Buffers) -> Status {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let session = match st.sessions.get(&port.0) {
            Some(session) => session,
            None => return Status::InvalidArgument,
        };
        let selection = match buffers {
            Buffers::None => return Status::Ok,
            Buffers::Input => ClearBuffer::Input,
            Buffers::Output => ClearBuffer::Output,
            Buffers::Both => ClearBuffer::All,
        };
        match session.port.clear(selection) {
            Ok(()) => Status::Ok,
            Err(err) => record(&mut st.last_error, &err),
        }
    }

    fn drain(&self, port: RawPort) -> Status {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let session = match st.sessions.get_mut(&port.0) {
            Some(session) => session,
            None => return Status::InvalidArgument,
        };
        match session.port.flush() {
            Ok(()) => Status::Ok,
            Err(err) => record_io(&mut st.last_error, &err),
        }
    }

    fn last_error_message(&self) -> RawMessage {
        let mut st = self.state.lock();
        let text = if st.last_error.is_empty() {
            "unknown system error".to_string()
        } else {
            st.last_error.clone()
        };
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
