use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{BackendRef, BackendResult, RawPort};
use crate::config::{ConfigObject, Parity, PortConfig};
use crate::port::Port;
use crate::status::{backend_error, check_status, Error, Result, Status};

/// Access mode for an open device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Read,
    Write,
    ReadWrite,
}

/// Selects which buffered direction(s) [`Connection::flush`] discards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Buffers {
    None,
    Input,
    Output,
    Both,
}

/// An open communication session on one serial device.
///
/// A connection holds its device handle exclusively for its whole lifetime:
/// there is no closed-but-reusable state. Dropping it closes the handle
/// exactly once, on every exit path, including unwinding after a failed
/// I/O call. The [`Port`] it was opened from stays shareable as a
/// discovery result.
pub struct Connection {
    backend: BackendRef,
    port: Port,
    raw: RawPort,
}

impl Connection {
    /// Opens `port` in `mode` and applies the non-sentinel fields of `cfg`.
    ///
    /// On failure nothing is retained: no handle stays open and no
    /// configuration is applied. The error carries the backend's
    /// description of the fault.
    pub fn open(port: Port, mode: Mode, cfg: &PortConfig) -> Result<Self> {
        let (backend, raw) = port.session().ok_or(Error::InvalidArgument)?;

        let status = backend.open(raw, mode);
        if status != Status::Ok {
            return Err(backend_error(&backend, status));
        }
        log::info!("opened {} in mode {:?}", port.name(), mode);

        // From here on, drop closes the handle, so a failed initial
        // configuration cannot leak it.
        let conn = Self { backend, port, raw };
        conn.set_config(cfg)?;
        Ok(conn)
    }

    /// The port this session was opened on. Its metadata accessors remain
    /// usable for the whole session.
    pub fn port(&self) -> &Port {
        &self.port
    }

    /// Reads the device's current settings.
    pub fn get_config(&self) -> Result<PortConfig> {
        let obj = ConfigObject::new(&self.backend)?;
        self.check(self.backend.read_config(self.raw, obj.raw()))?;

        let baud_rate = self.lift(self.backend.config_baud_rate(obj.raw()))?;
        let bits = self.lift(self.backend.config_bits(obj.raw()))?;
        let parity = self.lift(self.backend.config_parity(obj.raw()))?;
        let stop_bits = self.lift(self.backend.config_stop_bits(obj.raw()))?;

        Ok(PortConfig {
            baud_rate,
            bits,
            stop_bits,
            parity,
        })
    }

    /// Applies the non-sentinel fields of `cfg` to the device. Fields at
    /// their sentinel never overwrite the corresponding device setting.
    pub fn set_config(&self, cfg: &PortConfig) -> Result<()> {
        let obj = ConfigObject::new(&self.backend)?;

        if cfg.baud_rate >= 0 {
            self.check(self.backend.set_config_baud_rate(obj.raw(), cfg.baud_rate))?;
        }
        if cfg.bits >= 0 {
            self.check(self.backend.set_config_bits(obj.raw(), cfg.bits))?;
        }
        if cfg.stop_bits >= 0 {
            self.check(self.backend.set_config_stop_bits(obj.raw(), cfg.stop_bits))?;
        }
        if cfg.parity != Parity::Invalid {
            self.check(self.backend.set_config_parity(obj.raw(), cfg.parity))?;
        }

        self.check(self.backend.apply_config(self.raw, obj.raw()))
    }

    /// Blocks until `buf` is full or the timeout has elapsed. Returns the
    /// number of bytes read, which is less than `buf.len()` on timeout.
    pub fn read_blocking(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        Self::validate(buf.len())?;
        self.lift(self.backend.read_blocking(self.raw, buf, timeout))
    }

    /// Blocks until any amount of data arrives (up to `buf.len()` bytes) or
    /// the timeout has elapsed.
    pub fn read_next_blocking(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        Self::validate(buf.len())?;
        self.lift(self.backend.read_next_blocking(self.raw, buf, timeout))
    }

    /// Reads whatever is already buffered, without blocking. May return 0.
    pub fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<usize> {
        Self::validate(buf.len())?;
        self.lift(self.backend.read_nonblocking(self.raw, buf))
    }

    /// Blocks until all of `buf` has been accepted or the timeout has
    /// elapsed. Returns the number of bytes written.
    pub fn write_blocking(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        Self::validate(buf.len())?;
        self.lift(self.backend.write_blocking(self.raw, buf, timeout))
    }

    /// Writes as much of `buf` as fits without blocking. May return 0.
    pub fn write_nonblocking(&mut self, buf: &[u8]) -> Result<usize> {
        Self::validate(buf.len())?;
        self.lift(self.backend.write_nonblocking(self.raw, buf))
    }

    /// Number of bytes waiting in the input buffer.
    pub fn input_waiting(&self) -> Result<usize> {
        self.lift(self.backend.input_waiting(self.raw))
    }

    /// Number of bytes waiting in the output buffer.
    pub fn output_waiting(&self) -> Result<usize> {
        self.lift(self.backend.output_waiting(self.raw))
    }

    /// Discards buffered data in the selected direction(s).
    pub fn flush(&mut self, buffers: Buffers) -> Result<()> {
        self.check(self.backend.flush(self.raw, buffers))
    }

    /// Blocks until all submitted output has been transmitted.
    pub fn drain(&mut self) -> Result<()> {
        self.check(self.backend.drain(self.raw))
    }

    // Rejected locally, before the backend is contacted.
    fn validate(count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    fn check(&self, status: Status) -> Result<()> {
        check_status(&self.backend, status)
    }

    fn lift<T>(&self, result: BackendResult<T>) -> Result<T> {
        result.map_err(|status| backend_error(&self.backend, status))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let status = self.backend.close(self.raw);
        if status != Status::Ok {
            log::warn!("closing {} reported {:?}", self.port.name(), status);
        } else {
            log::info!("closed {}", self.port.name());
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("port", &self.port)
            .finish()
    }
}
