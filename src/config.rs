use serde::{Deserialize, Serialize};

use crate::backend::{BackendRef, RawConfig};
use crate::status::{backend_error, Result};

/// Parity setting. `Invalid` is the leave-alone sentinel: a field carrying
/// it is never sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Parity {
    #[default]
    Invalid,
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Port settings for [`crate::Connection`].
///
/// Fields left at their sentinel (`-1`, or [`Parity::Invalid`]) keep the
/// device's current value, so a caller can change any subset of settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub baud_rate: i32,
    pub bits: i32,
    pub stop_bits: i32,
    pub parity: Parity,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            baud_rate: -1,
            bits: -1,
            stop_bits: -1,
            parity: Parity::Invalid,
        }
    }
}

/// Owns one transient backend configuration object for the duration of a
/// single get/set call; the backend allocation is released on drop, on
/// every exit path.
pub(crate) struct ConfigObject {
    backend: BackendRef,
    raw: RawConfig,
}

impl ConfigObject {
    pub(crate) fn new(backend: &BackendRef) -> Result<Self> {
        match backend.new_config() {
            Ok(raw) => Ok(Self {
                backend: backend.clone(),
                raw,
            }),
            Err(status) => Err(backend_error(backend, status)),
        }
    }

    pub(crate) fn raw(&self) -> RawConfig {
        self.raw
    }
}

impl Drop for ConfigObject {
    fn drop(&mut self) {
        self.backend.free_config(self.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_all_sentinels() {
        let cfg = PortConfig::default();
        assert_eq!(cfg.baud_rate, -1);
        assert_eq!(cfg.bits, -1);
        assert_eq!(cfg.stop_bits, -1);
        assert_eq!(cfg.parity, Parity::Invalid);
    }

    #[test]
    fn parity_defaults_to_the_sentinel() {
        assert_eq!(Parity::default(), Parity::Invalid);
    }
}
