use serde::{Deserialize, Serialize};

use crate::{Result, TransportError};

pub const DEFAULT_MAX_INTERFACES: usize = 4;
pub const DEFAULT_TX_QUEUE_LEN: usize = 16;
pub const DEFAULT_RX_QUEUE_LEN: usize = 16;
pub const DEFAULT_RX_DRAIN_LIMIT: usize = 256;
pub const DEFAULT_BITRATE: u32 = 500_000;

/// Autobaud candidates, most common first.
pub const DEFAULT_BITRATES: [u32; 4] = [125_000, 250_000, 500_000, 1_000_000];

/// Controller operating mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanMode {
    #[default]
    Normal,
    /// Listen-only: receives but never transmits or acknowledges.
    Silent,
    /// Self-reception without touching the bus.
    Loopback,
    /// Driver-defined probing state.
    Autobaud,
}

impl CanMode {
    /// True when the controller must not drive the bus.
    pub fn is_listen_only(self) -> bool {
        matches!(self, CanMode::Silent | CanMode::Autobaud)
    }
}

/// Settings handed to a driver's `init`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanConfig {
    pub bitrate: u32,
    pub filter_id: u32,
    pub filter_mask: u32,
    pub mode: CanMode,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE,
            filter_id: 0,
            filter_mask: 0,
            mode: CanMode::Normal,
        }
    }
}

/// Sizing of a [`crate::CanManager`], fixed for its lifetime.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Instance table capacity.
    pub max_interfaces: usize,
    /// Transmit ring length per interface (one slot stays empty).
    pub tx_queue_len: usize,
    /// Receive ring length per interface (one slot stays empty).
    pub rx_queue_len: usize,
    /// Upper bound on frames pulled from one driver per pump cycle.
    pub rx_drain_limit: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_interfaces: DEFAULT_MAX_INTERFACES,
            tx_queue_len: DEFAULT_TX_QUEUE_LEN,
            rx_queue_len: DEFAULT_RX_QUEUE_LEN,
            rx_drain_limit: DEFAULT_RX_DRAIN_LIMIT,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_interfaces == 0 {
            return Err(TransportError::Config(
                "max_interfaces must be at least 1".to_string(),
            ));
        }
        if self.tx_queue_len < 2 {
            return Err(TransportError::Config(format!(
                "tx_queue_len {} leaves no usable slot",
                self.tx_queue_len
            )));
        }
        if self.rx_queue_len < 2 {
            return Err(TransportError::Config(format!(
                "rx_queue_len {} leaves no usable slot",
                self.rx_queue_len
            )));
        }
        if self.rx_drain_limit == 0 {
            return Err(TransportError::Config(
                "rx_drain_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
