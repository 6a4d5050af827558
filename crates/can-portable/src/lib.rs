//! can-portable: a hardware-independent CAN interface layer
//!
//! Application code talks to a [`CanManager`] through small integer handles; each
//! registered interface pairs a [`CanDriver`] (SPI controller, on-chip peripheral,
//! serial adapter, ...) with bounded transmit/receive queues and event callbacks.
//! A periodic [`CanManager::pump`] moves traffic between the queues and the drivers,
//! and [`autobaud::detect`] discovers the bus bitrate in listen-only mode.
//!
//! The default build enables a `mock` driver so binaries and tests run on any host.

mod types;
pub use types::{BusInfo, CanFilter, CanId, CanMessage, Timestamp, MAX_DLC};

mod error;
pub use error::{Result, TransportError};

mod config;
pub use config::{
    CanConfig, CanMode, ManagerConfig, DEFAULT_BITRATE, DEFAULT_BITRATES,
    DEFAULT_MAX_INTERFACES, DEFAULT_RX_DRAIN_LIMIT, DEFAULT_RX_QUEUE_LEN, DEFAULT_TX_QUEUE_LEN,
};

mod event;
pub use event::{CanEvent, EventArg, EventCallback};

mod traits;
pub use traits::{CanDriver, Capabilities};

mod queue;
pub use queue::BoundedQueue;

mod manager;
pub use manager::{CanManager, InstanceId, PumpReport};

mod shared;
pub use shared::{PumpHandle, SharedManager};

pub mod autobaud;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockDriver, MockHandle, MOCK_ERR_TX_IN_SILENT};

#[cfg(feature = "slcan")]
mod slcan;

#[cfg(feature = "slcan")]
pub use slcan::{SlcanBitrate, SlcanDriver};
