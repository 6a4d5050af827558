use crate::{BusInfo, CanConfig, CanEvent, CanMessage, CanMode, EventArg, Result, TransportError};

/// Which optional driver operations are implemented.
///
/// The manager and the autobaud prober consult these flags before calling into a
/// driver, so a missing capability fails fast without touching the hardware.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities {
    pub init: bool,
    pub send: bool,
    pub receive: bool,
    pub set_filter: bool,
    pub set_mode: bool,
    pub error_state: bool,
    pub autobaud: bool,
    pub interrupts: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        init: false,
        send: false,
        receive: false,
        set_filter: false,
        set_mode: false,
        error_state: false,
        autobaud: false,
        interrupts: false,
    };

    pub const ALL: Capabilities = Capabilities {
        init: true,
        send: true,
        receive: true,
        set_filter: true,
        set_mode: true,
        error_state: true,
        autobaud: true,
        interrupts: true,
    };

    /// Everything except interrupt support.
    pub const POLLED: Capabilities = Capabilities {
        interrupts: false,
        ..Capabilities::ALL
    };
}

/// A CAN controller binding.
///
/// Only `info` and `capabilities` are mandatory. Every operation has a default that
/// reports [`TransportError::Unsupported`]; a driver overrides the ones it advertises.
pub trait CanDriver: Send {
    /// Name and kind of the bound controller.
    fn info(&self) -> BusInfo;

    fn capabilities(&self) -> Capabilities;

    /// Program bitrate, filter and mode. On success the controller can receive.
    fn init(&mut self, _config: Option<&CanConfig>) -> Result<()> {
        Err(TransportError::Unsupported("init"))
    }

    /// Submit one frame. Success means submitted, not delivered on the bus.
    fn send(&mut self, _msg: &CanMessage, _timeout_ms: u32) -> Result<()> {
        Err(TransportError::Unsupported("send"))
    }

    /// Non-blocking poll. `Ok(None)` when no frame is waiting.
    fn receive(&mut self) -> Result<Option<CanMessage>> {
        Err(TransportError::Unsupported("receive"))
    }

    fn set_filter(&mut self, _id: u32, _mask: u32) -> Result<()> {
        Err(TransportError::Unsupported("set_filter"))
    }

    fn set_mode(&mut self, _mode: CanMode) -> Result<()> {
        Err(TransportError::Unsupported("set_mode"))
    }

    /// Snapshot of controller error flags. Bit layout is driver-defined.
    fn error_state(&mut self) -> Result<u32> {
        Err(TransportError::Unsupported("error_state"))
    }

    /// Find the active bus bitrate among `rates`, earliest candidate first.
    fn auto_baud_detect(&mut self, _rates: &[u32]) -> Result<u32> {
        Err(TransportError::Unsupported("auto_baud_detect"))
    }

    fn enable_interrupts(&mut self) -> Result<()> {
        Err(TransportError::Unsupported("enable_interrupts"))
    }

    fn disable_interrupts(&mut self) -> Result<()> {
        Err(TransportError::Unsupported("disable_interrupts"))
    }

    /// Service pending controller interrupts, reporting each through `notify`.
    fn irq_handler(&mut self, _notify: &mut dyn FnMut(CanEvent, EventArg)) -> Result<()> {
        Err(TransportError::Unsupported("irq_handler"))
    }
}
