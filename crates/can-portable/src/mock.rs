use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    BusInfo, CanConfig, CanDriver, CanEvent, CanFilter, CanId, CanMessage, CanMode, Capabilities,
    EventArg, Result, TransportError, DEFAULT_BITRATE,
};

/// Error flag raised when a frame is submitted while listen-only.
pub const MOCK_ERR_TX_IN_SILENT: u32 = 1 << 0;

#[derive(Debug)]
struct MockState {
    initialized: bool,
    bitrate: u32,
    mode: CanMode,
    filter: CanFilter,
    rx: VecDeque<CanMessage>,
    sent: Vec<CanMessage>,
    error_flags: u32,
    bus_bitrate: Option<u32>,
    probed: Vec<u32>,
    mode_history: Vec<CanMode>,
    interrupts_enabled: bool,
    pending_irq: VecDeque<(CanEvent, EventArg)>,
    fail_init: bool,
    fail_send: bool,
    fail_set_filter: bool,
    fail_set_mode: Option<CanMode>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            initialized: false,
            bitrate: DEFAULT_BITRATE,
            mode: CanMode::Normal,
            filter: CanFilter::default(),
            rx: VecDeque::new(),
            sent: Vec::new(),
            error_flags: 0,
            bus_bitrate: Some(DEFAULT_BITRATE),
            probed: Vec::new(),
            mode_history: Vec::new(),
            interrupts_enabled: false,
            pending_irq: VecDeque::new(),
            fail_init: false,
            fail_send: false,
            fail_set_filter: false,
            fail_set_mode: None,
        }
    }
}

/// A simple in-process controller. Each driver instance is independent.
///
/// Created together with a [`MockHandle`] that can script traffic and faults and
/// observe what the driver was asked to do after it has been handed to a manager.
pub struct MockDriver {
    name: String,
    caps: Capabilities,
    state: Arc<Mutex<MockState>>,
}

/// Test/demo side of a [`MockDriver`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    // A panicking callback must not wedge the simulated controller.
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockDriver {
    pub fn new(name: &str) -> (Self, MockHandle) {
        Self::with_capabilities(name, Capabilities::ALL)
    }

    /// A mock advertising only `caps`; unadvertised operations behave as missing.
    pub fn with_capabilities(name: &str, caps: Capabilities) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let driver = Self {
            name: name.to_string(),
            caps,
            state: Arc::clone(&state),
        };
        (driver, MockHandle { state })
    }

    pub fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn require(&self, supported: bool, op: &'static str) -> Result<()> {
        if supported {
            Ok(())
        } else {
            Err(TransportError::Unsupported(op))
        }
    }
}

impl CanDriver for MockDriver {
    fn info(&self) -> BusInfo {
        BusInfo {
            name: self.name.clone(),
            driver: "mock".to_string(),
        }
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn init(&mut self, config: Option<&CanConfig>) -> Result<()> {
        self.require(self.caps.init, "init")?;
        let mut st = lock(&self.state);
        if st.fail_init {
            return Err(TransportError::Driver("mock init failure".to_string()));
        }
        let cfg = config.copied().unwrap_or_default();
        st.bitrate = cfg.bitrate;
        st.mode = cfg.mode;
        st.filter = CanFilter::new(cfg.filter_id, cfg.filter_mask);
        st.initialized = true;
        Ok(())
    }

    fn send(&mut self, msg: &CanMessage, _timeout_ms: u32) -> Result<()> {
        self.require(self.caps.send, "send")?;
        let mut st = lock(&self.state);
        if st.mode.is_listen_only() {
            st.error_flags |= MOCK_ERR_TX_IN_SILENT;
            return Err(TransportError::Driver(
                "transmission disabled in listen-only mode".to_string(),
            ));
        }
        if st.fail_send {
            return Err(TransportError::Driver("mock send failure".to_string()));
        }
        st.sent.push(*msg);
        if st.mode == CanMode::Loopback {
            st.rx.push_back(*msg);
        }
        if st.interrupts_enabled {
            st.pending_irq
                .push_back((CanEvent::TxComplete, EventArg::Message(*msg)));
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<CanMessage>> {
        self.require(self.caps.receive, "receive")?;
        let mut st = lock(&self.state);
        while let Some(mut msg) = st.rx.pop_front() {
            if st.filter.accepts(msg.id) {
                msg.stamp();
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }

    fn set_filter(&mut self, id: u32, mask: u32) -> Result<()> {
        self.require(self.caps.set_filter, "set_filter")?;
        let mut st = lock(&self.state);
        if st.fail_set_filter {
            return Err(TransportError::Driver("mock filter failure".to_string()));
        }
        st.filter = CanFilter::new(id, mask);
        Ok(())
    }

    fn set_mode(&mut self, mode: CanMode) -> Result<()> {
        self.require(self.caps.set_mode, "set_mode")?;
        let mut st = lock(&self.state);
        if st.fail_set_mode == Some(mode) {
            return Err(TransportError::Driver(format!("mock cannot enter {mode:?}")));
        }
        st.mode = mode;
        st.mode_history.push(mode);
        Ok(())
    }

    fn error_state(&mut self) -> Result<u32> {
        self.require(self.caps.error_state, "error_state")?;
        Ok(lock(&self.state).error_flags)
    }

    fn auto_baud_detect(&mut self, rates: &[u32]) -> Result<u32> {
        self.require(self.caps.autobaud, "auto_baud_detect")?;
        let mut st = lock(&self.state);
        for &rate in rates {
            if rate == 0 {
                continue;
            }
            // trial configuration, then listen for traffic
            st.probed.push(rate);
            st.bitrate = rate;
            if st.bus_bitrate == Some(rate) {
                return Ok(rate);
            }
        }
        Err(TransportError::BitrateNotDetected)
    }

    fn enable_interrupts(&mut self) -> Result<()> {
        self.require(self.caps.interrupts, "enable_interrupts")?;
        lock(&self.state).interrupts_enabled = true;
        Ok(())
    }

    fn disable_interrupts(&mut self) -> Result<()> {
        self.require(self.caps.interrupts, "disable_interrupts")?;
        lock(&self.state).interrupts_enabled = false;
        Ok(())
    }

    fn irq_handler(&mut self, notify: &mut dyn FnMut(CanEvent, EventArg)) -> Result<()> {
        self.require(self.caps.interrupts, "irq_handler")?;
        let pending: Vec<_> = {
            let mut st = lock(&self.state);
            if !st.interrupts_enabled {
                return Ok(());
            }
            st.pending_irq.drain(..).collect()
        };
        for (event, arg) in pending {
            notify(event, arg);
        }
        Ok(())
    }
}

impl MockHandle {
    /// Put a frame on the simulated bus for the driver to receive.
    pub fn inject(&self, msg: CanMessage) {
        lock(&self.state).rx.push_back(msg);
    }

    /// Convenience for [`MockHandle::inject`] with a raw id.
    pub fn inject_raw(&self, id: u32, data: &[u8]) -> Result<()> {
        let id = CanId::from_raw(id).ok_or(TransportError::InvalidFrame("id range"))?;
        let msg = CanMessage::new(id, data).ok_or(TransportError::InvalidFrame("len"))?;
        self.inject(msg);
        Ok(())
    }

    /// Frames still waiting in the simulated controller.
    pub fn pending_rx(&self) -> usize {
        lock(&self.state).rx.len()
    }

    /// Frames the driver accepted for transmission, oldest first.
    pub fn sent(&self) -> Vec<CanMessage> {
        lock(&self.state).sent.clone()
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.state).initialized
    }

    pub fn mode(&self) -> CanMode {
        lock(&self.state).mode
    }

    /// Modes set through `set_mode`, in call order.
    pub fn mode_history(&self) -> Vec<CanMode> {
        lock(&self.state).mode_history.clone()
    }

    pub fn bitrate(&self) -> u32 {
        lock(&self.state).bitrate
    }

    pub fn filter(&self) -> CanFilter {
        lock(&self.state).filter
    }

    /// Candidates tried by the last autobaud searches, in order.
    pub fn probed(&self) -> Vec<u32> {
        lock(&self.state).probed.clone()
    }

    pub fn interrupts_enabled(&self) -> bool {
        lock(&self.state).interrupts_enabled
    }

    /// Bitrate other nodes are talking at; `None` for a silent bus.
    pub fn set_bus_bitrate(&self, bitrate: Option<u32>) {
        lock(&self.state).bus_bitrate = bitrate;
    }

    pub fn set_error_flags(&self, flags: u32) {
        lock(&self.state).error_flags = flags;
    }

    /// Queue an interrupt-originated event for the next `irq_handler` call.
    pub fn raise(&self, event: CanEvent, arg: EventArg) {
        lock(&self.state).pending_irq.push_back((event, arg));
    }

    pub fn fail_init(&self, fail: bool) {
        lock(&self.state).fail_init = fail;
    }

    pub fn fail_send(&self, fail: bool) {
        lock(&self.state).fail_send = fail;
    }

    pub fn fail_set_filter(&self, fail: bool) {
        lock(&self.state).fail_set_filter = fail;
    }

    /// Make `set_mode` reject one particular mode.
    pub fn fail_set_mode(&self, mode: Option<CanMode>) {
        lock(&self.state).fail_set_mode = mode;
    }
}
