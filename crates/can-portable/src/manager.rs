//! Interface manager: a fixed-capacity table of CAN interfaces, each pairing one
//! driver with private transmit/receive rings and per-event callback slots.
//!
//! All access goes through an [`InstanceId`] handed out by [`CanManager::register`].
//! Nothing here blocks: enqueue/dequeue only touch the rings, and [`CanManager::pump`]
//! is the single place where queued traffic meets the drivers.

use core::fmt;

use tracing::{debug, info, trace, warn};

use crate::autobaud;
use crate::queue::BoundedQueue;
use crate::{
    BusInfo, CanConfig, CanDriver, CanEvent, CanFilter, CanMessage, CanMode, EventArg,
    EventCallback, ManagerConfig, Result, TransportError,
};

/// Handle of a registered interface. Assigned densely from 0 in registration order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

impl InstanceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for InstanceId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "can{}", self.0)
    }
}

/// What one [`CanManager::pump`] cycle moved.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PumpReport {
    /// Frames handed to drivers.
    pub sent: usize,
    /// Interfaces whose head frame was refused and stays queued.
    pub stalled: usize,
    /// Frames stored in receive queues.
    pub received: usize,
    /// Frames drained while the receive queue was full.
    pub dropped: usize,
}

struct Instance {
    driver: Box<dyn CanDriver>,
    info: BusInfo,
    callbacks: [Option<EventCallback>; 3],
    filter: CanFilter,
    tx: BoundedQueue<CanMessage>,
    rx: BoundedQueue<CanMessage>,
}

impl Instance {
    fn notify(&mut self, id: InstanceId, event: CanEvent, arg: &EventArg) {
        if let Some(cb) = self.callbacks[event.slot()].as_mut() {
            cb(id, event, arg);
        }
    }
}

pub struct CanManager {
    config: ManagerConfig,
    instances: Vec<Instance>,
}

impl CanManager {
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            instances: Vec::with_capacity(config.max_interfaces),
            config,
        })
    }

    /// Drop every registered interface. Previously issued ids become invalid.
    pub fn initialize(&mut self) {
        if !self.instances.is_empty() {
            info!(dropped = self.instances.len(), "resetting CAN interface table");
        }
        self.instances.clear();
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Number of registered interfaces.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instance table capacity.
    pub fn capacity(&self) -> usize {
        self.config.max_interfaces
    }

    /// Bind `driver` to the next free slot.
    ///
    /// The driver is initialised with `config` first; if that fails nothing is
    /// stored. The stored filter is seeded from `config`, or accept-all without one.
    pub fn register(
        &mut self,
        mut driver: Box<dyn CanDriver>,
        config: Option<&CanConfig>,
    ) -> Result<InstanceId> {
        if self.instances.len() >= self.config.max_interfaces {
            warn!(
                capacity = self.config.max_interfaces,
                "CAN interface table full; rejecting registration"
            );
            return Err(TransportError::TableFull(self.config.max_interfaces));
        }
        if !driver.capabilities().init {
            return Err(TransportError::Unsupported("init"));
        }
        driver.init(config)?;

        let id = InstanceId(self.instances.len());
        let info = driver.info();
        let filter = config
            .map(|c| CanFilter::new(c.filter_id, c.filter_mask))
            .unwrap_or_default();
        info!(
            instance = %id,
            name = %info.name,
            driver = %info.driver,
            bitrate = ?config.map(|c| c.bitrate),
            "registered CAN interface"
        );
        self.instances.push(Instance {
            driver,
            info,
            callbacks: [None, None, None],
            filter,
            tx: BoundedQueue::new(self.config.tx_queue_len),
            rx: BoundedQueue::new(self.config.rx_queue_len),
        });
        Ok(id)
    }

    /// Queue `msg` for transmission on the next pump. Never calls the driver.
    pub fn enqueue_send(&mut self, id: InstanceId, msg: &CanMessage) -> Result<()> {
        let inst = self.instance_mut(id)?;
        inst.tx.push(*msg).map_err(|_| TransportError::QueueFull)?;
        trace!(instance = %id, can_id = %msg.id, "queued frame for transmit");
        Ok(())
    }

    /// Oldest received frame, or `None` when the receive queue is empty.
    ///
    /// An empty queue is not an error; `Err` means the instance does not exist.
    pub fn dequeue_receive(&mut self, id: InstanceId) -> Result<Option<CanMessage>> {
        Ok(self.instance_mut(id)?.rx.pop())
    }

    /// Replace the handler for `event` on `id`; `None` clears it.
    /// An unknown `id` is ignored.
    pub fn register_callback(
        &mut self,
        id: InstanceId,
        event: CanEvent,
        callback: Option<EventCallback>,
    ) {
        if let Some(inst) = self.instances.get_mut(id.0) {
            inst.callbacks[event.slot()] = callback;
        }
    }

    /// Reprogram the driver's acceptance filter, then record it.
    /// The stored filter only changes when the driver accepted the new one.
    pub fn set_filter(&mut self, id: InstanceId, filter_id: u32, mask: u32) -> Result<()> {
        let inst = self.instance_mut(id)?;
        if !inst.driver.capabilities().set_filter {
            return Err(TransportError::Unsupported("set_filter"));
        }
        inst.driver.set_filter(filter_id, mask)?;
        inst.filter = CanFilter::new(filter_id, mask);
        debug!(instance = %id, filter_id, mask, "filter updated");
        Ok(())
    }

    /// Filter last accepted by the driver.
    pub fn filter(&self, id: InstanceId) -> Result<CanFilter> {
        Ok(self.instance(id)?.filter)
    }

    pub fn set_mode(&mut self, id: InstanceId, mode: CanMode) -> Result<()> {
        let inst = self.instance_mut(id)?;
        if !inst.driver.capabilities().set_mode {
            return Err(TransportError::Unsupported("set_mode"));
        }
        inst.driver.set_mode(mode)?;
        debug!(instance = %id, ?mode, "mode changed");
        Ok(())
    }

    /// Raw controller error flags, uninterpreted.
    pub fn error_state(&mut self, id: InstanceId) -> Result<u32> {
        let inst = self.instance_mut(id)?;
        if !inst.driver.capabilities().error_state {
            return Err(TransportError::Unsupported("error_state"));
        }
        inst.driver.error_state()
    }

    /// Hand `rates` straight to the driver's probe. Queues are not involved and
    /// no mode bracketing is applied; see [`CanManager::detect_bitrate`] for that.
    pub fn start_autobaud(&mut self, id: InstanceId, rates: &[u32]) -> Result<u32> {
        let inst = self.instance_mut(id)?;
        if !inst.driver.capabilities().autobaud {
            return Err(TransportError::Unsupported("auto_baud_detect"));
        }
        inst.driver.auto_baud_detect(rates)
    }

    /// Listen-only probe of the driver, restoring normal mode afterwards.
    pub fn detect_bitrate(&mut self, id: InstanceId, rates: &[u32]) -> Result<u32> {
        let inst = self.instance_mut(id)?;
        autobaud::detect(inst.driver.as_mut(), rates)
    }

    pub fn enable_interrupts(&mut self, id: InstanceId) -> Result<()> {
        let inst = self.instance_mut(id)?;
        if !inst.driver.capabilities().interrupts {
            return Err(TransportError::Unsupported("enable_interrupts"));
        }
        inst.driver.enable_interrupts()
    }

    pub fn disable_interrupts(&mut self, id: InstanceId) -> Result<()> {
        let inst = self.instance_mut(id)?;
        if !inst.driver.capabilities().interrupts {
            return Err(TransportError::Unsupported("disable_interrupts"));
        }
        inst.driver.disable_interrupts()
    }

    /// Run the driver's interrupt handler and dispatch whatever it reports.
    pub fn handle_interrupt(&mut self, id: InstanceId) -> Result<()> {
        let inst = self.instance_mut(id)?;
        if !inst.driver.capabilities().interrupts {
            return Err(TransportError::Unsupported("irq_handler"));
        }
        let Instance {
            driver, callbacks, ..
        } = inst;
        driver.irq_handler(&mut |event: CanEvent, arg: EventArg| {
            if let Some(cb) = callbacks[event.slot()].as_mut() {
                cb(id, event, &arg);
            }
        })
    }

    /// Invoke the callback registered for (`id`, `event`), if any, before returning.
    /// Unknown ids and empty slots are silently ignored.
    pub fn dispatch_event(&mut self, id: InstanceId, event: CanEvent, arg: &EventArg) {
        if let Some(inst) = self.instances.get_mut(id.0) {
            inst.notify(id, event, arg);
        }
    }

    /// One service cycle over every interface, in registration order.
    ///
    /// Transmit: the head frame is offered to the driver with a zero timeout and
    /// leaves the queue only when the driver takes it; a refused frame blocks the
    /// queue until a later cycle succeeds. Receive: frames are drained until the
    /// driver reports none (or the drain limit is hit); once the receive queue is
    /// full, further frames from that cycle are dropped.
    pub fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();
        let drain_limit = self.config.rx_drain_limit;

        for (index, inst) in self.instances.iter_mut().enumerate() {
            let id = InstanceId(index);
            let caps = inst.driver.capabilities();

            if caps.send {
                if let Some(msg) = inst.tx.front().copied() {
                    match inst.driver.send(&msg, 0) {
                        Ok(()) => {
                            inst.tx.pop();
                            report.sent += 1;
                            trace!(instance = %id, can_id = %msg.id, "frame handed to driver");
                            inst.notify(id, CanEvent::TxComplete, &EventArg::Message(msg));
                        }
                        Err(e) => {
                            report.stalled += 1;
                            trace!(instance = %id, error = %e, "driver refused frame; will retry");
                        }
                    }
                }
            }

            if caps.receive {
                for _ in 0..drain_limit {
                    match inst.driver.receive() {
                        Ok(Some(msg)) => {
                            inst.notify(id, CanEvent::Rx, &EventArg::Message(msg));
                            if inst.rx.push(msg).is_ok() {
                                report.received += 1;
                            } else {
                                report.dropped += 1;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(instance = %id, error = %e, "receive failed; stopping drain");
                            break;
                        }
                    }
                }
            }
        }

        if report != PumpReport::default() {
            debug!(
                sent = report.sent,
                stalled = report.stalled,
                received = report.received,
                dropped = report.dropped,
                "pump cycle"
            );
        }
        report
    }

    pub fn info(&self, id: InstanceId) -> Result<&BusInfo> {
        Ok(&self.instance(id)?.info)
    }

    /// Frames waiting to be handed to the driver.
    pub fn tx_pending(&self, id: InstanceId) -> Result<usize> {
        Ok(self.instance(id)?.tx.len())
    }

    /// Frames waiting to be dequeued.
    pub fn rx_available(&self, id: InstanceId) -> Result<usize> {
        Ok(self.instance(id)?.rx.len())
    }

    fn instance(&self, id: InstanceId) -> Result<&Instance> {
        self.instances
            .get(id.0)
            .ok_or(TransportError::InvalidInstance(id.0))
    }

    fn instance_mut(&mut self, id: InstanceId) -> Result<&mut Instance> {
        self.instances
            .get_mut(id.0)
            .ok_or(TransportError::InvalidInstance(id.0))
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::{CanId, Capabilities, MockDriver, MockHandle, DEFAULT_BITRATES};
    use std::sync::{Arc, Mutex};

    fn msg(id: u16) -> CanMessage {
        CanMessage::new(CanId::standard(id).unwrap(), &[id as u8]).unwrap()
    }

    fn manager(tx: usize, rx: usize) -> CanManager {
        CanManager::new(ManagerConfig {
            tx_queue_len: tx,
            rx_queue_len: rx,
            ..ManagerConfig::default()
        })
        .unwrap()
    }

    fn add_mock(mgr: &mut CanManager, name: &str) -> (InstanceId, MockHandle) {
        let (drv, handle) = MockDriver::new(name);
        let id = mgr.register(Box::new(drv), None).unwrap();
        (id, handle)
    }

    #[test]
    fn test_register_assigns_dense_indices() {
        let mut mgr = manager(16, 16);
        let cfg = CanConfig {
            filter_id: 0x100,
            filter_mask: 0x700,
            ..CanConfig::default()
        };
        let (a, ha) = MockDriver::new("a");
        let (b, _) = MockDriver::new("b");
        let ida = mgr.register(Box::new(a), Some(&cfg)).unwrap();
        let idb = mgr.register(Box::new(b), None).unwrap();
        assert_eq!(ida.index(), 0);
        assert_eq!(idb.index(), 1);
        assert!(ha.is_initialized());
        assert_eq!(mgr.filter(ida).unwrap(), CanFilter::new(0x100, 0x700));
        assert_eq!(mgr.filter(idb).unwrap(), CanFilter::default());
        assert_eq!(mgr.info(idb).unwrap().name, "b");
    }

    #[test]
    fn test_register_beyond_capacity_rejected() {
        let mut mgr = CanManager::new(ManagerConfig {
            max_interfaces: 2,
            ..ManagerConfig::default()
        })
        .unwrap();
        add_mock(&mut mgr, "a");
        add_mock(&mut mgr, "b");
        let (c, hc) = MockDriver::new("c");
        assert!(matches!(
            mgr.register(Box::new(c), None),
            Err(TransportError::TableFull(2))
        ));
        assert_eq!(mgr.len(), 2);
        // driver of a rejected registration is never initialised
        assert!(!hc.is_initialized());
    }

    #[test]
    fn test_failed_init_leaves_no_instance() {
        let mut mgr = manager(16, 16);
        let (drv, handle) = MockDriver::new("bad");
        handle.fail_init(true);
        assert!(mgr.register(Box::new(drv), None).is_err());
        assert!(mgr.is_empty());

        let (no_init, _) = MockDriver::with_capabilities(
            "no-init",
            Capabilities {
                init: false,
                ..Capabilities::ALL
            },
        );
        assert!(matches!(
            mgr.register(Box::new(no_init), None),
            Err(TransportError::Unsupported("init"))
        ));
        // next successful registration still gets index 0
        let (id, _) = add_mock(&mut mgr, "good");
        assert_eq!(id.index(), 0);
    }

    #[test]
    fn test_invalid_instance_rejected() {
        let mut mgr = manager(16, 16);
        let bogus = InstanceId::from(3);
        assert!(matches!(
            mgr.enqueue_send(bogus, &msg(1)),
            Err(TransportError::InvalidInstance(3))
        ));
        assert!(mgr.dequeue_receive(bogus).is_err());
        assert!(mgr.set_filter(bogus, 0, 0).is_err());
        assert!(mgr.start_autobaud(bogus, &DEFAULT_BITRATES).is_err());
        // silent no-ops
        mgr.register_callback(
            bogus,
            CanEvent::Rx,
            Some(Box::new(|_: InstanceId, _: CanEvent, _: &EventArg| {})),
        );
        mgr.dispatch_event(bogus, CanEvent::Rx, &EventArg::None);
    }

    #[test]
    fn test_tx_queue_capacity_and_fifo() {
        let mut mgr = manager(4, 16);
        let (id, handle) = add_mock(&mut mgr, "a");
        for i in 1..=3 {
            mgr.enqueue_send(id, &msg(i)).unwrap();
        }
        assert!(matches!(
            mgr.enqueue_send(id, &msg(4)),
            Err(TransportError::QueueFull)
        ));
        assert_eq!(mgr.tx_pending(id).unwrap(), 3);

        mgr.pump();
        // one slot freed, the rejected frame can now go in
        mgr.enqueue_send(id, &msg(4)).unwrap();
        for _ in 0..3 {
            mgr.pump();
        }
        let ids: Vec<u32> = handle.sent().iter().map(|m| m.id.raw()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(mgr.tx_pending(id).unwrap(), 0);
    }

    #[test]
    fn test_pump_sends_head_only() {
        let mut mgr = manager(3, 16);
        let (id, handle) = add_mock(&mut mgr, "a");
        mgr.enqueue_send(id, &msg(0x100)).unwrap();
        mgr.enqueue_send(id, &msg(0x200)).unwrap();

        let report = mgr.pump();
        assert_eq!(report.sent, 1);
        let sent = handle.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id.raw(), 0x100);
        assert_eq!(mgr.tx_pending(id).unwrap(), 1);

        mgr.pump();
        assert_eq!(handle.sent()[1].id.raw(), 0x200);
    }

    #[test]
    fn test_failed_send_stalls_queue() {
        let mut mgr = manager(16, 16);
        let (id, handle) = add_mock(&mut mgr, "a");
        handle.fail_send(true);
        mgr.enqueue_send(id, &msg(0x1)).unwrap();
        mgr.enqueue_send(id, &msg(0x2)).unwrap();
        for _ in 0..5 {
            assert_eq!(mgr.pump().stalled, 1);
        }
        assert_eq!(mgr.tx_pending(id).unwrap(), 2);
        assert!(handle.sent().is_empty());

        handle.fail_send(false);
        mgr.pump();
        assert_eq!(handle.sent()[0].id.raw(), 0x1);
    }

    #[test]
    fn test_rx_overflow_drops_newest() {
        let mut mgr = manager(16, 4);
        let (id, handle) = add_mock(&mut mgr, "a");
        for i in 1..=5 {
            handle.inject(msg(i));
        }
        let report = mgr.pump();
        assert_eq!(report.received, 3);
        assert_eq!(report.dropped, 2);
        assert_eq!(handle.pending_rx(), 0);

        let mut got = Vec::new();
        while let Some(m) = mgr.dequeue_receive(id).unwrap() {
            got.push(m.id.raw());
        }
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn test_drain_limit_leaves_rest_in_driver() {
        let mut mgr = CanManager::new(ManagerConfig {
            rx_drain_limit: 2,
            ..ManagerConfig::default()
        })
        .unwrap();
        let (id, handle) = add_mock(&mut mgr, "a");
        for i in 1..=5 {
            handle.inject(msg(i));
        }
        mgr.pump();
        assert_eq!(mgr.rx_available(id).unwrap(), 2);
        assert_eq!(handle.pending_rx(), 3);
    }

    #[test]
    fn test_dequeue_copies_out() {
        let mut mgr = manager(16, 16);
        let (id, handle) = add_mock(&mut mgr, "a");
        assert!(mgr.dequeue_receive(id).unwrap().is_none());
        handle.inject(msg(0x42));
        mgr.pump();
        let mut first = mgr.dequeue_receive(id).unwrap().unwrap();
        first.data[0] = 0xFF;
        assert!(mgr.dequeue_receive(id).unwrap().is_none());
        assert_eq!(first.id.raw(), 0x42);
    }

    #[test]
    fn test_set_filter_failure_keeps_stored_filter() {
        let mut mgr = manager(16, 16);
        let cfg = CanConfig {
            filter_id: 0x100,
            filter_mask: 0x700,
            ..CanConfig::default()
        };
        let (drv, handle) = MockDriver::new("a");
        let id = mgr.register(Box::new(drv), Some(&cfg)).unwrap();
        handle.fail_set_filter(true);
        assert!(mgr.set_filter(id, 0x200, 0x7FF).is_err());
        assert_eq!(mgr.filter(id).unwrap(), CanFilter::new(0x100, 0x700));

        handle.fail_set_filter(false);
        mgr.set_filter(id, 0x200, 0x7FF).unwrap();
        assert_eq!(mgr.filter(id).unwrap(), CanFilter::new(0x200, 0x7FF));
        assert_eq!(handle.filter(), CanFilter::new(0x200, 0x7FF));
    }

    #[test]
    fn test_set_filter_requires_capability() {
        let mut mgr = manager(16, 16);
        let (drv, _) = MockDriver::with_capabilities(
            "a",
            Capabilities {
                set_filter: false,
                ..Capabilities::ALL
            },
        );
        let id = mgr.register(Box::new(drv), None).unwrap();
        assert!(matches!(
            mgr.set_filter(id, 1, 1),
            Err(TransportError::Unsupported("set_filter"))
        ));
    }

    #[test]
    fn test_callbacks_replace_and_clear() {
        let mut mgr = manager(16, 16);
        let (id, _) = add_mock(&mut mgr, "a");
        let hits = Arc::new(Mutex::new(Vec::new()));

        let h1 = Arc::clone(&hits);
        mgr.register_callback(
            id,
            CanEvent::Error,
            Some(Box::new(move |_: InstanceId, _: CanEvent, arg: &EventArg| {
                h1.lock().unwrap().push(("first", *arg))
            })),
        );
        let h2 = Arc::clone(&hits);
        mgr.register_callback(
            id,
            CanEvent::Error,
            Some(Box::new(move |_: InstanceId, _: CanEvent, arg: &EventArg| {
                h2.lock().unwrap().push(("second", *arg))
            })),
        );
        mgr.dispatch_event(id, CanEvent::Error, &EventArg::ErrorState(7));
        // other slots are independent and empty
        mgr.dispatch_event(id, CanEvent::Rx, &EventArg::None);

        mgr.register_callback(id, CanEvent::Error, None);
        mgr.dispatch_event(id, CanEvent::Error, &EventArg::ErrorState(8));

        assert_eq!(
            *hits.lock().unwrap(),
            vec![("second", EventArg::ErrorState(7))]
        );
    }

    #[test]
    fn test_pump_dispatches_tx_and_rx_events() {
        let mut mgr = manager(16, 16);
        let (id, handle) = add_mock(&mut mgr, "a");
        mgr.set_mode(id, CanMode::Loopback).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        for ev in CanEvent::ALL {
            let sink = Arc::clone(&events);
            mgr.register_callback(
                id,
                ev,
                Some(Box::new(move |inst: InstanceId, kind: CanEvent, arg: &EventArg| {
                    let can_id = arg.message().map(|m| m.id.raw());
                    sink.lock().unwrap().push((inst, kind, can_id));
                })),
            );
        }
        mgr.enqueue_send(id, &msg(0x321)).unwrap();
        mgr.pump();
        assert_eq!(handle.sent().len(), 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                (id, CanEvent::TxComplete, Some(0x321)),
                (id, CanEvent::Rx, Some(0x321)),
            ]
        );
        assert_eq!(mgr.rx_available(id).unwrap(), 1);
    }

    #[test]
    fn test_instances_are_isolated() {
        let mut mgr = manager(16, 16);
        let (a, ha) = add_mock(&mut mgr, "a");
        let (b, hb) = add_mock(&mut mgr, "b");
        mgr.enqueue_send(b, &msg(0xB)).unwrap();
        ha.inject(msg(0xA));
        mgr.pump();
        assert!(ha.sent().is_empty());
        assert_eq!(hb.sent()[0].id.raw(), 0xB);
        assert!(mgr.dequeue_receive(b).unwrap().is_none());
        assert_eq!(mgr.dequeue_receive(a).unwrap().unwrap().id.raw(), 0xA);
    }

    #[test]
    fn test_initialize_is_idempotent_reset() {
        let mut mgr = manager(16, 16);
        let (id, _) = add_mock(&mut mgr, "a");
        mgr.enqueue_send(id, &msg(1)).unwrap();
        mgr.initialize();
        mgr.initialize();
        assert!(mgr.is_empty());
        assert!(mgr.enqueue_send(id, &msg(1)).is_err());

        let (fresh, _) = add_mock(&mut mgr, "b");
        assert_eq!(fresh.index(), 0);
        assert_eq!(mgr.tx_pending(fresh).unwrap(), 0);
        assert_eq!(mgr.info(fresh).unwrap().name, "b");
    }

    #[test]
    fn test_start_autobaud_delegates_directly() {
        let mut mgr = manager(16, 16);
        let (id, handle) = add_mock(&mut mgr, "a");
        handle.set_bus_bitrate(Some(250_000));
        mgr.enqueue_send(id, &msg(1)).unwrap();
        assert_eq!(mgr.start_autobaud(id, &DEFAULT_BITRATES).unwrap(), 250_000);
        // no mode bracketing, no queue traffic
        assert!(handle.mode_history().is_empty());
        assert!(handle.sent().is_empty());
        assert_eq!(mgr.tx_pending(id).unwrap(), 1);

        let (drv, _) = MockDriver::with_capabilities(
            "b",
            Capabilities {
                autobaud: false,
                ..Capabilities::ALL
            },
        );
        let other = mgr.register(Box::new(drv), None).unwrap();
        assert!(mgr.start_autobaud(other, &DEFAULT_BITRATES).is_err());
    }

    #[test]
    fn test_detect_bitrate_brackets_with_modes() {
        let mut mgr = manager(16, 16);
        let (id, handle) = add_mock(&mut mgr, "a");
        handle.set_bus_bitrate(Some(1_000_000));
        assert_eq!(mgr.detect_bitrate(id, &DEFAULT_BITRATES).unwrap(), 1_000_000);
        assert_eq!(
            handle.mode_history(),
            vec![CanMode::Silent, CanMode::Normal]
        );
    }

    #[test]
    fn test_interrupt_events_reach_callbacks() {
        let mut mgr = manager(16, 16);
        let (id, handle) = add_mock(&mut mgr, "a");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        mgr.register_callback(
            id,
            CanEvent::Error,
            Some(Box::new(move |_: InstanceId, ev: CanEvent, arg: &EventArg| {
                sink.lock().unwrap().push((ev, *arg))
            })),
        );
        mgr.enable_interrupts(id).unwrap();
        assert!(handle.interrupts_enabled());
        handle.set_error_flags(0x20);
        handle.raise(CanEvent::Error, EventArg::ErrorState(0x20));
        mgr.handle_interrupt(id).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(CanEvent::Error, EventArg::ErrorState(0x20))]
        );
        assert_eq!(mgr.error_state(id).unwrap(), 0x20);

        mgr.disable_interrupts(id).unwrap();
        assert!(!handle.interrupts_enabled());
    }

    #[test]
    fn test_polling_only_driver_rejects_interrupts() {
        let mut mgr = manager(16, 16);
        let (drv, _) = MockDriver::with_capabilities("a", Capabilities::POLLED);
        let id = mgr.register(Box::new(drv), None).unwrap();
        assert!(matches!(
            mgr.enable_interrupts(id),
            Err(TransportError::Unsupported(_))
        ));
        assert!(mgr.handle_interrupt(id).is_err());
    }

    #[test]
    fn test_pump_skips_missing_capabilities() {
        let mut mgr = manager(16, 16);
        let (drv, handle) = MockDriver::with_capabilities(
            "a",
            Capabilities {
                send: false,
                receive: false,
                ..Capabilities::ALL
            },
        );
        let id = mgr.register(Box::new(drv), None).unwrap();
        mgr.enqueue_send(id, &msg(1)).unwrap();
        handle.inject(msg(2));
        assert_eq!(mgr.pump(), PumpReport::default());
        assert_eq!(mgr.tx_pending(id).unwrap(), 1);
        assert_eq!(handle.pending_rx(), 1);
    }
}
