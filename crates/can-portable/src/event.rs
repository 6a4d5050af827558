use crate::{CanMessage, InstanceId};

/// Event kinds an interface can report. Each kind has one callback slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CanEvent {
    Rx,
    TxComplete,
    Error,
}

impl CanEvent {
    pub const ALL: [CanEvent; 3] = [CanEvent::Rx, CanEvent::TxComplete, CanEvent::Error];

    pub(crate) fn slot(self) -> usize {
        match self {
            CanEvent::Rx => 0,
            CanEvent::TxComplete => 1,
            CanEvent::Error => 2,
        }
    }
}

/// Event-specific payload passed to callbacks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventArg {
    None,
    Message(CanMessage),
    ErrorState(u32),
}

impl EventArg {
    pub fn message(&self) -> Option<&CanMessage> {
        match self {
            EventArg::Message(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Application handler invoked synchronously on dispatch.
pub type EventCallback = Box<dyn FnMut(InstanceId, CanEvent, &EventArg) + Send>;
