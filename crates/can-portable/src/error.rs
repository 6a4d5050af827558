use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no interface registered at index {0}")]
    InvalidInstance(usize),
    #[error("interface table full ({0} slots)")]
    TableFull(usize),
    #[error("transmit queue full")]
    QueueFull,
    #[error("operation not supported by this driver: {0}")]
    Unsupported(&'static str),
    #[error("driver error: {0}")]
    Driver(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no traffic detected at any candidate bitrate")]
    BitrateNotDetected,
    #[error("manager lock poisoned")]
    Poisoned,
}
