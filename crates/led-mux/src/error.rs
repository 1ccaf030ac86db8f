//! Error types for transports, the multiplexer and the manager

use thiserror::Error;

/// Errors raised by a serial transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The port could not be opened
    #[error("unable to open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    /// The transport was closed explicitly
    #[error("transport {0} is closed")]
    Closed(String),
}

/// Errors raised by the protocol multiplexer
#[derive(Debug, Error)]
pub enum MuxError {
    /// No transport registered under this name
    #[error("transport '{0}' is not registered")]
    NotRegistered(String),

    /// Command could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] led_protocol::ProtocolError),

    /// Transport refused the line
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// The domain error surfaced by manager operations
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Group id not in the registry
    #[error("unknown group {0}")]
    UnknownGroup(String),

    /// Output id not in the registry
    #[error("unknown output {0}")]
    UnknownOutput(String),

    /// Controller id not in the registry
    #[error("unknown controller {0}")]
    UnknownController(String),

    /// SSR entry id not in the registry
    #[error("unknown SSR entry {0}")]
    UnknownSsrEntry(String),

    /// Group resolves to nothing addressable
    #[error("no LEDs assigned to group {0}")]
    NoLedsAssigned(String),

    /// Output has no usable driver/channel addressing
    #[error("output {0} is missing controller/driver/channel mapping")]
    MissingMapping(String),

    /// Caller-supplied value out of range or malformed
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// PWM target payload was empty
    #[error("PWM targets payload is empty")]
    EmptyTargets,

    /// None of the supplied PWM targets matched a group member
    #[error("no matching LEDs for supplied PWM targets")]
    NoMatchingTargets,

    /// Controller has no registered transport
    #[error("controller {0} not connected")]
    NotConnected(String),

    /// No controller carries the CAN interface flag
    #[error("no controller is configured as the CAN interface")]
    NoCanInterface,

    /// The CAN controller exists but has no transport
    #[error("CAN controller interface is not connected")]
    CanNotConnected,

    /// SSR base address is still 0
    #[error("configure the SSR base address before sending commands")]
    SsrBaseAddressUnset,

    /// Registry mutation or persistence failed
    #[error("registry error: {0}")]
    Registry(#[from] led_registry::RegistryError),

    /// Command could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] led_protocol::ProtocolError),

    /// Line could not be handed to the transport
    #[error("multiplexer error: {0}")]
    Mux(#[from] MuxError),
}
