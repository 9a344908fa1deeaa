use std::io;
use thiserror::Error;

/// Represents errors that can occur while talking to a URG sensor.
#[derive(Debug, Error)]
pub enum Error {
    /// No byte arrived before the deadline.
    #[error("response timeout")]
    Timeout,

    /// A status or data line failed its checksum. The line is kept for diagnostics.
    #[error("checksum mismatch: {line}")]
    ChecksumMismatch { line: String },

    /// The first line of a response did not repeat the command that was sent.
    #[error("mismatch response: expected {expected:?}, got {actual:?}")]
    EchoMismatch { expected: String, actual: String },

    /// The connection accepted fewer bytes than the command is long.
    #[error("send fail: wrote {sent} of {expected} bytes")]
    SendFailure { expected: usize, sent: usize },

    /// None of the candidate baud rates produced a SCIP response.
    #[error("baudrate is not detected")]
    BaudrateNotDetected,

    /// The `PP` response did not carry exactly eight parameter lines.
    #[error("invalid PP response: {lines} lines")]
    MalformedParameterResponse { lines: usize },

    /// The continuous capture worker gave up after too many bad frames.
    #[error("capture retry budget exhausted after {retries} retries")]
    RetryBudgetExhausted { retries: usize },

    /// The operation needs an open connection.
    #[error("no connection")]
    NotConnected,

    /// The device answered with a status code outside the expected set.
    #[error("{command} returned unexpected status {code}")]
    UnexpectedStatus { command: String, code: i32 },

    /// The sensor speaks SCIP 1.1 and refused to switch to SCIP 2.0.
    #[error("SCIP1.1 protocol is not supported. Please update URG firmware, or reconnect after a few seconds because sensor is booting")]
    LegacyProtocol,

    /// Baud rate outside the set the sensor supports.
    #[error("invalid baudrate: {0}")]
    InvalidBaudrate(u32),

    /// A caller supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The device or the current capture mode doesn't support this operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The decoded data is invalid according to the SCIP protocol.
    #[error("protocol error: {description}")]
    ProtocolError { description: String },

    /// The configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// An I/O error occurred while communicating with the underlying stream.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The serial port could not be opened or reconfigured.
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// A specialized `Result` type for URG operations.
pub type Result<T> = std::result::Result<T, Error>;
