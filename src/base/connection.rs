use crate::base::error::Result;
use std::time::Duration;

/// Duplex byte transport the SCIP engine talks through.
///
/// Every method takes `&self`: a connection is shared between the caller
/// thread and the continuous capture worker, so implementations guard their
/// read side and write side with separate locks. A `send` from the caller must
/// never wait for a `receive` that is blocked in the worker.
pub trait Connection: Send + Sync {
    /// Opens the device. `device` is a port name for serial links and a
    /// `host:port` address for TCP.
    fn connect(&self, device: &str, baudrate: u32) -> Result<()>;

    /// Closes the device. Closing an already closed connection is a no-op.
    fn disconnect(&self);

    /// Returns `true` while the device is open.
    fn is_connected(&self) -> bool;

    /// Changes the host side baud rate.
    fn set_baudrate(&self, baudrate: u32) -> Result<()>;

    /// Returns the current host side baud rate.
    fn baudrate(&self) -> u32;

    /// Writes `data`, returning the number of bytes accepted.
    fn send(&self, data: &[u8]) -> Result<usize>;

    /// Reads up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns fewer bytes than requested when the deadline passes and `0`
    /// when nothing arrived at all.
    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Pushes buffered output to the device.
    fn flush(&self) -> Result<()>;

    /// Discards everything received but not yet read.
    fn clear(&self);

    /// Returns one byte to the front of the receive buffer.
    fn unget(&self, byte: u8);

    /// Describes the last failure of this connection.
    fn what(&self) -> String {
        String::from("no error.")
    }
}
