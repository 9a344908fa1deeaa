use crate::base::channel::{lock, Channel, SplitStream, DEFAULT_POLL_INTERVAL};
use crate::base::connection::Connection;
use crate::base::error::{Error, Result};
use log::{debug, warn};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

impl SplitStream for Box<dyn SerialPort> {
    fn try_split(&self) -> io::Result<Self> {
        self.try_clone().map_err(io::Error::from)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// SCIP over a serial (or USB CDC) port.
#[derive(Debug)]
pub struct SerialConnection {
    channel: Channel<Box<dyn SerialPort>>,
    baudrate: AtomicU32,
    last_error: Mutex<String>,
}

impl SerialConnection {
    /// Creates a closed serial connection.
    pub fn new() -> SerialConnection {
        SerialConnection::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Creates a closed serial connection whose port read timeout is `poll_interval`.
    pub fn with_poll_interval(poll_interval: Duration) -> SerialConnection {
        SerialConnection {
            channel: Channel::new(poll_interval),
            baudrate: AtomicU32::new(0),
            last_error: Mutex::new(String::from("no error.")),
        }
    }

    fn record_error(&self, error: &Error) {
        *lock(&self.last_error) = error.to_string();
    }
}

impl Default for SerialConnection {
    fn default() -> SerialConnection {
        SerialConnection::new()
    }
}

impl Connection for SerialConnection {
    fn connect(&self, device: &str, baudrate: u32) -> Result<()> {
        self.disconnect();
        let opened = serialport::new(device, baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.channel.poll_interval())
            .open();

        let port = match opened {
            Ok(port) => port,
            Err(e) => {
                let e = Error::from(e);
                warn!("Failed to open serial port {}: {}", device, e);
                self.record_error(&e);
                return Err(e);
            }
        };
        debug!("Opened serial port: {} at {} baud", device, baudrate);
        self.channel.open(port)?;
        self.baudrate.store(baudrate, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        if self.channel.is_open() {
            debug!("Closing serial port");
        }
        self.channel.close();
    }

    fn is_connected(&self) -> bool {
        self.channel.is_open()
    }

    fn set_baudrate(&self, baudrate: u32) -> Result<()> {
        self.channel
            .with_writer(|port| Ok(port.set_baud_rate(baudrate)?))
            .inspect_err(|e| self.record_error(e))?;
        self.baudrate.store(baudrate, Ordering::SeqCst);
        Ok(())
    }

    fn baudrate(&self) -> u32 {
        self.baudrate.load(Ordering::SeqCst)
    }

    fn send(&self, data: &[u8]) -> Result<usize> {
        self.channel.send(data).inspect_err(|e| self.record_error(e))
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.channel
            .receive(buf, timeout)
            .inspect_err(|e| self.record_error(e))
    }

    fn flush(&self) -> Result<()> {
        self.channel.flush()
    }

    fn clear(&self) {
        self.channel.clear();
    }

    fn unget(&self, byte: u8) {
        self.channel.unget(byte);
    }

    fn what(&self) -> String {
        lock(&self.last_error).clone()
    }
}
