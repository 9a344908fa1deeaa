use crate::base::channel::{lock, Channel, DEFAULT_POLL_INTERVAL};
use crate::base::connection::Connection;
use crate::base::error::{Error, Result};
use log::{debug, warn};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// SCIP over a TCP socket, as spoken by Ethernet models.
///
/// The baud rate is recorded for the protocol layer but has no effect on the
/// socket.
#[derive(Debug)]
pub struct TcpConnection {
    channel: Channel<TcpStream>,
    baudrate: AtomicU32,
    last_error: Mutex<String>,
}

impl TcpConnection {
    /// Creates a closed TCP connection.
    pub fn new() -> TcpConnection {
        TcpConnection::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Creates a closed TCP connection polling the socket at `poll_interval`.
    pub fn with_poll_interval(poll_interval: Duration) -> TcpConnection {
        TcpConnection {
            channel: Channel::new(poll_interval),
            baudrate: AtomicU32::new(0),
            last_error: Mutex::new(String::from("no error.")),
        }
    }

    /// Wraps a socket that is already connected, e.g. one returned by
    /// [`TcpListener::accept`].
    pub fn from_stream(stream: TcpStream, poll_interval: Duration) -> Result<TcpConnection> {
        let connection = TcpConnection::with_poll_interval(poll_interval);
        connection.attach(stream)?;
        Ok(connection)
    }

    /// Blocks until a peer connects to `listener` and wraps the accepted socket.
    pub fn accept(listener: &TcpListener, poll_interval: Duration) -> Result<TcpConnection> {
        let (stream, peer) = listener.accept()?;
        debug!("Accepted TCP connection from {}", peer);
        TcpConnection::from_stream(stream, poll_interval)
    }

    fn attach(&self, stream: TcpStream) -> Result<()> {
        stream.set_read_timeout(Some(self.channel.poll_interval()))?;
        stream.set_nodelay(true)?;
        self.channel.open(stream)
    }

    fn record_error(&self, error: &Error) {
        *lock(&self.last_error) = error.to_string();
    }
}

impl Default for TcpConnection {
    fn default() -> TcpConnection {
        TcpConnection::new()
    }
}

impl Connection for TcpConnection {
    fn connect(&self, device: &str, baudrate: u32) -> Result<()> {
        self.disconnect();
        let result = (|| {
            let address = device.to_socket_addrs()?.next().ok_or_else(|| {
                Error::InvalidArgument(format!("cannot resolve address: {}", device))
            })?;
            debug!("Connecting to {}", address);
            let stream = TcpStream::connect_timeout(&address, TCP_CONNECT_TIMEOUT)?;
            self.attach(stream)
        })();

        match result {
            Ok(()) => {
                self.baudrate.store(baudrate, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                warn!("TCP connect to {} failed: {}", device, e);
                self.record_error(&e);
                Err(e)
            }
        }
    }

    fn disconnect(&self) {
        self.channel.close();
    }

    fn is_connected(&self) -> bool {
        self.channel.is_open()
    }

    fn set_baudrate(&self, baudrate: u32) -> Result<()> {
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
