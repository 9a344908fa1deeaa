use crate::base::error::{Error, Result};
use crate::base::ring_byte_buffer::{is_timeout, RingByteBuffer};
use log::{error, trace};
use std::io::{self, Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_CHANNEL_READ_BUFFER_SIZE: usize = 1024;

/// Polling granularity used when a stream is opened without an explicit one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A byte stream that can hand out a second handle to the same device.
///
/// The channel reads through one handle and writes through the other so a
/// blocked read never delays a write.
pub trait SplitStream: Read + Write + Send + Sized + 'static {
    /// `true` if a read of zero bytes means the peer closed the stream.
    const ZERO_READ_IS_EOF: bool = false;

    /// Returns another handle to the same underlying device.
    fn try_split(&self) -> io::Result<Self>;

    /// Discards input the operating system has buffered for this stream.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SplitStream for std::net::TcpStream {
    const ZERO_READ_IS_EOF: bool = true;

    fn try_split(&self) -> io::Result<Self> {
        self.try_clone()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct ChannelReader<S> {
    stream: S,
    read_buffer: RingByteBuffer,
}

/// Channel buffers received bytes of a stream and sends bytes to it.
///
/// The stream must be configured with a short read timeout (the poll
/// interval): [`Channel::receive`] loops over stream reads until its own
/// deadline passes.
///
/// # Examples
/// ```ignore
/// let channel = Channel::new(DEFAULT_POLL_INTERVAL);
/// channel.open(tcp_stream)?;
/// channel.send(b"QT\n")?;
/// ```
#[derive(Debug)]
pub struct Channel<S> {
    reader: Mutex<Option<ChannelReader<S>>>,
    writer: Mutex<Option<S>>,
    read_buffer_size: usize,
    poll_interval: Duration,
}

impl<S: SplitStream> Channel<S> {
    /// Creates a closed channel with the default read buffer size.
    pub fn new(poll_interval: Duration) -> Channel<S> {
        Channel::with_read_buffer_size(poll_interval, DEFAULT_CHANNEL_READ_BUFFER_SIZE)
    }

    /// Creates a closed channel with non-default ring buffer capacity.
    pub fn with_read_buffer_size(poll_interval: Duration, read_buffer_size: usize) -> Channel<S> {
        trace!("Creating new Channel with buffer size {}", read_buffer_size);
        Channel {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            read_buffer_size,
            poll_interval,
        }
    }

    /// Returns the poll interval streams of this channel should be configured with.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Attaches an opened stream, replacing any previous one.
    pub fn open(&self, stream: S) -> Result<()> {
        let writer = stream.try_split()?;
        *lock(&self.reader) = Some(ChannelReader {
            stream,
            read_buffer: RingByteBuffer::with_capacity(self.read_buffer_size),
        });
        *lock(&self.writer) = Some(writer);
        trace!("Channel opened");
        Ok(())
    }

    /// Drops the stream handles.
    pub fn close(&self) {
        *lock(&self.writer) = None;
        *lock(&self.reader) = None;
        trace!("Channel closed");
    }

    /// Returns `true` while a stream is attached.
    pub fn is_open(&self) -> bool {
        lock(&self.writer).is_some()
    }

    /// Runs `f` against the write handle, e.g. to reconfigure the device.
    pub fn with_writer<R>(&self, f: impl FnOnce(&mut S) -> Result<R>) -> Result<R> {
        match lock(&self.writer).as_mut() {
            Some(stream) => f(stream),
            None => Err(Error::NotConnected),
        }
    }

    /// Writes all of `data` and flushes the stream.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        trace!("Channel send: {:?}", String::from_utf8_lossy(data));
        self.with_writer(|stream| {
            stream.write_all(data)?;
            stream.flush()?;
            Ok(data.len())
        })
    }

    /// Flushes the write handle.
    pub fn flush(&self) -> Result<()> {
        self.with_writer(|stream| Ok(stream.flush()?))
    }

    /// Reads buffered bytes first, then polls the stream until `timeout`.
    pub fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut guard = lock(&self.reader);
        let reader = guard.as_mut().ok_or(Error::NotConnected)?;
        let start = Instant::now();

        loop {
            if !reader.read_buffer.is_empty() {
                return Ok(reader.read_buffer.take_into(buf));
            }

            let attempt = Instant::now();
            match reader.read_buffer.read_from(&mut reader.stream) {
                Ok(0) if S::ZERO_READ_IS_EOF => {
                    error!("Stream closed by peer");
                    *guard = None;
                    drop(guard);
                    *lock(&self.writer) = None;
                    return Err(Error::NotConnected);
                }
                Ok(0) => {
                    // A stream that returns immediately without data would
                    // otherwise spin until the deadline.
                    if attempt.elapsed() < self.poll_interval / 2 {
                        std::thread::sleep(self.poll_interval);
                    }
                }
                Ok(bytes_read) => {
                    trace!("Read {} bytes from stream", bytes_read);
                    continue;
                }
                Err(e) if is_timeout(&e) => {}
                Err(e) => {
                    error!("IO error reading from stream: {}", e);
                    return Err(e.into());
                }
            }

            if start.elapsed() >= timeout {
                return Ok(0);
            }
        }
    }

    /// Drops buffered input, both ours and the operating system's.
    pub fn clear(&self) {
        if let Some(reader) = lock(&self.reader).as_mut() {
            reader.read_buffer.clear();
            if let Err(e) = reader.stream.discard_input() {
                error!("Failed to discard stream input: {}", e);
            }
        }
    }

    /// Pushes one byte back in front of the buffered input.
    pub fn unget(&self, byte: u8) {
        if let Some(reader) = lock(&self.reader).as_mut() {
            reader.read_buffer.unget(byte);
        }
    }
}
