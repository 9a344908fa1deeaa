use std::cmp::min;
use std::io::Read;

/// A fixed capacity byte ring used as the read-ahead buffer of a connection.
///
/// Bytes are appended at the tail by [`RingByteBuffer::read_from`] or
/// [`RingByteBuffer::push_back`] and consumed from the head. A consumed byte
/// can be returned to the head with [`RingByteBuffer::unget`], which is how
/// the line reader resynchronizes after an over-long line.
///
/// # Example
///
/// ```rust
/// # use urg::base::RingByteBuffer;
/// let mut buffer = RingByteBuffer::with_capacity(8);
/// buffer.push_back(b"QT\n");
/// assert_eq!(buffer.pop_front(), Some(b'Q'));
/// buffer.unget(b'Q');
/// assert_eq!(buffer.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RingByteBuffer {
    buf: Vec<u8>,
    head: usize,
    size: usize,
}

impl RingByteBuffer {
    /// Creates a new `RingByteBuffer` holding at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> RingByteBuffer {
        RingByteBuffer {
            buf: vec![0; capacity.max(1)],
            head: 0,
            size: 0,
        }
    }

    /// Returns the number of bytes currently stored in the buffer.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the buffer contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the total capacity of the buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Returns the amount of free space available in the buffer in bytes.
    pub fn free_space(&self) -> usize {
        self.buf.len() - self.size
    }

    /// Drops every buffered byte.
    pub fn clear(&mut self) {
        self.head = 0;
        self.size = 0;
    }

    fn tail(&self) -> usize {
        (self.head + self.size) % self.buf.len()
    }

    /// Appends as many bytes of `data` as fit, returning how many were stored.
    pub fn push_back(&mut self, data: &[u8]) -> usize {
        let stored = min(self.free_space(), data.len());
        for &byte in &data[..stored] {
            let tail = self.tail();
            self.buf[tail] = byte;
            self.size += 1;
        }
        stored
    }

    /// Removes and returns the oldest byte.
    pub fn pop_front(&mut self) -> Option<u8> {
        if self.size == 0 {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % self.buf.len();
        self.size -= 1;
        Some(byte)
    }

    /// Puts one byte back in front of the buffered data.
    ///
    /// When the buffer is full the newest byte is dropped to make room, the
    /// pushed-back byte always wins.
    pub fn unget(&mut self, byte: u8) {
        if self.free_space() == 0 {
            self.size -= 1;
        }
        self.head = (self.head + self.buf.len() - 1) % self.buf.len();
        self.buf[self.head] = byte;
        self.size += 1;
    }

    /// Moves up to `out.len()` buffered bytes into `out`.
    pub fn take_into(&mut self, out: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < out.len() {
            match self.pop_front() {
                Some(byte) => {
                    out[filled] = byte;
                    filled += 1;
                }
                None => break,
            }
        }
        filled
    }

    fn current_write_slice(&mut self) -> &mut [u8] {
        let current_end = self.tail();
        let write_buf_end = min(self.buf.len(), current_end + self.free_space());
        &mut self.buf[current_end..write_buf_end]
    }

    fn partial_read_from(&mut self, upstream: &mut impl Read) -> std::io::Result<usize> {
        if self.current_write_slice().is_empty() {
            return Ok(0);
        }
        let read = upstream.read(self.current_write_slice())?;
        self.size += min(self.free_space(), read);
        Ok(read)
    }

    /// Fills the free space from `upstream`, handling wrap-around.
    ///
    /// `Ok(0)` means the upstream reported end of stream, or the buffer is
    /// full. A read timeout is returned as the `TimedOut` or `WouldBlock`
    /// error of the upstream; the caller owns the overall deadline.
    pub fn read_from(&mut self, upstream: &mut impl Read) -> std::io::Result<usize> {
        let read = self.partial_read_from(upstream)?;
        if read == 0 {
            return Ok(0);
        }
        let latter_read = match self.partial_read_from(upstream) {
            Ok(n) => n,
            Err(e) if is_timeout(&e) => 0,
            Err(e) => return Err(e),
        };
        Ok(read + latter_read)
    }
}

/// Returns `true` for the errors a stream with a read timeout reports when
/// nothing arrived in time.
pub fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::RingByteBuffer;

    #[test]
    fn unget_restores_consumed_byte() {
        let mut buffer = RingByteBuffer::with_capacity(4);
        buffer.push_back(b"ab");
        assert_eq!(buffer.pop_front(), Some(b'a'));
        buffer.unget(b'a');
        let mut out = [0u8; 4];
        assert_eq!(buffer.take_into(&mut out), 2);
        assert_eq!(&out[..2], b"ab");
    }

    #[test]
    fn wraps_around_capacity() {
        let mut buffer = RingByteBuffer::with_capacity(3);
        assert_eq!(buffer.push_back(b"xyz"), 3);
        assert_eq!(buffer.push_back(b"w"), 0);
        assert_eq!(buffer.pop_front(), Some(b'x'));
        assert_eq!(buffer.push_back(b"w"), 1);
        let mut out = [0u8; 3];
        buffer.take_into(&mut out);
        assert_eq!(&out, b"yzw");
    }

    #[test]
    fn read_from_fills_from_stream() {
        let mut buffer = RingByteBuffer::with_capacity(16);
        let mut source: &[u8] = b"00P\n";
        assert_eq!(buffer.read_from(&mut source).unwrap(), 4);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn read_from_tells_timeout_from_end_of_stream() {
        struct Silent;

        impl std::io::Read for Silent {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::TimedOut.into())
            }
        }

        let mut buffer = RingByteBuffer::with_capacity(16);
        let err = buffer.read_from(&mut Silent).unwrap_err();
        assert!(super::is_timeout(&err));

        let mut closed: &[u8] = b"";
        assert_eq!(buffer.read_from(&mut closed).unwrap(), 0);
    }

    #[test]
    fn unget_on_full_buffer_drops_newest() {
        let mut buffer = RingByteBuffer::with_capacity(2);
        buffer.push_back(b"12");
        buffer.unget(b'0');
        let mut out = [0u8; 2];
        buffer.take_into(&mut out);
        assert_eq!(&out, b"01");
    }
}
