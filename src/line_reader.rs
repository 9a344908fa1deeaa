use crate::base::{Connection, Error, Result};
use log::trace;
use std::time::{Duration, Instant};

#[inline]
fn is_terminator(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

/// Reads one line, waiting at most `timeout` for each byte.
///
/// The terminator (`\r` or `\n`) is not included. A blank line yields an
/// empty vector. Fails with [`Error::Timeout`] only if not a single byte
/// arrived; a partial line followed by silence is returned as is.
///
/// If `max_len` bytes arrive without a terminator, the last one is pushed back
/// with [`Connection::unget`] and the first `max_len - 1` bytes are returned,
/// so the next read starts where this one stopped.
pub fn read_line(con: &dyn Connection, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
    let mut line = Vec::with_capacity(max_len);
    let mut byte = [0u8; 1];
    let mut timed_out = false;

    while line.len() < max_len {
        if con.receive(&mut byte, timeout)? == 0 {
            timed_out = true;
            break;
        }
        if is_terminator(byte[0]) {
            break;
        }
        line.push(byte[0]);
    }

    if line.len() == max_len {
        if let Some(last) = line.pop() {
            con.unget(last);
        }
    }

    if line.is_empty() && timed_out {
        return Err(Error::Timeout);
    }
    trace!("Read line: {:?}", String::from_utf8_lossy(&line));
    Ok(line)
}

/// Discards incoming bytes until `each_timeout` passes without one, or until
/// `total_timeout` has elapsed overall. Returns the number of bytes dropped.
pub fn skip(con: &dyn Connection, total_timeout: Duration, each_timeout: Duration) -> usize {
    let each_timeout = if each_timeout.is_zero() {
        total_timeout
    } else {
        each_timeout
    };
    let deadline = Instant::now() + total_timeout;
    let mut buf = [0u8; 64];
    let mut skipped = 0;

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match con.receive(&mut buf, each_timeout.min(deadline - now)) {
            Ok(0) | Err(_) => break,
            Ok(n) => skipped += n,
        }
    }
    if skipped > 0 {
        trace!("Skipped {} stray bytes", skipped);
    }
    skipped
}
