//! Scripted connection for tests

use crate::base::channel::lock;
use crate::base::connection::Connection;
use crate::base::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct MockState {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
}

/// Mock connection that plays back injected bytes and records what was sent.
///
/// Clones share the same buffers, so a test keeps one handle to script the
/// device while the session owns another.
#[derive(Debug, Clone)]
pub struct MockConnection {
    state: Arc<(Mutex<MockState>, Condvar)>,
    connected: Arc<AtomicBool>,
    baudrate: Arc<AtomicU32>,
}

impl MockConnection {
    /// Creates a mock that already counts as connected at 115200 baud.
    pub fn new() -> MockConnection {
        MockConnection {
            state: Arc::new((Mutex::new(MockState::default()), Condvar::new())),
            connected: Arc::new(AtomicBool::new(true)),
            baudrate: Arc::new(AtomicU32::new(115200)),
        }
    }

    /// Queues bytes to be returned by `receive`.
    pub fn inject_read(&self, data: &[u8]) {
        let (state, ready) = &*self.state;
        lock(state).incoming.extend(data);
        ready.notify_all();
    }

    /// Returns everything sent so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state.0).written.clone()
    }

    /// Forgets everything sent so far.
    pub fn clear_written(&self) {
        lock(&self.state.0).written.clear();
    }

    /// Number of injected bytes not yet received.
    pub fn pending(&self) -> usize {
        lock(&self.state.0).incoming.len()
    }
}

impl Default for MockConnection {
    fn default() -> MockConnection {
        MockConnection::new()
    }
}

impl Connection for MockConnection {
    fn connect(&self, _device: &str, baudrate: u32) -> Result<()> {
        self.baudrate.store(baudrate, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_baudrate(&self, baudrate: u32) -> Result<()> {
        self.baudrate.store(baudrate, Ordering::SeqCst);
        Ok(())
    }

    fn baudrate(&self) -> u32 {
        self.baudrate.load(Ordering::SeqCst)
    }

    fn send(&self, data: &[u8]) -> Result<usize> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        lock(&self.state.0).written.extend_from_slice(data);
        Ok(data.len())
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let (state, ready) = &*self.state;
        let deadline = Instant::now() + timeout;
        let mut guard = lock(state);
        while guard.incoming.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            guard = ready
                .wait_timeout(guard, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        let mut filled = 0;
        while filled < buf.len() {
            match guard.incoming.pop_front() {
                Some(byte) => {
                    buf[filled] = byte;
                    filled += 1;
                }
                None => break,
            }
        }
        Ok(filled)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn clear(&self) {
        lock(&self.state.0).incoming.clear();
    }

    fn unget(&self, byte: u8) {
        lock(&self.state.0).incoming.push_front(byte);
    }
}
