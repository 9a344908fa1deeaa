//! Record/replay decorator for a [`Connection`].
//!
//! The log is a text file of two-line records. The first line holds the
//! milliseconds since the log was opened and the payload size, optionally
//! followed by ` # ` and a tag; the second line is the payload itself: raw
//! bytes for `send`/`receive`, `0`/`1` for booleans and decimal numbers.
//!
//! ```text
//! 12,3 # send()
//! QT
//! 13,1 # recv()
//! Q
//! ```

use crate::base::{lock, Connection, Error, Result};
use crate::config::MonitorMode;
use log::{debug, error, trace};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
enum MonitorLog {
    Direct,
    Record {
        writer: Mutex<BufWriter<File>>,
        started: Instant,
    },
    Play {
        reader: Mutex<BufReader<File>>,
        path: PathBuf,
    },
}

/// Wraps a connection and records every call, or answers every call from a
/// recording.
///
/// While playing, the wrapped connection is only used for `disconnect` and
/// `flush`; `clear` and `unget` are no-ops because their effect is already
/// part of the recorded receives.
#[derive(Debug)]
pub struct MonitoredConnection<C> {
    inner: C,
    log: MonitorLog,
    baudrate: AtomicU32,
}

impl<C: Connection> MonitoredConnection<C> {
    pub fn new(inner: C, mode: &MonitorMode) -> Result<MonitoredConnection<C>> {
        let log = match mode {
            MonitorMode::Direct => MonitorLog::Direct,
            MonitorMode::Record(path) => {
                debug!("Recording connection to {}", path.display());
                MonitorLog::Record {
                    writer: Mutex::new(BufWriter::new(File::create(path)?)),
                    started: Instant::now(),
                }
            }
            MonitorMode::Play(path) => {
                debug!("Replaying connection from {}", path.display());
                MonitorLog::Play {
                    reader: Mutex::new(BufReader::new(File::open(path)?)),
                    path: path.clone(),
                }
            }
        };
        Ok(MonitoredConnection {
            inner,
            log,
            baudrate: AtomicU32::new(0),
        })
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn record(&self, payload: &[u8], tag: Option<&str>) -> Result<()> {
        let MonitorLog::Record { writer, started } = &self.log else {
            return Ok(());
        };
        let mut writer = lock(writer);
        write!(writer, "{},{}", started.elapsed().as_millis(), payload.len())?;
        if let Some(tag) = tag {
            write!(writer, " # {}", tag)?;
        }
        writer.write_all(b"\n")?;
        writer.write_all(payload)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn play(&self) -> Result<Vec<u8>> {
        let MonitorLog::Play { reader, path } = &self.log else {
            return Err(Error::Unsupported(String::from("connection is not replaying")));
        };
        let mut reader = lock(reader);
        read_record(&mut *reader).ok_or_else(|| {
            error!("mismatch log: {}", path.display());
            Error::ProtocolError {
                description: format!("mismatch log: {}", path.display()),
            }
        })
    }

    fn play_bool(&self) -> Result<bool> {
        Ok(self.play()?.first().is_some_and(|&c| c != b'0'))
    }

    fn mismatch(&self, path: &Path) -> Error {
        self.inner.disconnect();
        Error::ProtocolError {
            description: format!("mismatch log: {}", path.display()),
        }
    }
}

/// Reads one record, or `None` if the log ends or is malformed.
fn read_record(reader: &mut impl BufRead) -> Option<Vec<u8>> {
    let mut header = Vec::new();
    if reader.read_until(b'\n', &mut header).ok()? == 0 {
        return None;
    }
    let header = String::from_utf8_lossy(&header);
    let header = header.split('#').next()?.trim();
    let (_ticks, size) = header.split_once(',')?;
    let size: usize = size.trim().parse().ok()?;

    let mut payload = vec![0u8; size + 1];
    reader.read_exact(&mut payload).ok()?;
    if payload.pop() != Some(b'\n') {
        return None;
    }
    Some(payload)
}

fn bool_payload(value: bool) -> &'static [u8] {
    if value {
        b"1"
    } else {
        b"0"
    }
}

impl<C: Connection> Connection for MonitoredConnection<C> {
    fn connect(&self, device: &str, baudrate: u32) -> Result<()> {
        match &self.log {
            MonitorLog::Direct => self.inner.connect(device, baudrate),
            MonitorLog::Record { .. } => {
                let result = self.inner.connect(device, baudrate);
                self.record(bool_payload(result.is_ok()), None)?;
                result
            }
            MonitorLog::Play { path, .. } => {
                if self.play_bool().map_err(|_| self.mismatch(path))? {
                    self.baudrate.store(baudrate, Ordering::Relaxed);
                    Ok(())
                } else {
                    Err(Error::NotConnected)
                }
            }
        }
    }

    fn disconnect(&self) {
        self.inner.disconnect()
    }

    fn is_connected(&self) -> bool {
        match &self.log {
            MonitorLog::Direct => self.inner.is_connected(),
            MonitorLog::Record { .. } => {
                let connected = self.inner.is_connected();
                if let Err(e) = self.record(bool_payload(connected), None) {
                    error!("Monitor log write failed: {}", e);
                }
                connected
            }
            MonitorLog::Play { .. } => self.play_bool().unwrap_or(false),
        }
    }

    fn set_baudrate(&self, baudrate: u32) -> Result<()> {
        match &self.log {
            MonitorLog::Direct => self.inner.set_baudrate(baudrate),
            MonitorLog::Record { .. } => {
                let result = self.inner.set_baudrate(baudrate);
                self.record(bool_payload(result.is_ok()), None)?;
                self.record(baudrate.to_string().as_bytes(), None)?;
                self.baudrate.store(baudrate, Ordering::Relaxed);
                result
            }
            MonitorLog::Play { path, .. } => {
                let ok = self.play_bool().map_err(|_| self.mismatch(path))?;
                self.play().map_err(|_| self.mismatch(path))?;
                self.baudrate.store(baudrate, Ordering::Relaxed);
                if ok {
                    Ok(())
                } else {
                    Err(Error::InvalidBaudrate(baudrate))
                }
            }
        }
    }

    fn baudrate(&self) -> u32 {
        match &self.log {
            MonitorLog::Play { .. } => self.baudrate.load(Ordering::Relaxed),
            _ => self.inner.baudrate(),
        }
    }

    fn send(&self, data: &[u8]) -> Result<usize> {
        match &self.log {
            MonitorLog::Direct => self.inner.send(data),
            MonitorLog::Record { .. } => {
                let sent = self.inner.send(data)?;
                self.record(&data[..sent], Some("send()"))?;
                Ok(sent)
            }
            MonitorLog::Play { path, .. } => {
                let recorded = self.play().map_err(|_| self.mismatch(path))?;
                trace!("Replayed send of {} bytes", recorded.len());
                Ok(recorded.len())
            }
        }
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match &self.log {
            MonitorLog::Direct => self.inner.receive(buf, timeout),
            MonitorLog::Record { .. } => {
                let n = self.inner.receive(buf, timeout)?;
                self.record(&buf[..n], Some("recv()"))?;
                Ok(n)
            }
            MonitorLog::Play { path, .. } => {
                let recorded = self.play().map_err(|_| self.mismatch(path))?;
                if recorded.len() > buf.len() {
                    return Err(self.mismatch(path));
                }
                buf[..recorded.len()].copy_from_slice(&recorded);
                Ok(recorded.len())
            }
        }
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    fn clear(&self) {
        if !matches!(self.log, MonitorLog::Play { .. }) {
            self.inner.clear()
        }
    }

    fn unget(&self, byte: u8) {
        if !matches!(self.log, MonitorLog::Play { .. }) {
            self.inner.unget(byte)
        }
    }

    fn what(&self) -> String {
        match &self.log {
            MonitorLog::Direct => self.inner.what(),
            MonitorLog::Record { .. } => {
                let message = self.inner.what();
                if let Err(e) = self.record(message.as_bytes(), None) {
                    error!("Monitor log write failed: {}", e);
                }
                message
            }
            MonitorLog::Play { .. } => self
                .play()
                .map(|m| String::from_utf8_lossy(&m).into_owned())
                .unwrap_or_else(|e| e.to_string()),
        }
    }
}
