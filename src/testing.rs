//! Simulated URG sensor for tests.
//!
//! The simulator answers SCIP commands the way the firmware does, including
//! baud rate mismatches, continuous streams and a few failure modes.

use crate::base::{lock, Connection, Error, Result};
use crate::checksum::Checksum;
use crate::protocol::{encode, parse_decimal};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    /// `MODL` value.
    pub model: String,
    pub distance_min: i64,
    pub area_total: i32,
    pub area_min: i32,
    pub area_max: i32,
    pub area_front: i32,
    pub scan_rpm: i32,
    /// Baud rate the sensor listens on at power up.
    pub device_baudrate: u32,
    /// Answer `QT` like SCIP 1.1 firmware until `SCIP2.0` is received.
    pub scip11: bool,
    /// Reject `SCIP2.0`.
    pub refuse_scip20: bool,
    /// Start in raw timestamp mode.
    pub timestamp_mode: bool,
    /// Start in the middle of an `MD` stream left over from a previous session.
    pub streaming_on_connect: bool,
    /// Never answer.
    pub silent: bool,
    /// Acknowledge stream requests but never send scans.
    pub stall_stream: bool,
    /// Number of scans sent with a corrupted data line.
    pub corrupt_frames: usize,
    /// Device clock at power up.
    pub timestamp_start: i64,
    /// Device clock increment per scan.
    pub timestamp_step: i64,
    /// Delay between two scans of a stream.
    pub scan_interval: Duration,
}

impl Default for SimulatorOptions {
    fn default() -> SimulatorOptions {
        SimulatorOptions {
            model: String::from("UTM-30LX(Hokuyo Automatic Co.,Ltd.)"),
            distance_min: 23,
            area_total: 1440,
            area_min: 0,
            area_max: 1080,
            area_front: 540,
            scan_rpm: 2400,
            device_baudrate: 115200,
            scip11: false,
            refuse_scip20: false,
            timestamp_mode: false,
            streaming_on_connect: false,
            silent: false,
            stall_stream: false,
            corrupt_frames: 0,
            timestamp_start: 1000,
            timestamp_step: 25,
            scan_interval: Duration::from_millis(5),
        }
    }
}

/// Range the simulator reports for `index`.
pub fn simulated_range(index: usize) -> i64 {
    100 + index as i64
}

/// Intensity the simulator reports for `index`.
pub fn simulated_intensity(index: usize) -> i64 {
    1000 + index as i64
}

#[derive(Debug, Clone)]
struct Stream {
    echo: String,
    begin: usize,
    end: usize,
    skip_lines: usize,
    data_byte: usize,
    kind: StreamKind,
    times: usize,
    sent: usize,
    next_due: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum StreamKind {
    Ranges,
    Interleaved,
    Paired,
}

#[derive(Debug)]
struct SimState {
    options: SimulatorOptions,
    outgoing: VecDeque<u8>,
    pending_command: Vec<u8>,
    commands: Vec<String>,
    connected: bool,
    host_baudrate: u32,
    device_baudrate: u32,
    laser_on: bool,
    timestamp_mode: bool,
    scip11: bool,
    clock: i64,
    corrupt_left: usize,
    reboot_requests: usize,
    rebooted: bool,
    stream: Option<Stream>,
}

fn line(payload: &[u8]) -> Vec<u8> {
    let mut checksum = Checksum::new();
    checksum.push_slice(payload);
    let mut out = payload.to_vec();
    out.push(checksum.checksum());
    out.push(b'\n');
    out
}

fn status(code: &str) -> Vec<u8> {
    line(code.as_bytes())
}

impl SimState {
    fn reply(&mut self, echo: &str, code: &str, payload: &[Vec<u8>]) {
        self.outgoing.extend(echo.as_bytes());
        self.outgoing.push_back(b'\n');
        if code.len() == 1 {
            // SCIP 1.1 status: no checksum.
            self.outgoing.extend(code.as_bytes());
            self.outgoing.push_back(b'\n');
        } else {
            self.outgoing.extend(status(code));
        }
        for p in payload {
            self.outgoing.extend(p);
        }
        self.outgoing.push_back(b'\n');
    }

    fn parameter_line(tag: &str, value: &str) -> Vec<u8> {
        let payload = format!("{}:{}", tag, value);
        let mut checksum = Checksum::new();
        checksum.push_slice(payload.as_bytes());
        let mut out = payload.into_bytes();
        out.push(b';');
        out.push(checksum.checksum());
        out.push(b'\n');
        out
    }

    fn samples(&self, stream: &Stream) -> Vec<i64> {
        let mut values = Vec::new();
        let mut index = stream.begin;
        while index <= stream.end {
            match stream.kind {
                StreamKind::Ranges => values.push(simulated_range(index)),
                StreamKind::Interleaved => {
                    values.push(simulated_range(index));
                    values.push(simulated_intensity(index));
                }
                StreamKind::Paired => {
                    if (index - stream.begin) & 1 == 0 {
                        values.push(simulated_range(index));
                    } else {
                        values.push(simulated_intensity(index - 1));
                    }
                }
            }
            index += stream.skip_lines;
        }
        values
    }

    fn data_block(&mut self, echo: &str, code: &str, stream: &Stream, corrupt: bool) {
        let encoded: Vec<u8> = self
            .samples(stream)
            .iter()
            .flat_map(|&v| encode(v, stream.data_byte))
            .collect();
        let mut payload = vec![line(&encode(self.clock & 0xff_ffff, 4))];
        for chunk in encoded.chunks(64) {
            payload.push(line(chunk));
        }
        if corrupt {
            if let Some(data) = payload.get_mut(1) {
                data[0] ^= 0x01;
            }
        }
        self.reply(echo, code, &payload);
        self.clock += self.options.timestamp_step;
    }

    fn emit_frame(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let remain = if stream.times == 0 {
            0
        } else {
            stream.times - stream.sent - 1
        };
        let echo = format!("{}{:02}", &stream.echo[..13], remain);
        let corrupt = self.corrupt_left > 0;
        if corrupt {
            self.corrupt_left -= 1;
        }
        self.data_block(&echo, "99", &stream, corrupt);

        stream.sent += 1;
        stream.next_due = Instant::now() + self.options.scan_interval;
        if stream.times != 0 && stream.sent >= stream.times {
            self.laser_on = false;
        } else {
            self.stream = Some(stream);
        }
    }

    fn start_stream(&mut self, command: &str) {
        let bytes = command.as_bytes();
        if bytes.len() != 15 {
            self.reply(command, "0C", &[]);
            return;
        }
        let skip_field = &bytes[10..12];
        let paired = skip_field == b"FF";
        let kind = match (&command[..2], paired) {
            ("ME", _) => StreamKind::Interleaved,
            (_, true) => StreamKind::Paired,
            _ => StreamKind::Ranges,
        };
        let stream = Stream {
            echo: command.to_owned(),
            begin: parse_decimal(&bytes[2..6]),
            end: parse_decimal(&bytes[6..10]),
            skip_lines: if paired {
                1
            } else {
                parse_decimal(skip_field).max(1)
            },
            data_byte: if &command[..2] == "MS" { 2 } else { 3 },
            kind,
            times: parse_decimal(&bytes[13..15]),
            sent: 0,
            next_due: Instant::now(),
        };
        self.reply(command, "00", &[]);
        self.laser_on = true;
        if !self.options.stall_stream {
            self.stream = Some(stream);
        }
    }

    fn handle(&mut self, command: &str) {
        self.commands.push(command.to_owned());
        if self.options.silent || self.host_baudrate != self.device_baudrate {
            return;
        }

        if command == "QT" {
            if self.scip11 {
                self.reply(command, "E", &[]);
            } else if self.timestamp_mode {
                self.reply(command, "0E", &[]);
            } else {
                // The scan being transmitted still goes out before the echo.
                if self.stream.is_some() {
                    self.emit_frame();
                }
                self.stream = None;
                self.laser_on = false;
                self.reply(command, "00", &[]);
            }
        } else if command == "SCIP2.0" {
            if self.scip11 && !self.options.refuse_scip20 {
                self.scip11 = false;
                self.reply(command, "0", &[]);
            } else {
                self.reply(command, "E", &[]);
            }
        } else if command == "BM" {
            let code = if self.laser_on { "02" } else { "00" };
            self.laser_on = true;
            self.reply(command, code, &[]);
        } else if command == "TM0" {
            self.timestamp_mode = true;
            self.laser_on = false;
            self.reply(command, "00", &[]);
        } else if command == "TM1" {
            if self.timestamp_mode {
                let clock = line(&encode(self.clock & 0xff_ffff, 4));
                self.reply(command, "00", &[clock]);
            } else {
                self.reply(command, "01", &[]);
            }
        } else if command == "TM2" {
            self.timestamp_mode = false;
            self.reply(command, "00", &[]);
        } else if let Some(rate) = command.strip_prefix("SS") {
            let rate = parse_decimal(rate.as_bytes()) as u32;
            if rate == self.device_baudrate {
                self.reply(command, "03", &[]);
            } else {
                self.reply(command, "00", &[]);
                self.device_baudrate = rate;
            }
        } else if command == "PP" {
            let o = &self.options;
            let payload = vec![
                SimState::parameter_line("MODL", &o.model),
                SimState::parameter_line("DMIN", &o.distance_min.to_string()),
                SimState::parameter_line("DMAX", "60000"),
                SimState::parameter_line("ARES", &o.area_total.to_string()),
                SimState::parameter_line("AMIN", &o.area_min.to_string()),
                SimState::parameter_line("AMAX", &o.area_max.to_string()),
                SimState::parameter_line("AFRT", &o.area_front.to_string()),
                SimState::parameter_line("SCAN", &o.scan_rpm.to_string()),
            ];
            self.reply(command, "00", &payload);
        } else if command == "VV" {
            let payload = vec![
                SimState::parameter_line("VEND", "Hokuyo Automatic Co.,Ltd."),
                SimState::parameter_line("PROD", &self.options.model),
                SimState::parameter_line("FIRM", "1.0.0"),
                SimState::parameter_line("PROT", "SCIP 2.0"),
                SimState::parameter_line("SERI", "H0000000"),
            ];
            self.reply(command, "00", &payload);
        } else if command == "RB" {
            self.reboot_requests += 1;
            if self.reboot_requests >= 2 {
                self.reply(command, "00", &[]);
                self.rebooted = true;
            } else {
                self.reply(command, "01", &[]);
            }
        } else if command.starts_with("GD") || command.starts_with("GS") {
            let bytes = command.as_bytes();
            if bytes.len() != 12 {
                self.reply(command, "0C", &[]);
            } else if !self.laser_on {
                self.reply(command, "10", &[]);
            } else {
                let stream = Stream {
                    echo: command.to_owned(),
                    begin: parse_decimal(&bytes[2..6]),
                    end: parse_decimal(&bytes[6..10]),
                    skip_lines: parse_decimal(&bytes[10..12]).max(1),
                    data_byte: if command.starts_with("GS") { 2 } else { 3 },
                    kind: StreamKind::Ranges,
                    times: 1,
                    sent: 0,
                    next_due: Instant::now(),
                };
                self.data_block(command, "00", &stream, false);
            }
        } else if command.starts_with("MD") || command.starts_with("MS") || command.starts_with("ME") {
            self.start_stream(command);
        } else {
            self.reply(command, "0E", &[]);
        }
    }
}

/// Reactive stand-in for a sensor behind a [`Connection`].
#[derive(Debug, Clone)]
pub struct SimulatedUrg {
    shared: Arc<(Mutex<SimState>, Condvar)>,
}

impl SimulatedUrg {
    pub fn new(options: SimulatorOptions) -> SimulatedUrg {
        let mut state = SimState {
            outgoing: VecDeque::new(),
            pending_command: Vec::new(),
            commands: Vec::new(),
            connected: false,
            host_baudrate: 0,
            device_baudrate: options.device_baudrate,
            laser_on: false,
            timestamp_mode: options.timestamp_mode,
            scip11: options.scip11,
            clock: options.timestamp_start,
            corrupt_left: options.corrupt_frames,
            reboot_requests: 0,
            rebooted: false,
            stream: None,
            options,
        };
        if state.options.streaming_on_connect {
            state.start_stream("MD0000108001000");
            state.outgoing.clear();
            state.emit_frame();
            // The host attaches in the middle of a scan.
            let half = state.outgoing.len() / 2;
            state.outgoing.drain(..half);
        }
        SimulatedUrg {
            shared: Arc::new((Mutex::new(state), Condvar::new())),
        }
    }

    /// Commands received so far, without terminators.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.shared.0).commands.clone()
    }

    pub fn device_baudrate(&self) -> u32 {
        lock(&self.shared.0).device_baudrate
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.shared.0).stream.is_some()
    }

    pub fn laser_on(&self) -> bool {
        lock(&self.shared.0).laser_on
    }

    pub fn rebooted(&self) -> bool {
        lock(&self.shared.0).rebooted
    }

    /// Bytes queued for the host.
    pub fn pending(&self) -> usize {
        lock(&self.shared.0).outgoing.len()
    }

    pub fn set_stall_stream(&self, stall: bool) {
        lock(&self.shared.0).options.stall_stream = stall;
    }

    pub fn set_clock(&self, clock: i64) {
        lock(&self.shared.0).clock = clock;
    }
}

impl Connection for SimulatedUrg {
    fn connect(&self, _device: &str, baudrate: u32) -> Result<()> {
        let mut state = lock(&self.shared.0);
        state.connected = true;
        state.host_baudrate = baudrate;
        Ok(())
    }

    fn disconnect(&self) {
        lock(&self.shared.0).connected = false;
    }

    fn is_connected(&self) -> bool {
        lock(&self.shared.0).connected
    }

    fn set_baudrate(&self, baudrate: u32) -> Result<()> {
        lock(&self.shared.0).host_baudrate = baudrate;
        Ok(())
    }

    fn baudrate(&self) -> u32 {
        lock(&self.shared.0).host_baudrate
    }

    fn send(&self, data: &[u8]) -> Result<usize> {
        let (state, ready) = &*self.shared;
        let mut state = lock(state);
        if !state.connected {
            return Err(Error::NotConnected);
        }
        for &byte in data {
            if byte == b'\n' {
                let command = String::from_utf8_lossy(&state.pending_command).into_owned();
                state.pending_command.clear();
                state.handle(&command);
            } else {
                state.pending_command.push(byte);
            }
        }
        ready.notify_all();
        Ok(data.len())
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let (state, ready) = &*self.shared;
        let deadline = Instant::now() + timeout;
        let mut guard = lock(state);
        loop {
            if !guard.connected {
                return Err(Error::NotConnected);
            }
            if !guard.outgoing.is_empty() {
                let n = buf.len().min(guard.outgoing.len());
                for (slot, byte) in buf.iter_mut().zip(guard.outgoing.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }

            let now = Instant::now();
            let next_due = guard.stream.as_ref().map(|s| s.next_due);
            if let Some(due) = next_due {
                if due <= now {
                    guard.emit_frame();
                    continue;
                }
            }
            if now >= deadline {
                return Ok(0);
            }
            let wake = next_due.map_or(deadline, |due| due.min(deadline));
            guard = ready
                .wait_timeout(guard, wake - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn clear(&self) {
        lock(&self.shared.0).outgoing.clear();
    }

    fn unget(&self, byte: u8) {
        lock(&self.shared.0).outgoing.push_front(byte);
    }
}
