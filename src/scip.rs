//! SCIP 2.0 session: handshake, request/reply exchange and capture replies.

use crate::base::{lock, Connection, Error, Result};
use crate::checksum::verified_body;
use crate::cmds::*;
use crate::config::TimeoutConfig;
use crate::internals::*;
use crate::line_reader::{read_line, skip};
use crate::parsers::echo_parser::{parse_echo, Echo};
use crate::parsers::range_data_parser::RangeDataParser;
use crate::protocol::{
    baudrate_command, decode, is_continuous_command, parse_capture_status, parse_decimal, parse_status,
};
use crate::types::{CaptureSettings, CaptureType, DeviceParameters, LaserState, ScanFrame};
use log::{debug, error, trace, warn};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Status code and payload lines of a successful [`ScipSession::response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: i32,
    pub lines: Vec<String>,
}

#[derive(Debug)]
struct SessionState {
    laser: LaserState,
    /// An `MD`/`MS`/`ME` stream is running; replies belong to the capture worker.
    streaming: bool,
    /// A `QT` was sent and no other command since.
    qt_in_flight: bool,
    /// The host baud rate changed and no reply has been read since.
    baudrate_changed: bool,
    error_message: String,
}

impl Default for SessionState {
    fn default() -> SessionState {
        SessionState {
            laser: LaserState::Unknown,
            streaming: false,
            qt_in_flight: false,
            baudrate_changed: false,
            error_message: String::from("no error."),
        }
    }
}

/// Protocol state machine over one [`Connection`].
///
/// Clones share the connection and the state, which lets the capture worker
/// read replies while the caller sends `QT`.
#[derive(Clone)]
pub struct ScipSession {
    con: Arc<dyn Connection>,
    state: Arc<Mutex<SessionState>>,
    timeouts: TimeoutConfig,
}

impl fmt::Debug for ScipSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScipSession")
            .field("state", &*lock(&self.state))
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl ScipSession {
    pub fn new(con: Arc<dyn Connection>, timeouts: TimeoutConfig) -> ScipSession {
        trace!("Creating new ScipSession");
        ScipSession {
            con,
            state: Arc::new(Mutex::new(SessionState::default())),
            timeouts,
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.con
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Message of the most recent failure.
    pub fn what(&self) -> String {
        lock(&self.state).error_message.clone()
    }

    pub fn laser_state(&self) -> LaserState {
        lock(&self.state).laser
    }

    /// Returns `true` while a continuous capture stream is running.
    pub fn is_streaming(&self) -> bool {
        lock(&self.state).streaming
    }

    fn record(&self, e: Error) -> Error {
        lock(&self.state).error_message = e.to_string();
        e
    }

    fn set_laser(&self, laser: LaserState) {
        lock(&self.state).laser = laser;
    }

    /// Opens `device` and finds the baud rate the sensor listens on, then
    /// switches both sides to `baudrate`.
    pub fn connect(&self, device: &str, baudrate: u32) -> Result<()> {
        if !SCIP_BAUDRATES.contains(&baudrate) {
            return Err(self.record(Error::InvalidBaudrate(baudrate)));
        }
        *lock(&self.state) = SessionState::default();
        self.con
            .connect(device, baudrate)
            .map_err(|e| self.record(e))?;

        let mut candidates = SCIP_PROBE_BAUDRATES.to_vec();
        match candidates.iter().position(|&b| b == baudrate) {
            Some(i) => candidates.swap(0, i),
            None => candidates.insert(0, baudrate),
        }

        for candidate in candidates {
            debug!("Probing {} baud", candidate);
            self.set_host_baudrate(candidate)?;
            self.con.clear();

            match self.response(SCIP_CMD_QUIT, &[SCIP_STATUS_OK], false) {
                Ok(_) => {
                    self.set_laser(LaserState::Off);
                    return self.change_both_baudrate(baudrate);
                }
                Err(Error::Timeout) => {
                    self.record(Error::BaudrateNotDetected);
                    continue;
                }
                Err(Error::EchoMismatch { actual, .. }) => {
                    // Most likely a capture stream left running; QT ends it.
                    debug!("Skipping stray stream data after {:?}", actual);
                    self.con.clear();
                    skip(
                        &*self.con,
                        self.timeouts.total(),
                        self.timeouts.continuation(),
                    );
                    self.set_laser(LaserState::Off);
                    return self.change_both_baudrate(baudrate);
                }
                Err(Error::UnexpectedStatus { code, .. }) if code == SCIP_STATUS_SCIP11 => {
                    debug!("SCIP1.1 firmware, switching to SCIP2.0");
                    if self
                        .response(SCIP_CMD_SCIP20, &[SCIP_STATUS_OK], false)
                        .is_err()
                    {
                        error!("Sensor refused SCIP2.0");
                        return Err(self.record(Error::LegacyProtocol));
                    }
                    self.set_laser(LaserState::Off);
                    return self.change_both_baudrate(baudrate);
                }
                Err(Error::UnexpectedStatus { code, .. }) if code == SCIP_STATUS_TIMESTAMP_MODE => {
                    debug!("Sensor is in timestamp mode, leaving it");
                    if self
                        .response(SCIP_CMD_TIMESTAMP_LEAVE, &[SCIP_STATUS_OK], false)
                        .is_ok()
                    {
                        self.set_laser(LaserState::Off);
                        return self.change_both_baudrate(baudrate);
                    }
                }
                Err(e @ (Error::Io(_) | Error::NotConnected)) => return Err(self.record(e)),
                #[cfg(feature = "serial")]
                Err(e @ Error::Serial(_)) => return Err(self.record(e)),
                Err(e) => {
                    warn!("QT at {} baud failed: {}", candidate, e);
                }
            }
        }

        error!("No response at any candidate baud rate");
        self.con.disconnect();
        Err(self.record(Error::BaudrateNotDetected))
    }

    fn set_host_baudrate(&self, baudrate: u32) -> Result<()> {
        self.con
            .set_baudrate(baudrate)
            .map_err(|e| self.record(e))?;
        lock(&self.state).baudrate_changed = true;
        Ok(())
    }

    /// Moves the sensor and then the host to `baudrate`.
    ///
    /// The sensor needs roughly one more revolution before it listens at the
    /// new rate; the wait is derived from the round trip of `SS`.
    pub fn change_both_baudrate(&self, baudrate: u32) -> Result<()> {
        if self.con.baudrate() == baudrate {
            return Ok(());
        }
        if !SCIP_BAUDRATES.contains(&baudrate) {
            return Err(self.record(Error::InvalidBaudrate(baudrate)));
        }

        let start = Instant::now();
        let command = baudrate_command(baudrate);
        self.response(
            &command,
            &[
                SCIP_STATUS_OK,
                SCIP_STATUS_SS_ALREADY,
                SCIP_STATUS_SS_ACCEPTED,
                SCIP_STATUS_SS_UNCHANGED,
            ],
            false,
        )
        .inspect_err(|e| warn!("Baudrate change fail: {}", e))?;

        let settle = start.elapsed() * 4 / 3 + URG_BAUDRATE_SETTLE_MARGIN;
        trace!("Waiting {:?} for the sensor to switch to {}", settle, baudrate);
        std::thread::sleep(settle);
        self.set_host_baudrate(baudrate)
    }

    /// Sends `command` and reads its reply block.
    ///
    /// The reply must echo the command and carry a status code from
    /// `expected`; any other code fails with [`Error::UnexpectedStatus`],
    /// which keeps the code for the caller. Payload lines up to the blank
    /// line are returned when `collect_lines` is set.
    pub fn response(&self, command: &str, expected: &[i32], collect_lines: bool) -> Result<Response> {
        self.exchange(command, expected, collect_lines)
            .map_err(|e| self.record(e))
    }

    fn exchange(&self, command: &str, expected: &[i32], collect_lines: bool) -> Result<Response> {
        trace!("Sending command {:?}", command);
        let sent = self.con.send(command.as_bytes())?;
        {
            let mut state = lock(&self.state);
            if command != SCIP_CMD_QUIT {
                state.qt_in_flight = false;
            }
        }
        if sent != command.len() {
            return Err(Error::SendFailure {
                expected: command.len(),
                sent,
            });
        }

        let echo = read_line(&*self.con, SCIP_LINE_BUFFER_SIZE, self.timeouts.first_line())?;
        let baudrate_changed = std::mem::replace(&mut lock(&self.state).baudrate_changed, false);
        let expected_echo = command.trim_end_matches('\n').as_bytes();
        // A serial line sometimes delivers one NUL right after a baud rate change.
        let stray_nul = baudrate_changed && echo.as_slice() == [0u8];
        if !stray_nul && echo != expected_echo {
            return Err(Error::EchoMismatch {
                expected: String::from_utf8_lossy(expected_echo).into_owned(),
                actual: String::from_utf8_lossy(&echo).into_owned(),
            });
        }

        let status = read_line(&*self.con, SCIP_LINE_BUFFER_SIZE, self.timeouts.continuation())?;
        let code = match parse_status(&status) {
            Ok(code) => code,
            Err(e) => {
                self.drain_block();
                return Err(e);
            }
        };
        trace!("{:?} answered status {}", expected_echo, code);

        let mut lines = Vec::new();
        loop {
            match read_line(&*self.con, SCIP_LINE_BUFFER_SIZE, self.timeouts.continuation()) {
                Ok(line) if line.is_empty() => break,
                Ok(line) => {
                    if collect_lines {
                        lines.push(String::from_utf8_lossy(&line).into_owned());
                    }
                }
                Err(Error::Timeout) => break,
                Err(e) => return Err(e),
            }
        }

        if expected.contains(&code) {
            Ok(Response { code, lines })
        } else {
            Err(Error::UnexpectedStatus {
                command: String::from_utf8_lossy(expected_echo).into_owned(),
                code,
            })
        }
    }

    /// Reads and drops lines until the blank line that ends a reply block.
    fn drain_block(&self) {
        while let Ok(line) = read_line(&*self.con, SCIP_LINE_BUFFER_SIZE, self.timeouts.continuation()) {
            if line.is_empty() {
                break;
            }
        }
    }

    /// Turns the laser on (`BM`) or off (`QT`).
    ///
    /// Does nothing if the laser is already in the requested state, unless
    /// `force` is set. While a continuous capture streams, `QT` is only
    /// written: the capture worker reads the echo and ends the stream.
    pub fn set_laser_output(&self, on: bool, force: bool) -> Result<()> {
        let (laser, streaming, qt_in_flight) = {
            let state = lock(&self.state);
            (state.laser, state.streaming, state.qt_in_flight)
        };
        let target = if on { LaserState::On } else { LaserState::Off };
        if laser == target && !force {
            return Ok(());
        }
        if !on && qt_in_flight {
            trace!("QT already in flight");
            return Ok(());
        }

        if on {
            // 02: the laser was already on.
            self.response(SCIP_CMD_LASER_ON, &[SCIP_STATUS_OK, 0x02], false)
                .inspect_err(|e| warn!("BM fail: {}", e))?;
            self.set_laser(LaserState::On);
        } else if streaming {
            trace!("Sending QT without waiting for the echo");
            self.write_all(SCIP_CMD_QUIT)?;
            lock(&self.state).qt_in_flight = true;
        } else {
            self.response(SCIP_CMD_QUIT, &[SCIP_STATUS_OK], false)?;
            let mut state = lock(&self.state);
            state.laser = LaserState::Off;
            state.qt_in_flight = true;
        }
        Ok(())
    }

    fn write_all(&self, command: &str) -> Result<()> {
        let sent = self.con.send(command.as_bytes()).map_err(|e| self.record(e))?;
        if sent != command.len() {
            return Err(self.record(Error::SendFailure {
                expected: command.len(),
                sent,
            }));
        }
        Ok(())
    }

    /// Writes a raw command. Capture stream commands mark the laser on.
    pub fn send(&self, command: &str) -> Result<()> {
        trace!("Sending raw command {:?}", command);
        {
            let mut state = lock(&self.state);
            if is_continuous_command(command.as_bytes()) {
                state.laser = LaserState::On;
                state.streaming = true;
            }
            if command != SCIP_CMD_QUIT {
                state.qt_in_flight = false;
            }
        }
        self.write_all(command)
    }

    /// Reads raw bytes from the connection.
    pub fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.con.receive(buf, timeout).map_err(|e| self.record(e))
    }

    /// Discards whatever the sensor is still sending.
    pub fn drain(&self) -> usize {
        self.con.clear();
        skip(&*self.con, self.timeouts.total(), self.timeouts.continuation())
    }

    /// Marks the end of a continuous capture the sensor finished on its own.
    pub fn finish_stream(&self) {
        let mut state = lock(&self.state);
        state.streaming = false;
        state.laser = LaserState::Off;
    }

    /// Reads one capture reply block.
    ///
    /// The block type tells what arrived: scan data (`GD`..`ME`), the
    /// acknowledgement of a stream request ([`CaptureType::MxReply`]) or the
    /// end of a stream ([`CaptureType::Quit`]). Unknown echo lines are
    /// skipped. A data line with a bad checksum discards the whole block and
    /// fails with [`Error::ChecksumMismatch`]; silence fails with
    /// [`Error::Timeout`].
    pub fn receive_capture_data(&self) -> Result<ScanFrame> {
        self.read_capture_block().map_err(|e| self.record(e))
    }

    fn read_capture_block(&self) -> Result<ScanFrame> {
        let mut settings = CaptureSettings::default();
        let mut parser: Option<RangeDataParser> = None;
        let mut timeout = self.timeouts.first_line();
        let mut line_count = 0;

        loop {
            let line = match read_line(&*self.con, SCIP_LINE_BUFFER_SIZE, timeout) {
                Ok(line) if line.is_empty() => break,
                Ok(line) => line,
                Err(Error::Timeout) if line_count > 0 => {
                    warn!(
                        "{:?} block cut off after {} lines",
                        settings.capture_type, line_count
                    );
                    return Err(Error::Timeout);
                }
                Err(e) => return Err(e),
            };
            timeout = self.timeouts.continuation();

            if line_count == 0 {
                match parse_echo(&line) {
                    Ok(Echo::Capture(parsed)) => {
                        if parsed.capture_type.is_continuous() {
                            self.set_laser(LaserState::On);
                        }
                        settings = parsed;
                    }
                    Ok(Echo::Quit) => {
                        trace!("Capture stream ended by QT");
                        settings.capture_type = CaptureType::Quit;
                        settings.remain_times = 0;
                        let mut state = lock(&self.state);
                        state.laser = LaserState::Off;
                        state.streaming = false;
                    }
                    Ok(Echo::Unknown) => {
                        warn!("Skipping unexpected line {:?}", String::from_utf8_lossy(&line));
                        continue;
                    }
                    Err(e) => {
                        self.drain_block();
                        return Err(e);
                    }
                }
                line_count += 1;
                continue;
            }

            let body = match verified_body(&line) {
                Some(body) => body,
                None => {
                    let line = String::from_utf8_lossy(&line).into_owned();
                    warn!("checksum error: {}", line);
                    self.drain_block();
                    return Err(Error::ChecksumMismatch { line });
                }
            };

            match line_count {
                1 => {
                    settings.error_code = parse_capture_status(&line).unwrap_or(-1);
                    if body == SCIP_STATUS_LASER_OFF {
                        debug!("Sensor reports the laser off");
                        self.set_laser(LaserState::Off);
                    }
                    if body == SCIP_STATUS_DESYNC {
                        warn!("Host and sensor out of sync, discarding stray replies");
                        skip(&*self.con, self.timeouts.total(), timeout);
                        return Err(Error::ProtocolError {
                            description: String::from("host and sensor out of sync"),
                        });
                    }
                    if settings.error_code == SCIP_STATUS_OK && settings.capture_type.is_continuous() {
                        settings.capture_type = CaptureType::MxReply;
                    }
                }
                2 => {
                    settings.timestamp = decode(&body[..body.len().min(4)]);
                }
                _ => parser
                    .get_or_insert_with(|| RangeDataParser::new(&settings))
                    .push_line(body),
            }
            line_count += 1;
        }

        if line_count == 0 {
            return Err(Error::Timeout);
        }

        let ranges = if settings.capture_type.carries_data() {
            let parser = parser.unwrap_or_else(|| RangeDataParser::new(&settings));
            if settings.has_scan_data() && !parser.is_complete() {
                warn!("Incomplete {:?} block", settings.capture_type);
                return Err(Error::ProtocolError {
                    description: format!("incomplete {:?} block", settings.capture_type),
                });
            }
            parser.finish()
        } else {
            Vec::new()
        };
        trace!(
            "Received {:?} block with {} samples",
            settings.capture_type,
            ranges.len()
        );
        Ok(ScanFrame {
            ranges,
            intensities: Vec::new(),
            timestamp: settings.timestamp,
            settings,
        })
    }

    /// Queries `PP`.
    pub fn load_parameter(&self) -> Result<DeviceParameters> {
        let response = self
            .response(SCIP_CMD_PARAMETERS, &[SCIP_STATUS_OK], true)
            .inspect_err(|e| error!("PP fail: {}", e))?;
        let lines = response.lines;
        if lines.len() != SCIP_PARAMETER_LINES {
            error!("Invalid PP response: {} lines", lines.len());
            return Err(self.record(Error::MalformedParameterResponse { lines: lines.len() }));
        }

        let field = |i: usize| -> i64 {
            lines[i]
                .as_bytes()
                .get(5..)
                .map(|value| parse_decimal(value) as i64)
                .unwrap_or(0)
        };
        // "MODL:" tag in front, ";" and checksum behind.
        let modl = &lines[0];
        let model = if modl.len() > 5 + 2 {
            modl.get(5..modl.len() - 2).unwrap_or_default()
        } else {
            modl.get(5..).unwrap_or_default()
        };

        let parameters = DeviceParameters {
            model: model.to_owned(),
            distance_min: field(1),
            distance_max: field(2),
            area_total: field(3) as i32,
            area_min: field(4) as i32,
            area_max: field(5) as i32,
            area_front: field(6) as i32,
            scan_rpm: field(7) as i32,
        };
        debug!("Loaded parameters: {:?}", parameters);
        Ok(parameters)
    }

    /// Queries `VV`.
    pub fn version_lines(&self) -> Result<Vec<String>> {
        Ok(self
            .response(SCIP_CMD_VERSION, &[SCIP_STATUS_OK], true)?
            .lines)
    }

    /// Enters (`TM0`) or leaves (`TM2`) the raw timestamp mode. The laser is
    /// off in either case.
    pub fn set_raw_timestamp_mode(&self, on: bool) -> Result<()> {
        let command = if on {
            SCIP_CMD_TIMESTAMP_ENTER
        } else {
            SCIP_CMD_TIMESTAMP_LEAVE
        };
        self.response(command, &[SCIP_STATUS_OK], false)
            .inspect_err(|e| warn!("{} fail: {}", command.trim_end(), e))?;
        self.set_laser(LaserState::Off);
        Ok(())
    }

    /// Reads the device clock with `TM1`. Only valid in raw timestamp mode.
    pub fn raw_timestamp(&self) -> Result<i64> {
        let response = self.response(SCIP_CMD_TIMESTAMP_READ, &[SCIP_STATUS_OK], true)?;
        match response.lines.as_slice() {
            [line] if line.len() == 5 => Ok(decode(&line.as_bytes()[..4])),
            lines => Err(self.record(Error::ProtocolError {
                description: format!("response mismatch: {:?}", lines),
            })),
        }
    }

    /// Sends `RB` twice, checking each echo, as the sensor requires.
    pub fn reboot(&self) -> Result<()> {
        for _ in 0..2 {
            self.send(SCIP_CMD_REBOOT)?;
            let echo = read_line(&*self.con, SCIP_LINE_BUFFER_SIZE, URG_REBOOT_TIMEOUT)
                .map_err(|e| self.record(e))?;
            if echo != SCIP_CMD_REBOOT.trim_end().as_bytes() {
                return Err(self.record(Error::EchoMismatch {
                    expected: String::from("RB"),
                    actual: String::from_utf8_lossy(&echo).into_owned(),
                }));
            }
            self.drain_block();
        }
        Ok(())
    }
}
