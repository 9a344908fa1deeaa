//! # URG Driver
//!
//! `urg` is a driver for Hokuyo URG series laser range finders speaking the
//! SCIP 2.0 protocol over a serial port or TCP. It negotiates the baud rate,
//! reads the sensor parameters and captures scans either one at a time
//! (`GD`/`GS`) or as a continuous stream (`MD`/`MS`/`ME`) collected by a
//! background worker.
//!
//! ```no_run
//! # fn main() -> urg::Result<()> {
//! use urg::{CaptureMode, UrgConfig, UrgDevice};
//!
//! let mut device = UrgDevice::new(UrgConfig::default())?;
//! device.connect("/dev/ttyACM0", 115200)?;
//! device.set_capture_mode(CaptureMode::Auto)?;
//! loop {
//!     if let Some(scan) = device.capture()? {
//!         println!("{} ranges at {} ms", scan.ranges.len(), scan.timestamp);
//!     }
//! #   break;
//! }
//! device.stop()?;
//! # Ok(())
//! # }
//! ```

extern crate log;

pub mod base;
mod capture;
mod checksum;
mod cmds;
pub mod config;
mod internals;
mod line_reader;
pub mod monitor;
mod parsers;
pub mod protocol;
mod scip;
#[cfg(test)]
mod testing;
pub mod types;
pub mod utils;

pub use crate::base::{Connection, Error, MockConnection, Result, TcpConnection};
#[cfg(feature = "serial")]
pub use crate::base::SerialConnection;
pub use crate::capture::{
    AutoCapture, CaptureContext, CaptureEngine, CaptureRequest, CaptureStrategy, CaptureWorker,
    IntensityCapture, ManualCapture, ScanRing, TimestampUnwrapper,
};
pub use crate::config::{MonitorMode, TimeoutConfig, UrgConfig};
pub use crate::monitor::MonitoredConnection;
pub use crate::scip::{Response, ScipSession};
pub use crate::types::{CaptureMode, DataEncoding, DeviceParameters, LaserState, ScanFrame};

use log::{debug, error, trace, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A URG sensor: protocol session, capture strategy and sensor parameters.
///
/// Every capture setter stops a running capture and drops buffered scans
/// before it changes anything.
#[derive(Debug)]
pub struct UrgDevice {
    session: ScipSession,
    engine: CaptureEngine,
    parameters: DeviceParameters,
    config: UrgConfig,
    epoch: Instant,
    timestamp_offset: i64,
    recent_timestamp: i64,
    error_message: String,
}

impl UrgDevice {
    /// Creates a device on a serial port, recorded or replayed per
    /// `config.monitor`.
    ///
    /// # Example
    /// ```no_run
    /// # use urg::{UrgConfig, UrgDevice};
    /// # fn main() -> urg::Result<()> {
    /// let config = UrgConfig::load("urg.toml")?;
    /// let mut device = UrgDevice::new(config)?;
    /// device.connect("COM3", 115200)?;
    /// # Ok(())
    /// # }
    /// ```
    #[cfg(feature = "serial")]
    pub fn new(config: UrgConfig) -> Result<UrgDevice> {
        trace!("Creating new UrgDevice on a serial port");
        let serial = SerialConnection::with_poll_interval(config.poll_interval());
        let con = MonitoredConnection::new(serial, &config.monitor)?;
        Ok(UrgDevice::with_connection(Arc::new(con), config))
    }

    /// Creates a device reached over TCP. `connect` then takes a
    /// `host:port` address.
    pub fn tcp(config: UrgConfig) -> Result<UrgDevice> {
        trace!("Creating new UrgDevice over TCP");
        let tcp = TcpConnection::with_poll_interval(config.poll_interval());
        let con = MonitoredConnection::new(tcp, &config.monitor)?;
        Ok(UrgDevice::with_connection(Arc::new(con), config))
    }

    /// Creates a device on an arbitrary connection. `config.monitor` is not
    /// applied; wrap the connection in a [`MonitoredConnection`] for that.
    pub fn with_connection(con: Arc<dyn Connection>, config: UrgConfig) -> UrgDevice {
        trace!("Creating new UrgDevice");
        UrgDevice {
            session: ScipSession::new(con, config.timeouts.clone()),
            engine: CaptureEngine::new(config.max_retry_times, config.captures_size),
            parameters: DeviceParameters::default(),
            config,
            epoch: Instant::now(),
            timestamp_offset: 0,
            recent_timestamp: 0,
            error_message: String::from("no error."),
        }
    }

    pub fn config(&self) -> &UrgConfig {
        &self.config
    }

    pub fn session(&self) -> &ScipSession {
        &self.session
    }

    fn record(&mut self, e: Error) -> Error {
        self.error_message = e.to_string();
        e
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(self.record(Error::NotConnected))
        }
    }

    fn ticks(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    /// Opens `device`, negotiates `baudrate` and loads the sensor parameters.
    ///
    /// The capture range is reset to the whole measurement area.
    pub fn connect(&mut self, device: &str, baudrate: u32) -> Result<()> {
        debug!("Connecting to {} at {} baud", device, baudrate);
        self.disconnect();

        if let Err(e) = self.session.connect(device, baudrate) {
            error!("Connect to {} fail: {}", device, e);
            return Err(self.record(e));
        }
        match self.session.load_parameter() {
            Ok(parameters) => self.set_parameter(parameters),
            Err(e) => {
                self.session.connection().disconnect();
                return Err(self.record(e));
            }
        }
        self.timestamp_offset = 0;
        Ok(())
    }

    /// Stops any capture and closes the connection.
    pub fn disconnect(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.engine.stop(&self.session) {
                warn!("Stop on disconnect fail: {}", e);
            }
            self.session.connection().disconnect();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.connection().is_connected()
    }

    /// Returns the next scan.
    ///
    /// In [`CaptureMode::Manual`] this blocks for one `GD`/`GS` exchange. In
    /// the continuous modes the first call starts the stream, and every call
    /// returns the oldest buffered scan or `None` if there is none yet. After
    /// the worker gave up, calls fail with [`Error::RetryBudgetExhausted`]
    /// until [`UrgDevice::stop`].
    ///
    /// Timestamps are in the time base set by [`UrgDevice::set_timestamp`].
    pub fn capture(&mut self) -> Result<Option<ScanFrame>> {
        self.ensure_connected()?;
        match self.engine.capture(&self.session, &self.parameters) {
            Ok(Some(mut frame)) => {
                frame.timestamp -= self.timestamp_offset;
                self.recent_timestamp = frame.timestamp;
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(self.record(e)),
        }
    }

    /// Like [`UrgDevice::capture`], for [`CaptureMode::Intensity`] only.
    pub fn capture_with_intensity(&mut self) -> Result<Option<ScanFrame>> {
        if self.engine.mode() != CaptureMode::Intensity {
            return Err(self.record(Error::Unsupported(String::from(
                "intensity needs CaptureMode::Intensity",
            ))));
        }
        self.capture()
    }

    /// Ends the running capture, waits for the worker and discards what the
    /// sensor still sends.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        trace!("Stopping capture");
        self.engine
            .stop(&self.session)
            .map_err(|e| self.record(e))
    }

    pub fn set_capture_mode(&mut self, mode: CaptureMode) -> Result<()> {
        self.stop()?;
        debug!("Capture mode {:?}", mode);
        self.engine.set_mode(mode);
        Ok(())
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.engine.mode()
    }

    /// Restricts captures to the indices `begin..=end`.
    pub fn set_capture_range(&mut self, begin: usize, end: usize) -> Result<()> {
        if begin > end {
            return Err(self.record(Error::InvalidArgument(format!(
                "capture range {}..={} is empty",
                begin, end
            ))));
        }
        self.stop()?;
        let request = self.engine.request_mut();
        request.begin = begin;
        request.end = end;
        Ok(())
    }

    /// Groups `skip_lines` neighbouring indices into one measurement.
    pub fn set_capture_skip_lines(&mut self, skip_lines: usize) -> Result<()> {
        self.stop()?;
        self.engine.request_mut().skip_lines = skip_lines.max(1);
        Ok(())
    }

    pub fn set_capture_frame_interval(&mut self, interval: usize) -> Result<()> {
        self.stop()?;
        self.engine.request_mut().frame_interval = interval;
        Ok(())
    }

    /// Number of scans a continuous capture delivers, `0` for unbounded.
    pub fn set_capture_times(&mut self, times: usize) -> Result<()> {
        self.stop()?;
        self.engine.request_mut().capture_times = times;
        Ok(())
    }

    pub fn set_capture_encoding(&mut self, encoding: DataEncoding) -> Result<()> {
        self.stop()?;
        self.engine.request_mut().encoding = encoding;
        Ok(())
    }

    pub fn capture_request(&self) -> &CaptureRequest {
        self.engine.request()
    }

    /// Scans the running capture still delivers, `usize::MAX` if it is
    /// unbounded.
    pub fn remain_capture_times(&self) -> usize {
        self.engine.remain_capture_times()
    }

    /// Number of scans buffered in the continuous modes.
    pub fn set_captures_size(&mut self, size: usize) -> Result<()> {
        self.stop()?;
        self.engine.set_captures_size(size);
        Ok(())
    }

    pub fn captures_size(&self) -> usize {
        self.engine.captures_size()
    }

    /// Consecutive bad scans a continuous capture tolerates.
    pub fn set_retry_times(&mut self, times: usize) -> Result<()> {
        self.stop()?;
        self.engine.set_max_retry_times(times);
        Ok(())
    }

    /// Switches the laser.
    ///
    /// While a continuous capture streams the laser is already on and only
    /// the capture worker reads from the sensor, so `on` does nothing and
    /// `off` just writes `QT`, which ends the stream.
    pub fn set_laser_output(&mut self, on: bool) -> Result<()> {
        self.ensure_connected()?;
        if on && self.session.is_streaming() {
            trace!("Laser already on for the running capture");
            return Ok(());
        }
        self.session
            .set_laser_output(on, true)
            .map_err(|e| self.record(e))
    }

    /// Aligns scan timestamps with the caller's clock.
    ///
    /// `host_ticks` is the caller's current time in milliseconds. The sensor
    /// clock is read in raw timestamp mode and the offset accounts for half
    /// of the measured round trip, or of `force_delay` if given. Returns the
    /// round trip.
    pub fn set_timestamp(&mut self, host_ticks: i64, force_delay: Option<Duration>) -> Result<Duration> {
        self.ensure_connected()?;
        self.stop()?;

        let prepare_ticks = self.ticks();
        self.session
            .set_raw_timestamp_mode(true)
            .map_err(|e| self.record(e))?;

        let first_ticks = self.ticks();
        let read = self.session.raw_timestamp();
        let mut delay = Duration::from_millis((self.ticks() - first_ticks) as u64);
        match read {
            Ok(urg_timestamp) => {
                if let Some(forced) = force_delay {
                    delay = forced;
                }
                let half = delay.as_millis() as i64 / 2;
                self.timestamp_offset =
                    (urg_timestamp + half) - (host_ticks + (first_ticks - prepare_ticks));
                debug!(
                    "Timestamp offset {} ms, round trip {:?}",
                    self.timestamp_offset, delay
                );
            }
            Err(e) => warn!("TM1 fail: {}", e),
        }

        self.session
            .set_raw_timestamp_mode(false)
            .map_err(|e| self.record(e))?;
        Ok(delay)
    }

    /// Timestamp of the scan most recently returned by `capture`.
    pub fn recent_timestamp(&self) -> i64 {
        self.recent_timestamp
    }

    /// Queries the parameters again and makes them current.
    pub fn load_parameter(&mut self) -> Result<DeviceParameters> {
        self.ensure_connected()?;
        self.stop()?;
        let parameters = self
            .session
            .load_parameter()
            .map_err(|e| self.record(e))?;
        self.set_parameter(parameters.clone());
        Ok(parameters)
    }

    pub fn parameter(&self) -> &DeviceParameters {
        &self.parameters
    }

    /// Replaces the parameters and resets the capture range to their
    /// measurement area.
    pub fn set_parameter(&mut self, parameters: DeviceParameters) {
        let request = self.engine.request_mut();
        request.begin = parameters.area_min.max(0) as usize;
        request.end = parameters.area_max.max(0) as usize;
        self.parameters = parameters;
    }

    /// `VV` reply lines: vendor, product, firmware, protocol and serial number.
    pub fn version_lines(&mut self) -> Result<Vec<String>> {
        self.ensure_connected()?;
        self.stop()?;
        self.session.version_lines().map_err(|e| self.record(e))
    }

    /// Restarts the sensor and closes the connection.
    pub fn reboot(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.stop()?;
        self.session
            .set_laser_output(false, true)
            .map_err(|e| self.record(e))?;
        self.session.reboot().map_err(|e| self.record(e))?;
        debug!("Sensor rebooting");
        self.disconnect();
        Ok(())
    }

    pub fn index_to_rad(&self, index: i32) -> f64 {
        self.parameters.index_to_rad(index)
    }

    pub fn rad_to_index(&self, radian: f64) -> i32 {
        self.parameters.rad_to_index(radian)
    }

    pub fn min_distance(&self) -> i64 {
        self.parameters.distance_min
    }

    pub fn max_distance(&self) -> i64 {
        self.parameters.distance_max
    }

    pub fn max_scan_lines(&self) -> usize {
        self.parameters.max_scan_lines()
    }

    pub fn scan_msec(&self) -> i32 {
        self.parameters.scan_msec()
    }

    /// Message of the most recent failure.
    pub fn what(&self) -> &str {
        &self.error_message
    }
}

impl Drop for UrgDevice {
    fn drop(&mut self) {
        self.disconnect();
    }
}
