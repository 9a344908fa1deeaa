//! Capture strategies: one-shot `GD`/`GS` requests and `MD`/`MS`/`ME`
//! streams collected by a background worker.

use crate::base::{lock, Error, Result};
use crate::cmds::*;
use crate::internals::*;
use crate::protocol::{get_distance_command, legacy_intensity_command, measure_command};
use crate::scip::ScipSession;
use crate::types::{CaptureMode, CaptureType, DataEncoding, DeviceParameters, ScanFrame};
use crate::utils::{split_interleaved_intensity, split_paired_intensity};
use log::{debug, error, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// What to measure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    /// First index.
    pub begin: usize,
    /// Last index, inclusive.
    pub end: usize,
    /// Angular thinning; each measured value covers this many indices.
    pub skip_lines: usize,
    /// Scans the sensor skips between two reported scans.
    pub frame_interval: usize,
    /// Scans to capture in continuous modes, `0` for unbounded.
    pub capture_times: usize,
    pub encoding: DataEncoding,
}

impl Default for CaptureRequest {
    fn default() -> CaptureRequest {
        CaptureRequest {
            begin: 0,
            end: 0,
            skip_lines: 1,
            frame_interval: 0,
            capture_times: URG_MD_SCANS_UNBOUNDED,
            encoding: DataEncoding::Standard,
        }
    }
}

/// Everything a strategy needs for one [`CaptureStrategy::capture`] call.
#[derive(Debug, Clone, Copy)]
pub struct CaptureContext<'a> {
    pub session: &'a ScipSession,
    pub request: &'a CaptureRequest,
    pub parameters: &'a DeviceParameters,
    pub max_retry_times: usize,
}

/// A way of obtaining scans from the sensor.
pub trait CaptureStrategy: Send + fmt::Debug {
    fn mode(&self) -> CaptureMode;

    /// Builds the request command, terminator included.
    fn create_command(&self, request: &CaptureRequest, parameters: &DeviceParameters) -> Result<String>;

    /// Returns the next scan, or `None` if none is available yet.
    fn capture(&mut self, ctx: &CaptureContext<'_>) -> Result<Option<ScanFrame>>;

    /// Ends any running acquisition and drops buffered scans.
    fn stop(&mut self, session: &ScipSession) -> Result<()>;

    fn set_captures_size(&mut self, size: usize);

    fn captures_size(&self) -> usize;

    /// Scans still expected from the current request, `usize::MAX` while an
    /// unbounded capture runs.
    fn remain_capture_times(&self) -> usize;
}

/// Bounded FIFO of scans. A push beyond the capacity evicts the oldest scan.
#[derive(Debug, Clone)]
pub struct ScanRing {
    frames: VecDeque<ScanFrame>,
    capacity: usize,
}

impl ScanRing {
    pub fn new(capacity: usize) -> ScanRing {
        let capacity = capacity.max(1);
        ScanRing {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: ScanFrame) {
        while self.frames.len() >= self.capacity {
            trace!("Ring full, dropping oldest scan");
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn pop(&mut self) -> Option<ScanFrame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity, dropping the oldest scans that no longer fit.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Extends the 24-bit device clock to a monotonic counter.
#[derive(Debug, Clone, Default)]
pub struct TimestampUnwrapper {
    previous: Option<i64>,
    base: i64,
}

impl TimestampUnwrapper {
    pub fn new() -> TimestampUnwrapper {
        TimestampUnwrapper::default()
    }

    pub fn unwrap(&mut self, raw: i64) -> i64 {
        if let Some(previous) = self.previous {
            if raw < previous {
                debug!("Timestamp wrapped from {} to {}", previous, raw);
                self.base += URG_TIMESTAMP_WRAP;
            }
        }
        self.previous = Some(raw);
        raw + self.base
    }
}

/// One-shot `GD`/`GS` requests. Every call blocks for one reply.
#[derive(Debug)]
pub struct ManualCapture {
    captures_size: usize,
}

impl ManualCapture {
    pub fn new() -> ManualCapture {
        ManualCapture { captures_size: 1 }
    }
}

impl Default for ManualCapture {
    fn default() -> ManualCapture {
        ManualCapture::new()
    }
}

impl CaptureStrategy for ManualCapture {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Manual
    }

    fn create_command(&self, request: &CaptureRequest, _parameters: &DeviceParameters) -> Result<String> {
        get_distance_command(request.encoding, request.begin, request.end, request.skip_lines)
    }

    fn capture(&mut self, ctx: &CaptureContext<'_>) -> Result<Option<ScanFrame>> {
        let command = self.create_command(ctx.request, ctx.parameters)?;
        ctx.session.set_laser_output(true, false)?;
        ctx.session.send(&command)?;

        let frame = ctx.session.receive_capture_data()?;
        if !frame.settings.capture_type.carries_data() {
            return Err(Error::ProtocolError {
                description: format!("unexpected {:?} reply", frame.settings.capture_type),
            });
        }
        if frame.settings.error_code != SCIP_STATUS_OK {
            return Err(Error::UnexpectedStatus {
                command: command[..2].to_owned(),
                code: frame.settings.error_code,
            });
        }
        Ok(Some(frame))
    }

    fn stop(&mut self, session: &ScipSession) -> Result<()> {
        session.set_laser_output(false, false)
    }

    fn set_captures_size(&mut self, size: usize) {
        self.captures_size = size.max(1);
    }

    fn captures_size(&self) -> usize {
        self.captures_size
    }

    fn remain_capture_times(&self) -> usize {
        0
    }
}

/// How the samples of a streamed block are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameLayout {
    Ranges,
    /// `ME`: distance then intensity per step.
    Interleaved,
    /// `MD..FF`: distance and intensity on alternating indices.
    Paired,
}

impl FrameLayout {
    fn apply(self, mut frame: ScanFrame, distance_min: i64) -> ScanFrame {
        match self {
            FrameLayout::Ranges => {}
            FrameLayout::Interleaved => {
                let (mut ranges, mut intensities) = split_interleaved_intensity(
                    &frame.ranges,
                    frame.settings.capture_first,
                    frame.settings.skip_lines,
                    distance_min,
                );
                // The last step may reach past the requested range.
                ranges.truncate(frame.settings.capture_last);
                intensities.truncate(frame.settings.capture_last);
                frame.ranges = ranges;
                frame.intensities = intensities;
            }
            FrameLayout::Paired => {
                frame.intensities =
                    split_paired_intensity(&mut frame.ranges, frame.settings.capture_first, distance_min);
            }
        }
        frame
    }
}

#[derive(Debug)]
struct StreamState {
    ring: ScanRing,
    retry_times: usize,
    failed: bool,
    remain_times: usize,
    unwrapper: TimestampUnwrapper,
}

impl StreamState {
    /// Counts one bad or missing scan. Returns `false` once the budget is spent.
    fn retry(&mut self, max_retry_times: usize) -> bool {
        self.retry_times += 1;
        if self.retry_times > max_retry_times {
            error!("Giving up capture after {} retries", self.retry_times);
            self.failed = true;
            false
        } else {
            warn!("Capture retry {}/{}", self.retry_times, max_retry_times);
            true
        }
    }
}

struct StreamJob {
    session: ScipSession,
    command: String,
    capture_times: usize,
    max_retry_times: usize,
    layout: FrameLayout,
    distance_min: i64,
    shared: Arc<Mutex<StreamState>>,
    cancel: Arc<AtomicBool>,
}

impl StreamJob {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn run(self) {
        trace!("Capture worker started for {:?}", self.command.trim_end());
        // Above the per-command limit the device streams until QT and the
        // host does the counting.
        let mut host_remaining = if self.capture_times > URG_MD_SCANS_MAX {
            self.capture_times
        } else {
            0
        };
        let device_counted = self.capture_times != URG_MD_SCANS_UNBOUNDED && host_remaining == 0;
        let mut quitting = false;

        loop {
            match self.session.receive_capture_data() {
                Ok(frame) => match frame.settings.capture_type {
                    CaptureType::Quit => {
                        trace!("Capture worker saw QT");
                        break;
                    }
                    CaptureType::MxReply => continue,
                    t if t.is_continuous() => {
                        if self.cancelled() {
                            trace!("Discarding scan after stop");
                            break;
                        }
                        if quitting {
                            continue;
                        }
                        if !frame.settings.has_scan_data() {
                            warn!(
                                "{:?} block with status {}, not a scan",
                                t, frame.settings.error_code
                            );
                            if !lock(&self.shared).retry(self.max_retry_times) {
                                break;
                            }
                            continue;
                        }
                        let remain = frame.settings.remain_times;
                        {
                            let mut state = lock(&self.shared);
                            state.retry_times = 0;
                            let mut frame = self.layout.apply(frame, self.distance_min);
                            frame.timestamp = state.unwrapper.unwrap(frame.timestamp);
                            state.ring.push(frame);
                            if device_counted {
                                state.remain_times = remain;
                            } else if host_remaining > 0 {
                                host_remaining -= 1;
                                state.remain_times = host_remaining;
                            }
                        }
                        if device_counted && remain == 0 {
                            trace!("Sensor finished the requested scans");
                            self.session.finish_stream();
                            break;
                        }
                        if self.capture_times > URG_MD_SCANS_MAX && host_remaining == 0 {
                            trace!("Requested scans received, sending QT");
                            quitting = true;
                            if let Err(e) = self.session.set_laser_output(false, false) {
                                warn!("QT fail: {}", e);
                                break;
                            }
                        }
                    }
                    t => {
                        warn!("Unexpected {:?} block while streaming", t);
                        if !lock(&self.shared).retry(self.max_retry_times) {
                            break;
                        }
                    }
                },
                Err(Error::Timeout) => {
                    if quitting || self.cancelled() {
                        break;
                    }
                    if !lock(&self.shared).retry(self.max_retry_times) {
                        break;
                    }
                    warn!("No scan in time, sending {:?} again", self.command.trim_end());
                    if let Err(e) = self.session.send(&self.command) {
                        error!("Capture command fail: {}", e);
                        lock(&self.shared).failed = true;
                        break;
                    }
                }
                Err(Error::ChecksumMismatch { .. })
                | Err(Error::ProtocolError { .. })
                | Err(Error::EchoMismatch { .. }) => {
                    if !lock(&self.shared).retry(self.max_retry_times) {
                        break;
                    }
                }
                Err(e) => {
                    error!("Capture worker stopped: {}", e);
                    lock(&self.shared).failed = true;
                    break;
                }
            }
        }
        trace!("Capture worker exiting");
    }
}

/// Background thread reading a capture stream into the shared ring.
#[derive(Debug)]
pub struct CaptureWorker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl CaptureWorker {
    fn spawn(job: StreamJob) -> Result<CaptureWorker> {
        let cancel = job.cancel.clone();
        let handle = thread::Builder::new()
            .name("urg-capture".into())
            .spawn(move || job.run())?;
        Ok(CaptureWorker { cancel, handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Makes the worker drop further scans and exit on the next silence.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("Capture worker panicked");
        }
    }
}

/// `MD`/`MS`/`ME` stream driven by a [`CaptureWorker`].
#[derive(Debug)]
struct StreamCapture {
    layout: FrameLayout,
    shared: Arc<Mutex<StreamState>>,
    worker: Option<CaptureWorker>,
}

impl StreamCapture {
    fn new(layout: FrameLayout) -> StreamCapture {
        StreamCapture {
            layout,
            shared: Arc::new(Mutex::new(StreamState {
                ring: ScanRing::new(1),
                retry_times: 0,
                failed: false,
                remain_times: 0,
                unwrapper: TimestampUnwrapper::new(),
            })),
            worker: None,
        }
    }

    fn poll(&self) -> Result<Option<ScanFrame>> {
        let mut state = lock(&self.shared);
        if state.failed {
            return Err(Error::RetryBudgetExhausted {
                retries: state.retry_times,
            });
        }
        Ok(state.ring.pop())
    }

    fn capture(&mut self, ctx: &CaptureContext<'_>, command: String) -> Result<Option<ScanFrame>> {
        if let Some(frame) = self.poll()? {
            return Ok(Some(frame));
        }
        if self.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return Ok(None);
        }
        if let Some(worker) = self.worker.take() {
            worker.join();
            // The worker may have pushed its last scan after the poll above.
            if let Some(frame) = self.poll()? {
                return Ok(Some(frame));
            }
        }

        debug!("Starting capture with {:?}", command.trim_end());
        {
            let mut state = lock(&self.shared);
            state.retry_times = 0;
            state.remain_times = if ctx.request.capture_times == URG_MD_SCANS_UNBOUNDED {
                usize::MAX
            } else {
                ctx.request.capture_times
            };
        }
        ctx.session.send(&command)?;
        self.worker = Some(CaptureWorker::spawn(StreamJob {
            session: ctx.session.clone(),
            command,
            capture_times: ctx.request.capture_times,
            max_retry_times: ctx.max_retry_times,
            layout: self.layout,
            distance_min: ctx.parameters.distance_min,
            shared: self.shared.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
        })?);
        Ok(None)
    }

    fn stop(&mut self, session: &ScipSession) -> Result<()> {
        let mut result = Ok(());
        match self.worker.take() {
            Some(worker) => {
                if !worker.is_finished() {
                    worker.cancel();
                    result = session.set_laser_output(false, true);
                }
                worker.join();
            }
            None => result = session.set_laser_output(false, false),
        }

        if session.is_streaming() {
            if let Err(e) = session.set_laser_output(false, true) {
                warn!("QT fail: {}", e);
            }
        }
        let dropped = session.drain();
        if dropped > 0 {
            trace!("Drained {} bytes after stop", dropped);
        }
        if session.is_streaming() {
            session.finish_stream();
        }

        let mut state = lock(&self.shared);
        state.ring.clear();
        state.retry_times = 0;
        state.failed = false;
        state.remain_times = 0;
        result
    }

    fn set_captures_size(&mut self, size: usize) {
        lock(&self.shared).ring.set_capacity(size);
    }

    fn captures_size(&self) -> usize {
        lock(&self.shared).ring.capacity()
    }

    fn remain_capture_times(&self) -> usize {
        lock(&self.shared).remain_times
    }
}

impl Drop for StreamCapture {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel();
            worker.join();
        }
    }
}

/// Distance streaming with `MD`/`MS`.
#[derive(Debug)]
pub struct AutoCapture {
    stream: StreamCapture,
}

impl AutoCapture {
    pub fn new() -> AutoCapture {
        AutoCapture {
            stream: StreamCapture::new(FrameLayout::Ranges),
        }
    }
}

impl Default for AutoCapture {
    fn default() -> AutoCapture {
        AutoCapture::new()
    }
}

impl CaptureStrategy for AutoCapture {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Auto
    }

    fn create_command(&self, request: &CaptureRequest, _parameters: &DeviceParameters) -> Result<String> {
        let prefix = match request.encoding {
            DataEncoding::Standard => SCIP_CMD_MEASURE_DISTANCE,
            DataEncoding::Short => SCIP_CMD_MEASURE_DISTANCE_SHORT,
        };
        measure_command(
            prefix,
            request.begin,
            request.end,
            request.skip_lines,
            request.frame_interval,
            request.capture_times,
        )
    }

    fn capture(&mut self, ctx: &CaptureContext<'_>) -> Result<Option<ScanFrame>> {
        let command = self.create_command(ctx.request, ctx.parameters)?;
        self.stream.capture(ctx, command)
    }

    fn stop(&mut self, session: &ScipSession) -> Result<()> {
        self.stream.stop(session)
    }

    fn set_captures_size(&mut self, size: usize) {
        self.stream.set_captures_size(size)
    }

    fn captures_size(&self) -> usize {
        self.stream.captures_size()
    }

    fn remain_capture_times(&self) -> usize {
        self.stream.remain_capture_times()
    }
}

/// Distance and intensity streaming.
///
/// Uses `ME`, except on the older models that only know the `MD..FF` form.
#[derive(Debug)]
pub struct IntensityCapture {
    stream: StreamCapture,
}

impl IntensityCapture {
    pub fn new() -> IntensityCapture {
        IntensityCapture {
            stream: StreamCapture::new(FrameLayout::Interleaved),
        }
    }

    fn is_legacy(parameters: &DeviceParameters) -> bool {
        let family = parameters.model_family();
        SCIP_LEGACY_INTENSITY_MODELS.iter().any(|model| *model == family)
    }
}

impl Default for IntensityCapture {
    fn default() -> IntensityCapture {
        IntensityCapture::new()
    }
}

impl CaptureStrategy for IntensityCapture {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Intensity
    }

    fn create_command(&self, request: &CaptureRequest, parameters: &DeviceParameters) -> Result<String> {
        if IntensityCapture::is_legacy(parameters) {
            legacy_intensity_command(
                request.begin,
                request.end,
                request.frame_interval,
                request.capture_times,
            )
        } else {
            measure_command(
                SCIP_CMD_MEASURE_INTENSITY,
                request.begin,
                request.end,
                request.skip_lines,
                request.frame_interval,
                request.capture_times,
            )
        }
    }

    fn capture(&mut self, ctx: &CaptureContext<'_>) -> Result<Option<ScanFrame>> {
        self.stream.layout = if IntensityCapture::is_legacy(ctx.parameters) {
            FrameLayout::Paired
        } else {
            FrameLayout::Interleaved
        };
        let command = self.create_command(ctx.request, ctx.parameters)?;
        self.stream.capture(ctx, command)
    }

    fn stop(&mut self, session: &ScipSession) -> Result<()> {
        self.stream.stop(session)
    }

    fn set_captures_size(&mut self, size: usize) {
        self.stream.set_captures_size(size)
    }

    fn captures_size(&self) -> usize {
        self.stream.captures_size()
    }

    fn remain_capture_times(&self) -> usize {
        self.stream.remain_capture_times()
    }
}

/// Creates the strategy for `mode` with a ring of `captures_size` scans.
pub fn strategy_for(mode: CaptureMode, captures_size: usize) -> Box<dyn CaptureStrategy> {
    let mut strategy: Box<dyn CaptureStrategy> = match mode {
        CaptureMode::Manual => Box::new(ManualCapture::new()),
        CaptureMode::Auto => Box::new(AutoCapture::new()),
        CaptureMode::Intensity => Box::new(IntensityCapture::new()),
    };
    strategy.set_captures_size(captures_size);
    strategy
}

/// Current strategy plus the request it captures.
#[derive(Debug)]
pub struct CaptureEngine {
    strategy: Box<dyn CaptureStrategy>,
    request: CaptureRequest,
    max_retry_times: usize,
}

impl CaptureEngine {
    pub fn new(max_retry_times: usize, captures_size: usize) -> CaptureEngine {
        CaptureEngine {
            strategy: strategy_for(CaptureMode::Manual, captures_size),
            request: CaptureRequest::default(),
            max_retry_times,
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.strategy.mode()
    }

    /// Replaces the strategy. The old one must have been stopped.
    pub fn set_mode(&mut self, mode: CaptureMode) {
        if mode != self.strategy.mode() {
            let size = self.strategy.captures_size();
            self.strategy = strategy_for(mode, size);
        }
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut CaptureRequest {
        &mut self.request
    }

    pub fn max_retry_times(&self) -> usize {
        self.max_retry_times
    }

    pub fn set_max_retry_times(&mut self, times: usize) {
        self.max_retry_times = times;
    }

    pub fn capture(&mut self, session: &ScipSession, parameters: &DeviceParameters) -> Result<Option<ScanFrame>> {
        let ctx = CaptureContext {
            session,
            request: &self.request,
            parameters,
            max_retry_times: self.max_retry_times,
        };
        self.strategy.capture(&ctx)
    }

    pub fn stop(&mut self, session: &ScipSession) -> Result<()> {
        self.strategy.stop(session)
    }

    pub fn set_captures_size(&mut self, size: usize) {
        self.strategy.set_captures_size(size)
    }

    pub fn captures_size(&self) -> usize {
        self.strategy.captures_size()
    }

    pub fn remain_capture_times(&self) -> usize {
        self.strategy.remain_capture_times()
    }
}
