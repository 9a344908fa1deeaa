use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::cmds::{SCIP_STATUS_DATA, SCIP_STATUS_OK};
use crate::internals::{URG_DEFAULT_SCAN_RPM, URG_INVALID_RANGE};

/// What the sensor reported about its laser, as far as the host knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaserState {
    /// No command that fixes the state has been exchanged yet.
    #[default]
    Unknown,
    On,
    Off,
}

/// How [`crate::UrgDevice::capture`] obtains scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// One `GD`/`GS` request per call; the caller blocks for the reply.
    #[default]
    Manual,
    /// `MD`/`MS` streaming collected by a background worker.
    Auto,
    /// `ME` (or legacy `MD..FF`) streaming with distance and intensity.
    Intensity,
}

/// Sample width on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataEncoding {
    /// Three characters per sample (`GD`/`MD`), up to 262143 mm.
    #[default]
    Standard,
    /// Two characters per sample (`GS`/`MS`), up to 4095 mm.
    Short,
}

impl DataEncoding {
    /// Characters per encoded sample.
    pub fn data_byte(self) -> usize {
        match self {
            DataEncoding::Standard => 3,
            DataEncoding::Short => 2,
        }
    }
}

/// Kind of block `receive_capture_data` classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureType {
    #[default]
    Unknown,
    /// `QT` echo: the stream ended and the laser is off.
    Quit,
    GD,
    GS,
    MD,
    MS,
    ME,
    /// Acknowledgement of an `Mx` request; the scan data follows in a later block.
    MxReply,
}

impl CaptureType {
    /// Returns `true` for the streaming commands `MD`, `MS` and `ME`.
    pub fn is_continuous(self) -> bool {
        matches!(self, CaptureType::MD | CaptureType::MS | CaptureType::ME)
    }

    /// Returns `true` if the block carried scan samples.
    pub fn carries_data(self) -> bool {
        matches!(
            self,
            CaptureType::GD | CaptureType::GS | CaptureType::MD | CaptureType::MS | CaptureType::ME
        )
    }
}

/// Per-block metadata parsed from the echo and status lines of a capture reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    pub capture_type: CaptureType,
    /// Status code of the block, `-1` if none was read.
    pub error_code: i32,
    /// Raw 24-bit device timestamp, `-1` if none was read.
    pub timestamp: i64,
    pub capture_first: usize,
    /// One past the last index of the request.
    pub capture_last: usize,
    pub skip_lines: usize,
    pub skip_frames: usize,
    /// Scans the device still has to send. `0` once the stream is over.
    pub remain_times: usize,
    /// Characters per sample.
    pub data_byte: usize,
}

impl CaptureSettings {
    /// Returns `true` if the status announces scan samples: `00` for
    /// `GD`/`GS` and `99` inside a stream.
    pub fn has_scan_data(&self) -> bool {
        match self.capture_type {
            CaptureType::GD | CaptureType::GS => self.error_code == SCIP_STATUS_OK,
            t if t.is_continuous() => self.error_code == SCIP_STATUS_DATA,
            _ => false,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> CaptureSettings {
        CaptureSettings {
            capture_type: CaptureType::Unknown,
            error_code: -1,
            timestamp: -1,
            capture_first: 0,
            capture_last: 0,
            skip_lines: 1,
            skip_frames: 0,
            remain_times: 0,
            data_byte: 3,
        }
    }
}

/// One decoded scan.
///
/// `ranges` holds one value per angular index starting at index 0; indices
/// before the requested first index are [`ScanFrame::INVALID_RANGE`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanFrame {
    pub ranges: Vec<i64>,
    /// Reflection strength per index. Empty unless captured in intensity mode.
    pub intensities: Vec<i64>,
    /// Timestamp in milliseconds. Device time until adjusted by the engine.
    pub timestamp: i64,
    pub settings: CaptureSettings,
}

impl ScanFrame {
    /// Sample value of indices that were not measured.
    pub const INVALID_RANGE: i64 = URG_INVALID_RANGE;

    /// Number of samples in the frame.
    #[inline]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Sensor description returned by `PP`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceParameters {
    /// `MODL`: model name, e.g. `UTM-30LX(Hokuyo Automatic Co.,Ltd.)`.
    pub model: String,
    /// `DMIN`: shortest valid distance in millimeters.
    pub distance_min: i64,
    /// `DMAX`: longest valid distance in millimeters.
    pub distance_max: i64,
    /// `ARES`: angular steps per full revolution.
    pub area_total: i32,
    /// `AMIN`: first measurable index.
    pub area_min: i32,
    /// `AMAX`: last measurable index.
    pub area_max: i32,
    /// `AFRT`: index pointing straight ahead.
    pub area_front: i32,
    /// `SCAN`: nominal rotation speed.
    pub scan_rpm: i32,
}

impl Default for DeviceParameters {
    fn default() -> DeviceParameters {
        DeviceParameters {
            model: String::new(),
            distance_min: 0,
            distance_max: 0,
            area_total: 0,
            area_min: 0,
            area_max: 0,
            area_front: 0,
            scan_rpm: URG_DEFAULT_SCAN_RPM,
        }
    }
}

impl DeviceParameters {
    /// Model name without the vendor suffix in parentheses or brackets.
    pub fn model_family(&self) -> &str {
        let end = self
            .model
            .find(['(', '['])
            .unwrap_or(self.model.len());
        &self.model[..end]
    }

    /// Angle of `index` in radians, counter-clockwise from the front.
    pub fn index_to_rad(&self, index: i32) -> f64 {
        let index_from_front = index - self.area_front;
        f64::from(index_from_front) * (2.0 * PI) / f64::from(self.area_total)
    }

    /// Nearest index to `radian`, clamped to `[0, area_max]`.
    pub fn rad_to_index(&self, radian: f64) -> i32 {
        let steps = (radian * f64::from(self.area_total) / (2.0 * PI) + 0.5).floor();
        let index = steps as i32 + self.area_front;
        index.clamp(0, self.area_max.max(0))
    }

    /// Length of a ranges vector covering every index.
    pub fn max_scan_lines(&self) -> usize {
        (self.area_max.max(0) + 1) as usize
    }

    /// Duration of one revolution in milliseconds.
    pub fn scan_msec(&self) -> i32 {
        if self.scan_rpm <= 0 {
            1
        } else {
            1000 * 60 / self.scan_rpm
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utm() -> DeviceParameters {
        DeviceParameters {
            model: String::from("UTM-30LX(Hokuyo Automatic Co.,Ltd.)"),
            distance_min: 23,
            distance_max: 60000,
            area_total: 1440,
            area_min: 0,
            area_max: 1080,
            area_front: 540,
            scan_rpm: 2400,
        }
    }

    #[test]
    fn scan_data_status_depends_on_block_type() {
        let mut settings = CaptureSettings {
            capture_type: CaptureType::GD,
            error_code: 0,
            ..CaptureSettings::default()
        };
        assert!(settings.has_scan_data());

        settings.capture_type = CaptureType::MD;
        assert!(!settings.has_scan_data());
        settings.error_code = 99;
        assert!(settings.has_scan_data());
        settings.error_code = 4;
        assert!(!settings.has_scan_data());

        settings.capture_type = CaptureType::Quit;
        settings.error_code = 0;
        assert!(!settings.has_scan_data());
    }

    #[test]
    fn model_family_strips_vendor() {
        assert_eq!(utm().model_family(), "UTM-30LX");

        let mut p = utm();
        p.model = String::from("URG-04LX-UG01[Hokuyo]");
        assert_eq!(p.model_family(), "URG-04LX-UG01");
        p.model = String::from("UBG-04LX-F01");
        assert_eq!(p.model_family(), "UBG-04LX-F01");
    }

    #[test]
    fn index_and_angle_conversion() {
        let p = utm();
        assert_eq!(p.index_to_rad(540), 0.0);
        assert!((p.index_to_rad(900) - PI / 2.0).abs() < 1e-9);
        assert_eq!(p.rad_to_index(0.0), 540);
        assert_eq!(p.rad_to_index(PI / 2.0), 900);
        assert_eq!(p.rad_to_index(p.index_to_rad(123)), 123);
    }

    #[test]
    fn rad_to_index_clamps() {
        let p = utm();
        assert_eq!(p.rad_to_index(-10.0), 0);
        assert_eq!(p.rad_to_index(10.0), 1080);
    }

    #[test]
    fn scan_msec_and_lines() {
        let mut p = utm();
        assert_eq!(p.scan_msec(), 25);
        assert_eq!(p.max_scan_lines(), 1081);
        p.scan_rpm = 0;
        assert_eq!(p.scan_msec(), 1);
        assert_eq!(DeviceParameters::default().scan_msec(), 100);
    }
}
