// Commands answered with a plain status block

/// Quit: stops any measurement and turns the laser off.
pub const SCIP_CMD_QUIT: &str = "QT\n";

/// Begin measurement: turns the laser on.
pub const SCIP_CMD_LASER_ON: &str = "BM\n";

/// Switches a SCIP 1.1 firmware into SCIP 2.0 mode.
pub const SCIP_CMD_SCIP20: &str = "SCIP2.0\n";

/// Enters the raw timestamp mode.
pub const SCIP_CMD_TIMESTAMP_ENTER: &str = "TM0\n";

/// Reads the raw timestamp counter. Only valid after `TM0`.
pub const SCIP_CMD_TIMESTAMP_READ: &str = "TM1\n";

/// Leaves the raw timestamp mode.
pub const SCIP_CMD_TIMESTAMP_LEAVE: &str = "TM2\n";

/// Reboot request. Must be sent twice in a row to take effect.
pub const SCIP_CMD_REBOOT: &str = "RB\n";

// Commands answered with payload lines

/// Parameter query: model, distance limits, angular layout, scan speed.
pub const SCIP_CMD_PARAMETERS: &str = "PP\n";

/// Version query: vendor, product, firmware, protocol and serial number.
pub const SCIP_CMD_VERSION: &str = "VV\n";

// Capture command prefixes

/// One-shot capture, 3 characters per sample.
pub const SCIP_CMD_GET_DISTANCE: &str = "GD";

/// One-shot capture, 2 characters per sample.
pub const SCIP_CMD_GET_DISTANCE_SHORT: &str = "GS";

/// Continuous capture, 3 characters per sample.
pub const SCIP_CMD_MEASURE_DISTANCE: &str = "MD";

/// Continuous capture, 2 characters per sample.
pub const SCIP_CMD_MEASURE_DISTANCE_SHORT: &str = "MS";

/// Continuous capture of distance and intensity pairs.
pub const SCIP_CMD_MEASURE_INTENSITY: &str = "ME";

/// Skip-lines field that asks legacy `MD` firmware for intensity pairs.
pub const SCIP_INTENSITY_SKIP_CODE: &str = "FF";

// Status codes

/// Command accepted.
pub const SCIP_STATUS_OK: i32 = 0x00;

/// `SS`: requested baud rate is already active.
pub const SCIP_STATUS_SS_ALREADY: i32 = 0x03;

/// `SS`: the request was valid for this device.
pub const SCIP_STATUS_SS_ACCEPTED: i32 = 0x04;

/// `SS`: device cannot switch at this moment but keeps the rate.
pub const SCIP_STATUS_SS_UNCHANGED: i32 = 0x0f;

/// Status a sensor stuck in timestamp mode answers `QT` with.
pub const SCIP_STATUS_TIMESTAMP_MODE: i32 = 0x0e;

/// Status of a SCIP 1.1 firmware, reported negated.
pub const SCIP_STATUS_SCIP11: i32 = -0x0e;

/// Status of a data block in continuous mode. Capture statuses are decimal.
pub const SCIP_STATUS_DATA: i32 = 99;

/// Host and device got out of step; the following lines are stale.
pub const SCIP_STATUS_DESYNC: &[u8] = b"0B";

/// The laser was switched off underneath the capture.
pub const SCIP_STATUS_LASER_OFF: &[u8] = b"10";

/// Baud rates the sensor family accepts.
pub const SCIP_BAUDRATES: [u32; 6] = [4800, 9600, 19200, 38400, 57600, 115200];

/// Baud rates probed by `connect`, in order.
pub const SCIP_PROBE_BAUDRATES: [u32; 3] = [115200, 19200, 38400];

/// Models that only deliver intensity through `MD` with the `FF` skip code.
pub const SCIP_LEGACY_INTENSITY_MODELS: [&str; 3] = ["URG-04LX", "URG-04LX-UG01", "UBG-04LX-F01"];
