use std::time::Duration;

/// Wait for the first line of a response.
pub const SCIP_FIRST_LINE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Wait for each following line once a response has started.
pub const SCIP_CONTINUATION_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound for draining a burst of stray lines.
pub const SCIP_TOTAL_TIMEOUT: Duration = Duration::from_millis(1000);

/// A data line holds 64 payload characters and a checksum; one more for the terminator.
pub const SCIP_LINE_BUFFER_SIZE: usize = 64 + 1 + 1;

/// Lines of a well-formed `PP` reply.
pub const SCIP_PARAMETER_LINES: usize = 8;

/// Consecutive failures a continuous capture tolerates before giving up.
pub const URG_DEFAULT_RETRY_TIMES: usize = 8;

/// Largest scan count a single `MD`/`MS`/`ME` command can carry.
pub const URG_MD_SCANS_MAX: usize = 99;

/// Scan count sent when the host counts scans itself.
pub const URG_MD_SCANS_UNBOUNDED: usize = 0;

/// Sample value used for angular steps that were not measured.
pub const URG_INVALID_RANGE: i64 = -1;

/// Nominal rotation speed when the device reports none.
pub const URG_DEFAULT_SCAN_RPM: i32 = 600;

/// Device timestamps are 24-bit counters of milliseconds.
pub const URG_TIMESTAMP_WRAP: i64 = 1 << 24;

/// Timeout for waiting on a reboot echo.
pub const URG_REBOOT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Added to the measured settle delay after the device changes its baud rate.
pub const URG_BAUDRATE_SETTLE_MARGIN: Duration = Duration::from_millis(10);
