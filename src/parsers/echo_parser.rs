use crate::base::{Error, Result};
use crate::cmds::*;
use crate::protocol::parse_decimal;
use crate::types::{CaptureSettings, CaptureType};
use log::{trace, warn};

/// Length of a `GD`/`GS` echo: `GDbbbbeeeegg`.
pub const GX_ECHO_SIZE: usize = 12;

/// Length of an `MD`/`MS`/`ME` echo: `MDbbbbeeeeggstt`.
pub const MX_ECHO_SIZE: usize = 15;

/// First line of a capture reply, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Echo {
    /// A capture command; the settings describe the block that follows.
    Capture(CaptureSettings),
    /// `QT`: the stream has ended.
    Quit,
    /// Anything else. The caller keeps looking for a known echo.
    Unknown,
}

/// Classifies and parses the echo line of a capture reply.
///
/// Known prefixes with the wrong length fail with [`Error::ProtocolError`].
pub fn parse_echo(line: &[u8]) -> Result<Echo> {
    if line.len() < 2 {
        return Ok(Echo::Unknown);
    }
    let capture_type = match &line[..2] {
        b"GD" => CaptureType::GD,
        b"GS" => CaptureType::GS,
        b"MD" => CaptureType::MD,
        b"MS" => CaptureType::MS,
        b"ME" => CaptureType::ME,
        b"QT" => return Ok(Echo::Quit),
        _ => {
            trace!("Unknown echo: {:?}", String::from_utf8_lossy(line));
            return Ok(Echo::Unknown);
        }
    };

    let expected = if capture_type.is_continuous() {
        MX_ECHO_SIZE
    } else {
        GX_ECHO_SIZE
    };
    if line.len() != expected {
        warn!(
            "Invalid {:?} echo of {} bytes: {:?}",
            capture_type,
            line.len(),
            String::from_utf8_lossy(line)
        );
        return Err(Error::ProtocolError {
            description: format!("invalid {:?} packet has arrived", capture_type),
        });
    }

    let skip_field = &line[10..12];
    let skip_lines = if skip_field == SCIP_INTENSITY_SKIP_CODE.as_bytes() {
        1
    } else {
        parse_decimal(skip_field).max(1)
    };

    let mut settings = CaptureSettings {
        capture_type,
        capture_first: parse_decimal(&line[2..6]),
        capture_last: parse_decimal(&line[6..10]) + 1,
        skip_lines,
        data_byte: match capture_type {
            CaptureType::GS | CaptureType::MS => 2,
            _ => 3,
        },
        ..CaptureSettings::default()
    };
    if capture_type.is_continuous() {
        settings.skip_frames = parse_decimal(&line[12..13]);
        settings.remain_times = parse_decimal(&line[13..15]);
    }
    trace!("Parsed echo: {:?}", settings);
    Ok(Echo::Capture(settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(line: &[u8]) -> CaptureSettings {
        match parse_echo(line).unwrap() {
            Echo::Capture(settings) => settings,
            other => panic!("expected capture echo, got {:?}", other),
        }
    }

    #[test]
    fn gd_echo() {
        let s = settings(b"GD0044072500");
        assert_eq!(s.capture_type, CaptureType::GD);
        assert_eq!(s.capture_first, 44);
        assert_eq!(s.capture_last, 726);
        assert_eq!(s.skip_lines, 1);
        assert_eq!(s.data_byte, 3);

        let s = settings(b"GS0000076803");
        assert_eq!(s.capture_type, CaptureType::GS);
        assert_eq!(s.skip_lines, 3);
        assert_eq!(s.data_byte, 2);
    }

    #[test]
    fn mx_echo() {
        let s = settings(b"MS0000108002107");
        assert_eq!(s.capture_type, CaptureType::MS);
        assert_eq!(s.capture_last, 1081);
        assert_eq!(s.skip_lines, 2);
        assert_eq!(s.skip_frames, 1);
        assert_eq!(s.remain_times, 7);
        assert_eq!(s.data_byte, 2);

        let s = settings(b"ME0000108001000");
        assert_eq!(s.capture_type, CaptureType::ME);
        assert_eq!(s.data_byte, 3);
        assert_eq!(s.remain_times, 0);
    }

    #[test]
    fn legacy_intensity_skip_code() {
        let s = settings(b"MD00440725FF005");
        assert_eq!(s.capture_type, CaptureType::MD);
        assert_eq!(s.skip_lines, 1);
        assert_eq!(s.remain_times, 5);
    }

    #[test]
    fn quit_and_unknown() {
        assert_eq!(parse_echo(b"QT").unwrap(), Echo::Quit);
        assert_eq!(parse_echo(b"?!garbage").unwrap(), Echo::Unknown);
        assert_eq!(parse_echo(b"").unwrap(), Echo::Unknown);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(parse_echo(b"GD004407250").is_err());
        assert!(parse_echo(b"MD00000108001000").is_err());
    }
}
