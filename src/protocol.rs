//! Stateless SCIP 2.0 encoding: packed integers, status lines and command strings.

use crate::base::{Error, Result};
use crate::checksum::verified_body;
use crate::cmds::*;
use crate::types::DataEncoding;
use log::trace;

/// Offset of the printable character set every packed value is built from.
const SCIP_CHAR_OFFSET: u8 = 0x30;

/// Decodes a big-endian sequence of 6-bit characters.
///
/// Samples use 2 or 3 characters and timestamps 4.
///
/// # Examples
/// ```
/// assert_eq!(urg::protocol::decode(b"1Dh"), 5432);
/// ```
#[inline]
pub fn decode(data: &[u8]) -> i64 {
    data.iter().fold(0i64, |value, &c| {
        (value << 6) | i64::from(c.wrapping_sub(SCIP_CHAR_OFFSET) & 0x3f)
    })
}

/// Encodes `value` into `width` 6-bit characters. Higher bits are dropped.
pub fn encode(value: i64, width: usize) -> Vec<u8> {
    (0..width)
        .rev()
        .map(|i| (((value >> (6 * i)) & 0x3f) as u8) + SCIP_CHAR_OFFSET)
        .collect()
}

/// Parses a status line.
///
/// SCIP 2.0 answers with two hex digits and a checksum. SCIP 1.1 answers with a
/// single hex digit and no checksum; its code is returned negated so callers
/// can tell the protocols apart.
pub fn parse_status(line: &[u8]) -> Result<i32> {
    parse_status_radix(line, 16)
}

/// Parses the status line of a capture block. These codes are decimal, so
/// scan data arrives as `99`.
pub fn parse_capture_status(line: &[u8]) -> Result<i32> {
    parse_status_radix(line, 10)
}

fn parse_status_radix(line: &[u8], radix: u32) -> Result<i32> {
    match line.len() {
        3 => {
            let body = verified_body(line).ok_or_else(|| Error::ChecksumMismatch {
                line: String::from_utf8_lossy(line).into_owned(),
            })?;
            parse_code(body, radix)
        }
        1 => Ok(-parse_code(line, radix)?),
        _ => Err(Error::ProtocolError {
            description: format!(
                "invalid status line: {:?}",
                String::from_utf8_lossy(line)
            ),
        }),
    }
}

fn parse_code(digits: &[u8], radix: u32) -> Result<i32> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| i32::from_str_radix(s, radix).ok())
        .ok_or_else(|| Error::ProtocolError {
            description: format!("invalid status code: {:?}", String::from_utf8_lossy(digits)),
        })
}

/// Parses the leading decimal digits of an echo field. A field without digits
/// (such as the `FF` skip code) counts as `0`.
pub fn parse_decimal(field: &[u8]) -> usize {
    field
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .fold(0usize, |value, &c| value * 10 + usize::from(c - b'0'))
}

/// Returns `true` if `command` starts a streaming capture (`MD`, `MS` or `ME`).
pub fn is_continuous_command(command: &[u8]) -> bool {
    [
        SCIP_CMD_MEASURE_DISTANCE,
        SCIP_CMD_MEASURE_DISTANCE_SHORT,
        SCIP_CMD_MEASURE_INTENSITY,
    ]
    .iter()
    .any(|prefix| command.starts_with(prefix.as_bytes()))
}

fn check_field(name: &str, value: usize, max: usize) -> Result<()> {
    if value > max {
        return Err(Error::InvalidArgument(format!(
            "{} must be at most {}, got {}",
            name, max, value
        )));
    }
    Ok(())
}

fn check_range(begin: usize, end: usize, skip_lines: usize) -> Result<()> {
    check_field("begin index", begin, 9999)?;
    check_field("end index", end, 9999)?;
    check_field("skip lines", skip_lines, 99)?;
    if begin > end {
        return Err(Error::InvalidArgument(format!(
            "begin index {} is after end index {}",
            begin, end
        )));
    }
    Ok(())
}

/// Builds a one-shot request: `GDbbbbeeeegg\n` or `GSbbbbeeeegg\n`.
pub fn get_distance_command(
    encoding: DataEncoding,
    begin: usize,
    end: usize,
    skip_lines: usize,
) -> Result<String> {
    check_range(begin, end, skip_lines)?;
    let prefix = match encoding {
        DataEncoding::Standard => SCIP_CMD_GET_DISTANCE,
        DataEncoding::Short => SCIP_CMD_GET_DISTANCE_SHORT,
    };
    let command = format!("{}{:04}{:04}{:02}\n", prefix, begin, end, skip_lines);
    trace!("Built command {:?}", command);
    Ok(command)
}

/// Builds a streaming request: `MDbbbbeeeeggstt\n` (also `MS`, `ME`).
///
/// `times` above the per-command limit is sent as `00`, which asks the
/// device to stream until stopped.
pub fn measure_command(
    prefix: &str,
    begin: usize,
    end: usize,
    skip_lines: usize,
    frame_interval: usize,
    times: usize,
) -> Result<String> {
    check_range(begin, end, skip_lines)?;
    check_field("frame interval", frame_interval, 9)?;
    let command = format!(
        "{}{:04}{:04}{:02}{:01}{:02}\n",
        prefix,
        begin,
        end,
        skip_lines,
        frame_interval,
        wire_times(times)
    );
    trace!("Built command {:?}", command);
    Ok(command)
}

/// Builds the `MDbbbbeeeeFFstt\n` request older firmware answers with
/// distance and intensity pairs.
pub fn legacy_intensity_command(
    begin: usize,
    end: usize,
    frame_interval: usize,
    times: usize,
) -> Result<String> {
    check_range(begin, end, 0)?;
    check_field("frame interval", frame_interval, 9)?;
    let command = format!(
        "{}{:04}{:04}{}{:01}{:02}\n",
        SCIP_CMD_MEASURE_DISTANCE,
        begin,
        end,
        SCIP_INTENSITY_SKIP_CODE,
        frame_interval,
        wire_times(times)
    );
    trace!("Built command {:?}", command);
    Ok(command)
}

/// Builds the device baud rate change `SSbbbbbb\n`.
pub fn baudrate_command(baudrate: u32) -> String {
    format!("SS{:06}\n", baudrate)
}

#[inline]
fn wire_times(times: usize) -> usize {
    if times > crate::internals::URG_MD_SCANS_MAX {
        0
    } else {
        times
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_known_values() {
        assert_eq!(decode(b"00"), 0);
        assert_eq!(decode(b"0m"), 61);
        assert_eq!(decode(b"1Dh"), 5432);
        assert_eq!(decode(b"oooo"), (1 << 24) - 1);
    }

    #[test]
    fn encode_inverts_decode_at_the_edges() {
        for &(value, width) in &[
            (0, 2),
            (1, 2),
            (4095, 2),
            (0, 3),
            (262_143, 3),
            (5432, 3),
            (16_777_215, 4),
        ] {
            assert_eq!(decode(&encode(value, width)), value, "{} / {}", value, width);
        }
        assert_eq!(encode(5432, 3), b"1Dh".to_vec());
    }

    #[test]
    fn status_lines() {
        assert_eq!(parse_status(b"00P").unwrap(), 0);
        assert_eq!(parse_status(b"0Ee").unwrap(), 0x0e);
        assert_eq!(parse_status(b"04T").unwrap(), 4);
        assert_eq!(parse_capture_status(b"99b").unwrap(), 99);
        assert_eq!(parse_capture_status(b"10Q").unwrap(), 10);
        assert!(parse_capture_status(b"0Bb").is_err());
        assert_eq!(parse_status(b"E").unwrap(), -14);
        assert!(matches!(
            parse_status(b"00Q"),
            Err(Error::ChecksumMismatch { .. })
        ));
        assert!(matches!(
            parse_status(b"0000"),
            Err(Error::ProtocolError { .. })
        ));
    }

    #[test]
    fn decimal_fields() {
        assert_eq!(parse_decimal(b"0044"), 44);
        assert_eq!(parse_decimal(b"FF"), 0);
        assert_eq!(parse_decimal(b""), 0);
    }

    #[test]
    fn continuous_commands() {
        assert!(is_continuous_command(b"MD0000108001000\n"));
        assert!(is_continuous_command(b"ME0000108001000\n"));
        assert!(is_continuous_command(b"MS"));
        assert!(!is_continuous_command(b"GD0000108001\n"));
        assert!(!is_continuous_command(b"M"));
    }

    #[test]
    fn command_strings() {
        assert_eq!(
            get_distance_command(DataEncoding::Standard, 44, 725, 1).unwrap(),
            "GD0044072501\n"
        );
        assert_eq!(
            get_distance_command(DataEncoding::Short, 0, 768, 3).unwrap(),
            "GS0000076803\n"
        );
        assert_eq!(
            measure_command(SCIP_CMD_MEASURE_DISTANCE, 0, 1080, 1, 0, 0).unwrap(),
            "MD0000108001000\n"
        );
        assert_eq!(
            measure_command(SCIP_CMD_MEASURE_INTENSITY, 0, 1080, 2, 1, 150).unwrap(),
            "ME0000108002100\n"
        );
        assert_eq!(
            legacy_intensity_command(44, 725, 0, 5).unwrap(),
            "MD00440725FF005\n"
        );
        assert_eq!(baudrate_command(115200), "SS115200\n");
        assert_eq!(baudrate_command(19200), "SS019200\n");
    }

    #[test]
    fn command_fields_are_range_checked() {
        assert!(get_distance_command(DataEncoding::Standard, 10, 5, 1).is_err());
        assert!(get_distance_command(DataEncoding::Standard, 0, 10_000, 1).is_err());
        assert!(measure_command(SCIP_CMD_MEASURE_DISTANCE, 0, 10, 100, 0, 0).is_err());
        assert!(measure_command(SCIP_CMD_MEASURE_DISTANCE, 0, 10, 1, 10, 0).is_err());
    }
}
