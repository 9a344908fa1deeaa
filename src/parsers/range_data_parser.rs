use crate::protocol::decode;
use crate::types::{CaptureSettings, CaptureType, ScanFrame};
use log::trace;

/// Collects the data lines of one capture block into samples.
///
/// Samples may straddle line boundaries; leftover characters are carried to
/// the next line. Every decoded value is repeated `skip_lines` times so the
/// output keeps one entry per angular index.
#[derive(Debug)]
pub struct RangeDataParser {
    data: Vec<i64>,
    left: Vec<u8>,
    data_byte: usize,
    skip_lines: usize,
    expected: usize,
}

impl RangeDataParser {
    /// Starts a block, filling the indices before `capture_first` with
    /// [`ScanFrame::INVALID_RANGE`].
    pub fn new(settings: &CaptureSettings) -> RangeDataParser {
        let skip_lines = settings.skip_lines.max(1);
        let expected = if settings.capture_type == CaptureType::ME {
            // Distance and intensity per step; the last step may cover
            // fewer than `skip_lines` indices but is still sent whole.
            let steps = settings
                .capture_last
                .saturating_sub(settings.capture_first)
                .div_ceil(skip_lines);
            settings.capture_first * 2 + steps * 2 * skip_lines
        } else {
            settings.capture_last
        };
        let mut data = Vec::with_capacity(expected);
        let backfill = if settings.capture_type == CaptureType::ME {
            settings.capture_first * 2
        } else {
            settings.capture_first
        };
        data.resize(backfill, ScanFrame::INVALID_RANGE);

        RangeDataParser {
            data,
            left: Vec::with_capacity(settings.data_byte),
            data_byte: settings.data_byte.max(1),
            skip_lines,
            expected,
        }
    }

    /// Decodes one data line. `body` must already have its checksum removed.
    pub fn push_line(&mut self, body: &[u8]) {
        for &c in body {
            self.left.push(c);
            if self.left.len() == self.data_byte {
                let value = decode(&self.left);
                self.data
                    .extend(std::iter::repeat(value).take(self.skip_lines));
                self.left.clear();
            }
        }
    }

    /// Returns `true` once the block covers the whole requested range.
    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.expected
    }

    /// Returns the samples, dropping any the device sent beyond the request.
    pub fn finish(mut self) -> Vec<i64> {
        if !self.left.is_empty() {
            trace!("Dropping {} trailing characters", self.left.len());
        }
        if self.data.len() > self.expected {
            trace!(
                "Truncating {} samples to {}",
                self.data.len(),
                self.expected
            );
            self.data.truncate(self.expected);
        }
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;

    fn settings(capture_type: CaptureType, first: usize, last: usize, skip: usize) -> CaptureSettings {
        CaptureSettings {
            capture_type,
            capture_first: first,
            capture_last: last + 1,
            skip_lines: skip,
            data_byte: 3,
            ..CaptureSettings::default()
        }
    }

    fn encoded(values: &[i64], width: usize) -> Vec<u8> {
        values.iter().flat_map(|&v| encode(v, width)).collect()
    }

    #[test]
    fn samples_straddle_lines() {
        let values: Vec<i64> = (0..30).map(|i| 1000 + i).collect();
        let bytes = encoded(&values, 3);
        let mut parser = RangeDataParser::new(&settings(CaptureType::GD, 0, 29, 1));
        // 64 characters per line, 90 in total: one sample is split.
        parser.push_line(&bytes[..64]);
        parser.push_line(&bytes[64..]);
        assert_eq!(parser.finish(), values);
    }

    #[test]
    fn leading_indices_are_backfilled() {
        let mut parser = RangeDataParser::new(&settings(CaptureType::GD, 3, 5, 1));
        parser.push_line(&encoded(&[7, 8, 9], 3));
        assert_eq!(parser.finish(), vec![-1, -1, -1, 7, 8, 9]);
    }

    #[test]
    fn skip_lines_replicate_samples() {
        let mut parser = RangeDataParser::new(&settings(CaptureType::GD, 0, 8, 3));
        parser.push_line(&encoded(&[10, 20, 30], 3));
        assert_eq!(parser.finish(), vec![10, 10, 10, 20, 20, 20, 30, 30, 30]);
    }

    #[test]
    fn oversent_samples_are_truncated() {
        let mut parser = RangeDataParser::new(&settings(CaptureType::GD, 0, 3, 3));
        parser.push_line(&encoded(&[1, 2], 3));
        assert_eq!(parser.finish(), vec![1, 1, 1, 2]);

        let mut parser = RangeDataParser::new(&settings(CaptureType::ME, 1, 2, 1));
        parser.push_line(&encoded(&[5, 50, 6, 60, 7, 70], 3));
        assert_eq!(parser.finish(), vec![-1, -1, 5, 50, 6, 60]);
    }

    #[test]
    fn intensity_steps_keep_the_last_partial_group() {
        // Indices 0..=10 in steps of 3: four steps, the last covering two indices.
        let mut parser = RangeDataParser::new(&settings(CaptureType::ME, 0, 10, 3));
        parser.push_line(&encoded(&[100, 1, 200, 2, 300, 3, 400, 4], 3));
        assert!(parser.is_complete());
        let data = parser.finish();
        assert_eq!(data.len(), 24);
        assert_eq!(&data[18..], &[400, 400, 400, 4, 4, 4]);
    }

    #[test]
    fn short_block_is_incomplete() {
        let mut parser = RangeDataParser::new(&settings(CaptureType::GD, 0, 99, 1));
        parser.push_line(&encoded(&[1; 21], 3));
        assert!(!parser.is_complete());

        let mut parser = RangeDataParser::new(&settings(CaptureType::GD, 0, 10, 3));
        parser.push_line(&encoded(&[1, 2, 3, 4], 3));
        assert!(parser.is_complete());
    }
}
