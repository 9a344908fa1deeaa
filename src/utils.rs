use crate::types::ScanFrame;
use log::trace;

/// Splits an `ME` frame into distances and intensities.
///
/// After the backfilled pairs of the first `capture_first` indices, the
/// device sends for every measured step a distance and then an intensity,
/// each already repeated `skip_lines` times by the range parser. Intensities
/// of distances below `distance_min` are reported as `0`.
///
/// # Arguments
///
/// * `data` - Samples as returned by the range parser for an `ME` block.
/// * `capture_first` - First requested index.
/// * `skip_lines` - Angular thinning of the request.
/// * `distance_min` - Shortest valid distance of the sensor.
pub fn split_interleaved_intensity(
    data: &[i64],
    capture_first: usize,
    skip_lines: usize,
    distance_min: i64,
) -> (Vec<i64>, Vec<i64>) {
    let skip_lines = skip_lines.max(1);
    let backfill = (capture_first * 2).min(data.len());
    let measured = &data[backfill..];
    let groups = measured.len() / skip_lines / 2;
    trace!(
        "Splitting {} interleaved samples into {} steps",
        data.len(),
        groups
    );

    let size = backfill / 2 + groups * skip_lines;
    let mut ranges = Vec::with_capacity(size);
    let mut intensities = Vec::with_capacity(size);
    ranges.resize(backfill / 2, ScanFrame::INVALID_RANGE);
    intensities.resize(backfill / 2, 0);

    for group in measured.chunks_exact(2 * skip_lines) {
        let length = group[0];
        let intensity = if length < distance_min {
            0
        } else {
            group[skip_lines]
        };
        for _ in 0..skip_lines {
            ranges.push(length);
            intensities.push(intensity);
        }
    }
    (ranges, intensities)
}

/// Splits a frame of the `MD..FF` intensity mode in place.
///
/// Older sensors answer with alternating distance and intensity per pair of
/// steps. The pairs are aligned to even indices, so they start at
/// `begin & 1` within the backfilled vector. The distance of each pair is
/// written to both of its indices and the intensity is returned for both.
pub fn split_paired_intensity(data: &mut [i64], begin: usize, distance_min: i64) -> Vec<i64> {
    let n = data.len();
    let mut intensities = vec![0; n];
    let mut index = begin & 1;
    while index + 1 < n {
        let length = data[index];
        let intensity = if length < distance_min {
            0
        } else {
            data[index + 1]
        };
        intensities[index] = intensity;
        intensities[index + 1] = intensity;
        data[index + 1] = length;
        index += 2;
    }
    intensities
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn interleaved_without_skip() {
        let data = [-1, -1, 100, 7, 10, 8, 300, 9];
        let (ranges, intensities) = split_interleaved_intensity(&data, 1, 1, 20);
        assert_eq!(ranges, vec![-1, 100, 10, 300]);
        assert_eq!(intensities, vec![0, 7, 0, 9]);
    }

    #[test]
    fn interleaved_with_skip() {
        let data = [100, 100, 7, 7, 200, 200, 8, 8];
        let (ranges, intensities) = split_interleaved_intensity(&data, 0, 2, 20);
        assert_eq!(ranges, vec![100, 100, 200, 200]);
        assert_eq!(intensities, vec![7, 7, 8, 8]);
    }

    #[test]
    fn paired_even_begin() {
        let mut data = vec![-1, -1, 100, 7, 200, 8];
        let intensities = split_paired_intensity(&mut data, 2, 20);
        assert_eq!(data, vec![-1, -1, 100, 100, 200, 200]);
        assert_eq!(intensities, vec![0, 0, 7, 7, 8, 8]);
    }

    #[test]
    fn paired_odd_begin() {
        let mut data = vec![-1, 100, 7, 200, 8, 300];
        let intensities = split_paired_intensity(&mut data, 1, 20);
        assert_eq!(data, vec![-1, 100, 100, 200, 200, 300]);
        assert_eq!(intensities, vec![0, 7, 7, 8, 8, 0]);
    }
}
