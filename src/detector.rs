//! Onset detection — reconstructs a sub-sample-accurate event-arrival
//! timestamp from a single listener's noisy loudness trace.
//!
//! Algorithm: find the biggest positive jump in loudness, walk backward to
//! the true below-threshold sample (eliminating a distance-dependent
//! lateness bias), then linearly interpolate the threshold crossing between
//! that sample and its successor.

use crate::listener::{Onset, Sample};

/// Detects a single onset in a batch of samples from one listener.
///
/// Returns `None` when no sample reaches `threshold` ("no clap detected").
/// Input order is not trusted: samples are sorted ascending by timestamp
/// before analysis, since packets may arrive out of order.
pub fn detect(samples: &[Sample], threshold: f64) -> Option<Onset> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted: Vec<Sample> = samples.to_vec();
    sorted.sort_by(|a, b| {
        a.timestamp_ms
            .partial_cmp(&b.timestamp_ms)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if sorted.len() == 1 {
        let only = sorted[0];
        return Some(Onset {
            onset_ts_ms: only.timestamp_ms,
            peak_loudness: only.loudness,
        });
    }

    let k = biggest_jump_index(&sorted);
    if sorted[k].loudness < threshold {
        return None;
    }

    let peak_loudness = sorted[k].loudness;
    let crossing = backward_walk(&sorted, k, threshold);

    let Some(c) = crossing else {
        tracing::debug!(
            samples = sorted.len(),
            "onset: no below-threshold sample found during backward walk, using earliest sample verbatim"
        );
        let earliest = sorted[0];
        return Some(Onset {
            onset_ts_ms: earliest.timestamp_ms,
            peak_loudness,
        });
    };

    let below = sorted[c - 1];
    let above = sorted[c];
    let delta = above.loudness - below.loudness;

    let f = if delta > 0.0 {
        ((threshold - below.loudness) / delta).clamp(0.0, 1.0)
    } else {
        0.5
    };

    if above.timestamp_ms == below.timestamp_ms {
        tracing::debug!("onset: zero-width interpolation interval, using below.ts verbatim");
    }

    let onset_ts_ms = below.timestamp_ms + f * (above.timestamp_ms - below.timestamp_ms);

    Some(Onset {
        onset_ts_ms,
        peak_loudness,
    })
}

/// Index of the largest positive first-difference `loudness[i] - loudness[i-1]`.
/// Ties go to the earliest index.
fn biggest_jump_index(sorted: &[Sample]) -> usize {
    let mut best_idx = 1;
    let mut best_diff = sorted[1].loudness - sorted[0].loudness;
    for i in 2..sorted.len() {
        let diff = sorted[i].loudness - sorted[i - 1].loudness;
        if diff > best_diff {
            best_diff = diff;
            best_idx = i;
        }
    }
    best_idx
}

/// Scans backward from `k` for the first index whose predecessor drops below
/// `threshold`. Returns `None` if every earlier sample is already at or
/// above threshold.
fn backward_walk(sorted: &[Sample], k: usize, threshold: f64) -> Option<usize> {
    for i in (1..=k).rev() {
        if sorted[i - 1].loudness < threshold {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(ts: f64, loudness: f64) -> Sample {
        Sample {
            timestamp_ms: ts,
            loudness,
        }
    }

    #[test]
    fn empty_input_returns_none() {
        assert_eq!(detect(&[], 10000.0), None);
    }

    #[test]
    fn single_sample_returned_unchanged() {
        let onset = detect(&[s(42.0, 5.0)], 10000.0).unwrap();
        assert_eq!(onset.onset_ts_ms, 42.0);
        assert_eq!(onset.peak_loudness, 5.0);
    }

    #[test]
    fn below_threshold_returns_none() {
        let samples = [s(0.0, 1.0), s(36.0, 2.0), s(72.0, 3.0)];
        assert_eq!(detect(&samples, 10000.0), None);
    }

    #[test]
    fn interpolates_between_below_and_above() {
        // Jump from 500 -> 15000 at index 2; threshold 10000 crossed there.
        let samples = [s(0.0, 100.0), s(36.0, 500.0), s(72.0, 15000.0)];
        let onset = detect(&samples, 10000.0).unwrap();
        // f = (10000 - 500) / (15000 - 500) = 9500/14500
        let expected_f = 9500.0 / 14500.0;
        let expected_ts = 36.0 + expected_f * (72.0 - 36.0);
        assert!((onset.onset_ts_ms - expected_ts).abs() < 1e-9);
        assert_eq!(onset.peak_loudness, 15000.0);
    }

    #[test]
    fn out_of_order_input_is_sorted_first() {
        let samples = [s(72.0, 15000.0), s(0.0, 100.0), s(36.0, 500.0)];
        let onset = detect(&samples, 10000.0).unwrap();
        let expected_f = 9500.0 / 14500.0;
        let expected_ts = 36.0 + expected_f * (72.0 - 36.0);
        assert!((onset.onset_ts_ms - expected_ts).abs() < 1e-9);
    }

    #[test]
    fn ties_in_biggest_jump_pick_earliest() {
        // Diffs: i=1 -> 5000, i=2 -> 0, i=3 -> 5000. Tied maximum jump; earliest (i=1) wins,
        // so the reported peak is the one reached at index 1, not index 3.
        let samples = [
            s(0.0, 5000.0),
            s(10.0, 10000.0),
            s(20.0, 10000.0),
            s(30.0, 15000.0),
        ];
        let onset = detect(&samples, 10000.0).unwrap();
        assert_eq!(onset.peak_loudness, 10000.0);
    }

    #[test]
    fn no_crossing_found_falls_back_to_earliest() {
        // Every sample already at/above threshold; biggest jump is idx 1.
        let samples = [s(0.0, 10000.0), s(36.0, 20000.0), s(72.0, 20500.0)];
        let onset = detect(&samples, 10000.0).unwrap();
        assert_eq!(onset.onset_ts_ms, 0.0);
        assert_eq!(onset.peak_loudness, 20000.0);
    }

    #[test]
    fn interpolated_timestamp_stays_within_the_crossing_interval() {
        let samples = [s(0.0, 5000.0), s(36.0, 5000.0), s(72.0, 20000.0)];
        let onset = detect(&samples, 10000.0).unwrap();
        assert!(onset.onset_ts_ms > 36.0 && onset.onset_ts_ms < 72.0);
    }

    #[test]
    fn onset_monotonicity_shifting_all_timestamps() {
        let samples = [s(0.0, 100.0), s(36.0, 500.0), s(72.0, 15000.0)];
        let shifted: Vec<Sample> = samples
            .iter()
            .map(|s| Sample {
                timestamp_ms: s.timestamp_ms + 1000.0,
                loudness: s.loudness,
            })
            .collect();

        let base = detect(&samples, 10000.0).unwrap();
        let shifted_onset = detect(&shifted, 10000.0).unwrap();
        assert!((shifted_onset.onset_ts_ms - (base.onset_ts_ms + 1000.0)).abs() < 1e-9);
    }
}
