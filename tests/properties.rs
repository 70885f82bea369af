//! Property tests for the round-trip/idempotence laws in the acoustic
//! locator's core: onset monotonicity, sync-round offset correctness, and
//! TDOA solver order invariance. Arbitrary inputs are generated with
//! `proptest`; the six worked end-to-end scenarios live in `tests/scenarios.rs`.

use acoustic_locator::detector;
use acoustic_locator::listener::Sample;
use acoustic_locator::solver::{solve, Receiver, RoomBounds};
use acoustic_locator::sync::{SyncCoordinator, SyncOutcome};
use proptest::prelude::*;

const THRESHOLD: f64 = 10_000.0;

fn clap_samples(base_ts: f64, deltas: &[f64], loudnesses: &[f64]) -> Vec<Sample> {
    let mut ts = base_ts;
    let mut out = Vec::with_capacity(deltas.len());
    for (i, &loudness) in loudnesses.iter().enumerate() {
        out.push(Sample {
            timestamp_ms: ts,
            loudness,
        });
        if i + 1 < deltas.len() {
            ts += deltas[i];
        }
    }
    out
}

proptest! {
    /// Shifting every sample's timestamp by a constant delta shifts the
    /// detected onset by exactly that delta (spec §8, "Onset monotonicity").
    #[test]
    fn onset_monotonicity(
        base_ts in -1_000.0f64..1_000.0,
        deltas in prop::collection::vec(1.0f64..100.0, 2..6),
        loudnesses in prop::collection::vec(0.0f64..20_000.0, 3..7),
        shift in -5_000.0f64..5_000.0,
    ) {
        let n = deltas.len().min(loudnesses.len());
        if n < 2 {
            return Ok(());
        }
        let samples = clap_samples(base_ts, &deltas[..n], &loudnesses[..n]);
        let shifted: Vec<Sample> = samples
            .iter()
            .map(|s| Sample { timestamp_ms: s.timestamp_ms + shift, loudness: s.loudness })
            .collect();

        let base = detector::detect(&samples, THRESHOLD);
        let shifted_onset = detector::detect(&shifted, THRESHOLD);

        match (base, shifted_onset) {
            (Some(b), Some(s)) => {
                prop_assert!((s.onset_ts_ms - (b.onset_ts_ms + shift)).abs() < 1e-6);
                prop_assert!((s.peak_loudness - b.peak_loudness).abs() < 1e-9);
            }
            (None, None) => {}
            (b, s) => prop_assert!(false, "detection outcome changed under a pure time shift: {b:?} vs {s:?}"),
        }
    }

    /// A completed sync round's offsets are always relative to the earliest
    /// (minimum) onset timestamp in that round, regardless of the actual
    /// values reported.
    #[test]
    fn sync_round_offsets_reference_the_earliest_listener(
        a in -10_000.0f64..10_000.0,
        b in -10_000.0f64..10_000.0,
        c in -10_000.0f64..10_000.0,
    ) {
        let ids = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let mut coordinator = SyncCoordinator::new();
        coordinator.accept("A", a, 0, 0, 5_000, 1, &ids);
        coordinator.accept("B", b, 0, 0, 5_000, 1, &ids);
        let outcome = coordinator.accept("C", c, 0, 0, 5_000, 1, &ids);

        let SyncOutcome::SessionComplete { offsets, .. } = outcome else {
            prop_assert!(false, "expected a single round to complete the session");
            return Ok(());
        };

        let t_min = a.min(b).min(c);
        prop_assert!((offsets["A"] - (t_min - a)).abs() < 1e-9);
        prop_assert!((offsets["B"] - (t_min - b)).abs() < 1e-9);
        prop_assert!((offsets["C"] - (t_min - c)).abs() < 1e-9);
        // The earliest listener's own offset is always exactly zero.
        let earliest_offset = if a <= b && a <= c {
            offsets["A"]
        } else if b <= a && b <= c {
            offsets["B"]
        } else {
            offsets["C"]
        };
        prop_assert!(earliest_offset.abs() < 1e-9);
    }

    /// The TDOA solver's result does not depend on which receiver in the
    /// caller-assembled triple is labeled the reference (index 0): permuting
    /// the three receivers (each keeping its own position/timestamp pairing)
    /// converges to the same physical position.
    #[test]
    fn solver_order_invariance(
        sx in -6.0f64..6.0,
        sy in -2.0f64..6.0,
        t0 in -500.0f64..500.0,
        perm_seed in 0u8..6,
    ) {
        let listeners = [(-5.0f64, -3.0f64), (5.0, -3.0), (0.0, 3.5)];
        let speed_of_sound = 343.0;
        let room = RoomBounds { x_min: -10.0, x_max: 10.0, y_min: -10.0, y_max: 10.0 };

        let receivers: Vec<Receiver> = listeners
            .iter()
            .map(|&(x, y)| {
                let dist = ((sx - x).powi(2) + (sy - y).powi(2)).sqrt();
                Receiver { x, y, timestamp_ms: t0 + (dist / speed_of_sound) * 1000.0 }
            })
            .collect();
        let receivers: [Receiver; 3] = [receivers[0], receivers[1], receivers[2]];

        let permutations: [[usize; 3]; 6] = [
            [0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0],
        ];
        let perm = permutations[perm_seed as usize];
        let permuted = [receivers[perm[0]], receivers[perm[1]], receivers[perm[2]]];

        let baseline = solve(&receivers, speed_of_sound, room);
        let reordered = solve(&permuted, speed_of_sound, room);

        match (baseline, reordered) {
            (Some(a), Some(b)) => {
                prop_assert!((a.position.x - b.position.x).abs() < 1e-2);
                prop_assert!((a.position.y - b.position.y).abs() < 1e-2);
            }
            (None, None) => {}
            (a, b) => prop_assert!(false, "permuting receiver order changed feasibility: {a:?} vs {b:?}"),
        }
    }
}
