//! Clock-offset synchronization: accumulates one round per listener, derives
//! a per-round offset relative to the earliest listener, and after
//! `sync_rounds` rounds commits the per-listener median offset as the
//! active correction.

use std::collections::HashMap;

/// One listener's pending entry within the round currently being assembled.
#[derive(Debug, Clone, Copy)]
struct BufferEntry {
    onset_ts_ms: f64,
    received_at_ms: u64,
}

/// Accumulates sync rounds and, once enough have been collected, commits
/// per-listener clock offsets.
#[derive(Debug, Default)]
pub struct SyncCoordinator {
    buffer: HashMap<String, BufferEntry>,
    rounds: Vec<HashMap<String, f64>>,
}

/// Result of feeding one onset into the coordinator.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Round still missing reports from some listeners.
    Waiting {
        reported: Vec<String>,
        waiting: Vec<String>,
    },
    /// This round just completed; more rounds are still needed.
    RoundComplete {
        round: usize,
        target_rounds: usize,
        round_offsets: HashMap<String, f64>,
    },
    /// All rounds collected; offsets committed.
    SessionComplete {
        offsets: HashMap<String, f64>,
        std_devs: HashMap<String, f64>,
        rounds: usize,
    },
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all accumulated state — buffer and completed rounds. Called on
    /// an explicit mode transition into `sync`.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.rounds.clear();
    }

    /// True when no round has completed and the buffer is empty — i.e. the
    /// next `accept()` call starts a brand new session, at which point the
    /// store must clear any previously committed `ClockOffset`s.
    pub fn is_fresh_session_start(&self) -> bool {
        self.rounds.is_empty() && self.buffer.is_empty()
    }

    /// Feeds one listener's onset into the current round.
    ///
    /// `all_listener_ids` is the full configured set, used to report which
    /// listeners are still pending and to detect round completion.
    pub fn accept(
        &mut self,
        listener_id: &str,
        onset_ts_ms: f64,
        received_at_ms: u64,
        now_ms: u64,
        sync_window_ms: u64,
        sync_rounds: usize,
        all_listener_ids: &[String],
    ) -> SyncOutcome {
        let stale = self
            .buffer
            .values()
            .any(|e| now_ms.saturating_sub(e.received_at_ms) > sync_window_ms);
        if stale {
            tracing::debug!("sync: partial round aged past sync_window_ms, clearing buffer");
            self.buffer.clear();
        }

        self.buffer.insert(
            listener_id.to_string(),
            BufferEntry {
                onset_ts_ms,
                received_at_ms,
            },
        );

        if self.buffer.len() < all_listener_ids.len() {
            let reported: Vec<String> = all_listener_ids
                .iter()
                .filter(|id| self.buffer.contains_key(*id))
                .cloned()
                .collect();
            let waiting: Vec<String> = all_listener_ids
                .iter()
                .filter(|id| !self.buffer.contains_key(*id))
                .cloned()
                .collect();
            return SyncOutcome::Waiting { reported, waiting };
        }

        let t_min = self
            .buffer
            .values()
            .map(|e| e.onset_ts_ms)
            .fold(f64::INFINITY, f64::min);

        let round_offsets: HashMap<String, f64> = self
            .buffer
            .iter()
            .map(|(id, entry)| (id.clone(), t_min - entry.onset_ts_ms))
            .collect();

        self.rounds.push(round_offsets.clone());
        self.buffer.clear();

        if self.rounds.len() < sync_rounds {
            return SyncOutcome::RoundComplete {
                round: self.rounds.len(),
                target_rounds: sync_rounds,
                round_offsets,
            };
        }

        let mut offsets = HashMap::new();
        let mut std_devs = HashMap::new();
        for id in all_listener_ids {
            let mut values: Vec<f64> = self.rounds.iter().filter_map(|r| r.get(id).copied()).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let median = median_of(&values);
            let std_dev = population_std_dev(&values);
            if std_dev > 5.0 {
                tracing::warn!(listener_id = %id, std_dev, "sync: per-listener offset dispersion exceeds 5ms");
            }
            offsets.insert(id.clone(), median);
            std_devs.insert(id.clone(), std_dev);
        }

        let completed_rounds = self.rounds.len();
        self.rounds.clear();

        SyncOutcome::SessionComplete {
            offsets,
            std_devs,
            rounds: completed_rounds,
        }
    }
}

fn median_of(sorted_values: &[f64]) -> f64 {
    let n = sorted_values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted_values[n / 2]
    } else {
        (sorted_values[n / 2 - 1] + sorted_values[n / 2]) / 2.0
    }
}

fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean: f64 = values.iter().sum::<f64>() / values.len() as f64;
    let variance: f64 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
