//! Pending queue + event correlator: accumulates per-listener adjusted-time
//! packets and, once one packet from every listener falls within
//! `event_window_ms` of each other, hands the triple to the TDOA solver.

use std::collections::VecDeque;

use crate::listener::PendingPacket;

/// Per-listener FIFO queues of packets awaiting peers.
#[derive(Debug, Default)]
pub struct PendingQueue {
    queues: std::collections::HashMap<String, VecDeque<PendingPacket>>,
}

/// Outcome of attempting to resolve a group after a new packet arrives.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    /// At least one listener has no pending packets.
    Pending { waiting_for: Vec<String> },
    /// A triple within `event_window_ms` was found and removed from the queue.
    Resolved {
        triple: [(String, PendingPacket); 3],
    },
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one packet to its listener's queue.
    pub fn push(&mut self, listener_id: &str, packet: PendingPacket) {
        self.queues
            .entry(listener_id.to_string())
            .or_default()
            .push_back(packet);
    }

    /// Evicts packets older than `10 * event_window_ms` relative to `now_ms`.
    pub fn evict_stale(&mut self, now_ms: u64, event_window_ms: f64) {
        let max_age_ms = (10.0 * event_window_ms) as u64;
        for queue in self.queues.values_mut() {
            queue.retain(|p| now_ms.saturating_sub(p.received_at_ms) <= max_age_ms);
        }
    }

    pub fn total_pending(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    /// Attempts to resolve a group, given the configured listener ids in
    /// enumeration order. Enumeration is the Cartesian product of each
    /// listener's queue in insertion (FIFO) order; the first triple whose
    /// span is within `event_window_ms` is accepted.
    pub fn try_resolve(
        &mut self,
        listener_ids: &[String],
        event_window_ms: f64,
    ) -> ResolveOutcome {
        let waiting_for: Vec<String> = listener_ids
            .iter()
            .filter(|id| self.queues.get(*id).map_or(true, |q| q.is_empty()))
            .cloned()
            .collect();
        if !waiting_for.is_empty() {
            return ResolveOutcome::Pending { waiting_for };
        }

        let per_listener: Vec<&VecDeque<PendingPacket>> = listener_ids
            .iter()
            .map(|id| self.queues.get(id).expect("checked nonempty above"))
            .collect();

        let mut best: Option<(usize, usize, usize)> = None;
        'outer: for (i0, p0) in per_listener[0].iter().enumerate() {
            for (i1, p1) in per_listener[1].iter().enumerate() {
                for (i2, p2) in per_listener[2].iter().enumerate() {
                    let ts = [p0.adjusted_ts, p1.adjusted_ts, p2.adjusted_ts];
                    let span = ts.iter().cloned().fold(f64::MIN, f64::max)
                        - ts.iter().cloned().fold(f64::MAX, f64::min);
                    if span <= event_window_ms {
                        best = Some((i0, i1, i2));
                        break 'outer;
                    }
                }
            }
        }

        let Some((i0, i1, i2)) = best else {
            return ResolveOutcome::Pending { waiting_for: vec![] };
        };

        let indices = [i0, i1, i2];
        let mut triple: Vec<(String, PendingPacket)> = Vec::with_capacity(3);
        for (slot, id) in listener_ids.iter().enumerate() {
            let queue = self.queues.get_mut(id).expect("checked nonempty above");
            let packet = queue.remove(indices[slot]).expect("index was enumerated from this queue");
            triple.push((id.clone(), packet));
        }

        ResolveOutcome::Resolved {
            triple: [
                triple[0].clone(),
                triple[1].clone(),
                triple[2].clone(),
            ],
        }
    }
}
