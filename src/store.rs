//! The single logical store: mode, clock offsets, sync coordinator, pending
//! queue and the committed events log. All mutation happens behind one
//! `Mutex`, held only for the duration of a synchronous dispatch — never
//! across an `.await` point.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::correlator::{PendingQueue, ResolveOutcome};
use crate::detector;
use crate::listener::{DeviceReport, Event, Mode, Onset, PendingPacket, Position, Sample};
use crate::solver::{self, Receiver};
use crate::sync::{SyncCoordinator, SyncOutcome};

const MAX_RETAINED_EVENTS: usize = 100;

/// Everything the dispatcher owns and mutates in response to incoming
/// packets, mode changes, or status queries.
pub struct Store {
    pub config: AppConfig,
    mode: Mode,
    offsets: HashMap<String, f64>,
    sync: SyncCoordinator,
    pending: PendingQueue,
    events: Vec<Event>,
    next_event_id: u64,
    events_tx: broadcast::Sender<Event>,
}

/// Result of dispatching one batch of samples through `Store::dispatch_packet`.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    NoClap,
    SyncWaiting {
        reported: Vec<String>,
        waiting: Vec<String>,
    },
    SyncRoundComplete {
        round: usize,
        target_rounds: usize,
        round_offsets: HashMap<String, f64>,
    },
    SyncComplete {
        offsets: HashMap<String, f64>,
        std_devs: HashMap<String, f64>,
        rounds: usize,
        message: String,
    },
    LocalizePending {
        reported_devices: Vec<String>,
        waiting_for: Vec<String>,
    },
    Localized {
        event: Event,
    },
    Rejected {
        event: Event,
    },
}

impl Store {
    pub fn new(config: AppConfig) -> Self {
        let (events_tx, _rx) = broadcast::channel(128);
        Self {
            config,
            mode: Mode::default(),
            offsets: HashMap::new(),
            sync: SyncCoordinator::new(),
            pending: PendingQueue::new(),
            events: Vec::new(),
            next_event_id: 1,
            events_tx,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn offsets(&self) -> &HashMap<String, f64> {
        &self.offsets
    }

    pub fn is_synced(&self) -> bool {
        self.config
            .listener_ids()
            .iter()
            .all(|id| self.offsets.contains_key(id))
    }

    pub fn pending_packet_count(&self) -> usize {
        self.pending.total_pending()
    }

    pub fn total_events(&self) -> usize {
        self.events.len()
    }

    pub fn ws_client_count(&self) -> usize {
        self.events_tx.receiver_count()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    pub fn recent_events(&self) -> &[Event] {
        &self.events
    }

    pub fn latest_event(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Switches mode. Entering `sync` clears offsets; either transition
    /// clears the in-progress sync buffer.
    pub fn set_mode(&mut self, mode: Mode) {
        if mode == Mode::Sync {
            self.offsets.clear();
        }
        self.sync.reset();
        self.mode = mode;
    }

    /// Runs the onset detector over a batch of samples from one listener,
    /// then routes the onset through the sync coordinator or the pending
    /// queue + correlator depending on the current mode.
    ///
    /// Returns the outcome and, when an event was committed, that event —
    /// the caller broadcasts it on the WebSocket channel only after this
    /// call returns (and the store lock, if any, has been released).
    pub fn dispatch_packet(
        &mut self,
        listener_id: &str,
        samples: &[Sample],
    ) -> (DispatchOutcome, Option<Event>) {
        let onset = match detector::detect(samples, self.config.clap_threshold) {
            Some(onset) => onset,
            None => return (DispatchOutcome::NoClap, None),
        };

        match self.mode {
            Mode::Sync => (self.dispatch_sync(listener_id, onset), None),
            Mode::Localize => self.dispatch_localize(listener_id, onset),
        }
    }

    fn dispatch_sync(&mut self, listener_id: &str, onset: Onset) -> DispatchOutcome {
        let now = now_ms();
        let listener_ids = self.config.listener_ids().to_vec();

        if self.sync.is_fresh_session_start() {
            self.offsets.clear();
        }

        let outcome = self.sync.accept(
            listener_id,
            onset.onset_ts_ms,
            now,
            now,
            self.config.sync_window_ms,
            self.config.sync_rounds,
            &listener_ids,
        );

        match outcome {
            SyncOutcome::Waiting { reported, waiting } => {
                DispatchOutcome::SyncWaiting { reported, waiting }
            }
            SyncOutcome::RoundComplete {
                round,
                target_rounds,
                round_offsets,
            } => DispatchOutcome::SyncRoundComplete {
                round,
                target_rounds,
                round_offsets,
            },
            SyncOutcome::SessionComplete {
                offsets,
                std_devs,
                rounds,
            } => {
                self.offsets = offsets.clone();
                self.mode = Mode::Localize;

                let mut message = "sync complete".to_string();
                for (id, dev) in &std_devs {
                    if *dev > 5.0 {
                        tracing::warn!(listener_id = %id, std_dev = dev, "sync: dispersion warning");
                        message = format!(
                            "{message}; warning: listener {id} offset std dev {dev:.2}ms exceeds 5ms"
                        );
                    }
                }

                DispatchOutcome::SyncComplete {
                    offsets,
                    std_devs,
                    rounds,
                    message,
                }
            }
        }
    }

    fn dispatch_localize(
        &mut self,
        listener_id: &str,
        onset: Onset,
    ) -> (DispatchOutcome, Option<Event>) {
        let offset = self.offsets.get(listener_id).copied().unwrap_or(0.0);
        let adjusted_ts = onset.onset_ts_ms + offset;
        let now = now_ms();

        self.pending.push(
            listener_id,
            PendingPacket {
                raw_ts: onset.onset_ts_ms,
                adjusted_ts,
                loudness: onset.peak_loudness,
                received_at_ms: now,
            },
        );

        let listener_ids = self.config.listener_ids().to_vec();
        match self.pending.try_resolve(&listener_ids, self.config.event_window_ms) {
            ResolveOutcome::Pending { waiting_for } => {
                if waiting_for.is_empty() {
                    self.pending.evict_stale(now, self.config.event_window_ms);
                }
                let reported_devices: Vec<String> = listener_ids
                    .into_iter()
                    .filter(|id| !waiting_for.contains(id))
                    .collect();
                (
                    DispatchOutcome::LocalizePending {
                        reported_devices,
                        waiting_for,
                    },
                    None,
                )
            }
            ResolveOutcome::Resolved { triple } => {
                let event = self.commit_event(triple);
                let outcome = if event.position.is_some() {
                    DispatchOutcome::Localized {
                        event: event.clone(),
                    }
                } else {
                    DispatchOutcome::Rejected {
                        event: event.clone(),
                    }
                };
                (outcome, Some(event))
            }
        }
    }

    fn commit_event(&mut self, triple: [(String, PendingPacket); 3]) -> Event {
        let receivers: Vec<Receiver> = triple
            .iter()
            .map(|(id, packet)| {
                let listener = self
                    .config
                    .listener_by_id(id)
                    .expect("listener id came from configured set");
                Receiver {
                    x: listener.x,
                    y: listener.y,
                    timestamp_ms: packet.adjusted_ts,
                }
            })
            .collect();
        let receivers: [Receiver; 3] = [receivers[0], receivers[1], receivers[2]];

        let solution = solver::solve(&receivers, self.config.speed_of_sound, self.config.room.into());

        let timestamps: Vec<f64> = triple.iter().map(|(_, p)| p.adjusted_ts).collect();
        let timespan_ms = timestamps.iter().cloned().fold(f64::MIN, f64::max)
            - timestamps.iter().cloned().fold(f64::MAX, f64::min);

        let devices: Vec<DeviceReport> = triple
            .iter()
            .map(|(id, packet)| DeviceReport {
                device_id: id.clone(),
                adjusted_ts: packet.adjusted_ts,
                peak_loudness: packet.loudness,
            })
            .collect();

        let event = Event {
            id: self.next_event_id,
            position: solution.map(|s| Position {
                x: s.position.x,
                y: s.position.y,
            }),
            residual: solution.map(|s| s.residual),
            devices,
            timespan_ms,
            created_at: iso_now(),
        };
        self.next_event_id += 1;

        self.events.push(event.clone());
        if self.events.len() > MAX_RETAINED_EVENTS {
            let drop_count = self.events.len() - MAX_RETAINED_EVENTS;
            self.events.drain(0..drop_count);
        }

        event
    }

    /// Publishes a committed event to WebSocket subscribers. Must be called
    /// only after the store's mutex has been released.
    pub fn publish(&self, event: Event) {
        // A broadcast send errors only when there are no subscribers; that is
        // an ordinary, expected condition, not a failure.
        let _ = self.events_tx.send(event);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn iso_now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig::default()
    }

    fn sample(ts: f64, loudness: f64) -> Sample {
        Sample {
            timestamp_ms: ts,
            loudness,
        }
    }

    #[test]
    fn no_clap_below_threshold_produces_no_clap_outcome() {
        let mut store = Store::new(config());
        let (outcome, event) = store.dispatch_packet("A", &[sample(0.0, 1.0)]);
        assert!(matches!(outcome, DispatchOutcome::NoClap));
        assert!(event.is_none());
    }

    #[test]
    fn localize_mode_reports_pending_until_all_three_listeners_report() {
        let mut store = Store::new(config());
        let (outcome, _) = store.dispatch_packet("A", &[sample(0.0, 20000.0)]);
        assert!(matches!(outcome, DispatchOutcome::LocalizePending { .. }));
        assert_eq!(store.pending_packet_count(), 1);
    }

    #[test]
    fn full_sync_session_switches_mode_and_commits_offsets() {
        let mut store = Store::new(config());
        store.set_mode(Mode::Sync);

        let mut last = None;
        for _ in 0..config().sync_rounds {
            store.dispatch_packet("A", &[sample(115.0, 20000.0)]);
            store.dispatch_packet("B", &[sample(92.0, 20000.0)]);
            let (outcome, _) = store.dispatch_packet("C", &[sample(100.0, 20000.0)]);
            last = Some(outcome);
        }

        assert!(matches!(last.unwrap(), DispatchOutcome::SyncComplete { .. }));
        assert_eq!(store.mode(), Mode::Localize);
        assert!(store.is_synced());
    }

    #[test]
    fn event_ids_increase_by_one_starting_from_one() {
        let mut store = Store::new(config());
        store.set_mode(Mode::Localize);
        store.dispatch_packet("A", &[sample(0.0, 20000.0)]);
        store.dispatch_packet("B", &[sample(10.0, 20000.0)]);
        let (_, event) = store.dispatch_packet("C", &[sample(20.0, 20000.0)]);
        assert_eq!(event.unwrap().id, 1);
    }
}
