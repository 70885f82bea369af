//! Core data model: listeners, samples, onsets, pending packets and events.
//!
//! These types carry no behavior of their own beyond small helpers; the
//! algorithms that produce and consume them live in [`crate::detector`],
//! [`crate::sync`], [`crate::correlator`] and [`crate::solver`].

use serde::{Deserialize, Serialize};

/// A listener's stable configured identity and fixed 2-D position in meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

impl Listener {
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn distance_to(&self, other: &Listener) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// A single loudness reading reported by one listener.
///
/// Samples are ephemeral: they are consumed by the onset detector and never
/// stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp_ms: f64,
    pub loudness: f64,
}

/// A sub-sample-accurate event-arrival timestamp reconstructed by the
/// detector from a batch of samples belonging to one listener.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Onset {
    pub onset_ts_ms: f64,
    pub peak_loudness: f64,
}

/// A packet sitting in the localize-mode pending queue, awaiting peers from
/// the other two listeners to close out an event.
#[derive(Debug, Clone, Copy)]
pub struct PendingPacket {
    pub raw_ts: f64,
    pub adjusted_ts: f64,
    pub loudness: f64,
    pub received_at_ms: u64,
}

/// One listener's contribution to a committed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    pub device_id: String,
    pub adjusted_ts: f64,
    pub peak_loudness: f64,
}

/// A 2-D position, in meters, in the room's coordinate system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A committed, monotonically numbered acoustic event.
///
/// `position` and `residual` are `None` when the TDOA solver rejected the
/// group (infeasible geometry or an out-of-room solution) — the event is
/// still recorded so operators can see that a group was attempted and why
/// it failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: u64,
    pub position: Option<Position>,
    pub residual: Option<f64>,
    pub devices: Vec<DeviceReport>,
    pub timespan_ms: f64,
    pub created_at: String,
}

/// Two-state operating mode. Initial mode is `Localize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Sync,
    Localize,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Localize
    }
}
