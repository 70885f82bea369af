//! Configuration surface: listener positions, detection/sync/correlation
//! thresholds, room geometry and the speed of sound.
//!
//! Loaded from a JSON file at startup with a graceful fallback to sensible
//! defaults when the file is missing or malformed, mirroring the teacher's
//! `AppConfig::load_from_file` pattern.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::listener::Listener;
use crate::solver::RoomBounds;

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub listeners: [Listener; 3],
    pub event_window_ms: f64,
    pub clap_threshold: f64,
    pub sync_window_ms: u64,
    pub sync_rounds: usize,
    pub speed_of_sound: f64,
    pub room: RoomConfig,
}

/// Room extent, in meters, before the solver's fixed margin is applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoomConfig {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl From<RoomConfig> for RoomBounds {
    fn from(room: RoomConfig) -> Self {
        RoomBounds {
            x_min: room.x_min,
            x_max: room.x_max,
            y_min: room.y_min,
            y_max: room.y_max,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listeners: [
                Listener {
                    id: "A".to_string(),
                    x: -5.0,
                    y: -3.0,
                },
                Listener {
                    id: "B".to_string(),
                    x: 5.0,
                    y: -3.0,
                },
                Listener {
                    id: "C".to_string(),
                    x: 0.0,
                    y: 3.5,
                },
            ],
            event_window_ms: 200.0,
            clap_threshold: 10000.0,
            sync_window_ms: 5000,
            sync_rounds: 10,
            speed_of_sound: 343.0,
            room: RoomConfig {
                x_min: -10.0,
                x_max: 10.0,
                y_min: -10.0,
                y_max: 10.0,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a JSON file, falling back to defaults and
    /// logging a warning if the file is missing or malformed.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.as_ref().display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.as_ref().display(),
                        %err,
                        "failed to parse config JSON, using defaults"
                    );
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    %err,
                    "failed to read config file, using defaults"
                );
                Self::default()
            }
        }
    }

    pub fn listener_ids(&self) -> [String; 3] {
        [
            self.listeners[0].id.clone(),
            self.listeners[1].id.clone(),
            self.listeners[2].id.clone(),
        ]
    }

    pub fn listener_by_id(&self, id: &str) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.id == id)
    }
}
