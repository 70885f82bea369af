use std::collections::HashMap;
use std::sync::MutexGuard;

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ApiError, InternalError, ModeError, ValidationError};
use crate::listener::{Event, Mode, Sample};
use crate::store::{DispatchOutcome, Store};

use super::ws;
use super::AppState;

fn lock_store(state: &AppState) -> Result<MutexGuard<'_, Store>, InternalError> {
    state.store.lock().map_err(|_| InternalError::PoisonedStore)
}

/// Wire representation of one sample in a `POST /packet` body. Fields are
/// deserialized permissively (`Option<Value>`, missing key -> `None`) so a
/// wrong-typed or absent field surfaces as a `ValidationError` from
/// `validate_batch` rather than as axum's own `JsonRejection`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketSample {
    pub device_id: Option<serde_json::Value>,
    pub timestamp: Option<serde_json::Value>,
    pub loudness_db: Option<serde_json::Value>,
}

/// One fully type-checked sample, produced by `validate_batch`.
struct ParsedSample {
    device_id: String,
    timestamp: f64,
    loudness_db: f64,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeResponse {
    pub mode: &'static str,
    pub offsets: HashMap<String, f64>,
    pub is_synced: bool,
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub count: usize,
    pub events: Vec<Event>,
}

#[derive(Debug, Serialize)]
pub struct LatestResponse {
    pub event: Option<Event>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusConfig {
    pub devices: [String; 3],
    pub event_window_ms: f64,
    pub speed_of_sound: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSync {
    pub offsets: HashMap<String, f64>,
    pub is_synced: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub mode: &'static str,
    pub config: StatusConfig,
    pub sync: StatusSync,
    pub pending_packets: usize,
    pub total_events: usize,
    pub ws_clients: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/packet", post(post_packet))
        .route("/mode", get(get_mode).post(post_mode))
        .route("/results", get(get_results))
        .route("/results/latest", get(get_results_latest))
        .route("/status", get(get_status))
        .route("/ws", get(ws::upgrade))
        .with_state(state)
}

fn mode_str(mode: Mode) -> &'static str {
    match mode {
        Mode::Sync => "sync",
        Mode::Localize => "localize",
    }
}

fn numeric_field(value: &Option<serde_json::Value>) -> Result<f64, ValidationError> {
    match value.as_ref().and_then(|v| v.as_f64()) {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(ValidationError::NonNumericField),
    }
}

fn device_id_field(value: &Option<serde_json::Value>) -> Result<String, ValidationError> {
    match value.as_ref().and_then(|v| v.as_str()) {
        Some(s) => Ok(s.to_string()),
        None => Err(ValidationError::NonNumericField),
    }
}

fn validate_batch(body: &[PacketSample]) -> Result<Vec<ParsedSample>, ValidationError> {
    if body.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }

    let mut parsed = Vec::with_capacity(body.len());
    for sample in body {
        parsed.push(ParsedSample {
            device_id: device_id_field(&sample.device_id)?,
            timestamp: numeric_field(&sample.timestamp)?,
            loudness_db: numeric_field(&sample.loudness_db)?,
        });
    }

    let first_device = parsed[0].device_id.clone();
    for sample in &parsed[1..] {
        if sample.device_id != first_device {
            return Err(ValidationError::MixedDevices(
                first_device,
                sample.device_id.clone(),
            ));
        }
    }
    Ok(parsed)
}

async fn post_packet(
    State(state): State<AppState>,
    Json(body): Json<Vec<PacketSample>>,
) -> Result<Response, ApiError> {
    let parsed = validate_batch(&body)?;
    let device_id = parsed[0].device_id.clone();

    {
        let known = lock_store(&state)?.config.listener_by_id(&device_id).is_some();
        if !known {
            return Err(ValidationError::UnknownDevice(device_id).into());
        }
    }

    let samples: Vec<Sample> = parsed
        .iter()
        .map(|s| Sample {
            timestamp_ms: s.timestamp,
            loudness: s.loudness_db,
        })
        .collect();

    let (outcome, published) = {
        let mut store = lock_store(&state)?;
        let mode = store.mode();
        let (outcome, event) = store.dispatch_packet(&device_id, &samples);
        (build_packet_response(mode, outcome), event)
    };

    if let Some(event) = published {
        lock_store(&state)?.publish(event);
    }

    Ok(outcome)
}

fn build_packet_response(mode: Mode, outcome: DispatchOutcome) -> Response {
    let mode_name = mode_str(mode);
    match outcome {
        DispatchOutcome::NoClap => Json(json!({
            "mode": mode_name,
            "status": "no_clap",
            "message": "no onset above threshold",
        }))
        .into_response(),
        DispatchOutcome::SyncWaiting { reported, waiting } => Json(json!({
            "mode": "sync",
            "status": "waiting",
            "reported": reported,
            "waiting": waiting,
            "message": "waiting on remaining listeners for this round",
        }))
        .into_response(),
        DispatchOutcome::SyncRoundComplete {
            round,
            target_rounds,
            round_offsets,
        } => Json(json!({
            "mode": "sync",
            "status": "round_complete",
            "round": round,
            "targetRounds": target_rounds,
            "roundOffsets": round_offsets,
            "message": format!("round {round}/{target_rounds} complete"),
        }))
        .into_response(),
        DispatchOutcome::SyncComplete {
            offsets,
            std_devs,
            rounds,
            message,
        } => Json(json!({
            "mode": "localize",
            "status": "complete",
            "offsets": offsets,
            "stdDevs": std_devs,
            "rounds": rounds,
            "message": message,
        }))
        .into_response(),
        DispatchOutcome::LocalizePending {
            reported_devices,
            waiting_for,
        } => Json(json!({
            "mode": "localize",
            "status": "pending",
            "reportedDevices": reported_devices,
            "waitingFor": waiting_for,
            "message": "awaiting peers to close out this event",
        }))
        .into_response(),
        DispatchOutcome::Localized { event } => Json(json!({
            "mode": "localize",
            "status": "localized",
            "event": event,
        }))
        .into_response(),
        DispatchOutcome::Rejected { event } => Json(json!({
            "mode": "localize",
            "status": "rejected",
            "message": "solver rejected this group: infeasible geometry or out-of-room solution",
            "event": event,
        }))
        .into_response(),
    }
}

async fn get_mode(State(state): State<AppState>) -> Result<Json<ModeResponse>, ApiError> {
    let store = lock_store(&state)?;
    Ok(Json(ModeResponse {
        mode: mode_str(store.mode()),
        offsets: store.offsets().clone(),
        is_synced: store.is_synced(),
    }))
}

async fn post_mode(
    State(state): State<AppState>,
    Json(body): Json<ModeRequest>,
) -> Result<Json<ModeResponse>, ApiError> {
    let mode = match body.mode.as_str() {
        "sync" => Mode::Sync,
        "localize" => Mode::Localize,
        other => return Err(ModeError::Unknown(other.to_string()).into()),
    };

    let mut store = lock_store(&state)?;
    store.set_mode(mode);
    Ok(Json(ModeResponse {
        mode: mode_str(store.mode()),
        offsets: store.offsets().clone(),
        is_synced: store.is_synced(),
    }))
}

async fn get_results(State(state): State<AppState>) -> Json<ResultsResponse> {
    let store = state
        .store
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let events = store.recent_events().to_vec();
    Json(ResultsResponse {
        count: events.len(),
        events,
    })
}

async fn get_results_latest(State(state): State<AppState>) -> Json<LatestResponse> {
    let store = state
        .store
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    Json(LatestResponse {
        event: store.latest_event().cloned(),
    })
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let store = state
        .store
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    Json(StatusResponse {
        mode: mode_str(store.mode()),
        config: StatusConfig {
            devices: store.config.listener_ids(),
            event_window_ms: store.config.event_window_ms,
            speed_of_sound: store.config.speed_of_sound,
        },
        sync: StatusSync {
            offsets: store.offsets().clone(),
            is_synced: store.is_synced(),
        },
        pending_packets: store.pending_packet_count(),
        total_events: store.total_events(),
        ws_clients: store.ws_client_count(),
    })
}
