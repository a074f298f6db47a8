use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use chrono::Local;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::scheduler::{ScheduleSummary, SchedulerHistory};
use crate::types::{DataSnapshot, Stats};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    /// Run without the automated session loop.
    pub manual: bool,
    /// Attach to an already running client instead of launching one.
    pub attach: bool,
    /// Start even outside the schedule window.
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct AgentSummary {
    pub name: String,
    pub stats: Stats,
    pub within_schedule: bool,
}

#[derive(Debug, Serialize)]
pub struct AgentDetail {
    pub name: String,
    pub stats: Stats,
    pub data: DataSnapshot,
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentSummary>> {
    let now = Local::now();
    let agents = state
        .registry
        .available()
        .into_iter()
        .map(|name| AgentSummary {
            stats: state.registry.status(&name),
            within_schedule: state.scheduler.is_within_schedule(&name, now),
            name,
        })
        .collect();
    Json(agents)
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<AgentDetail>, ApiError> {
    ensure_configured(&state, &name)?;
    Ok(Json(AgentDetail {
        stats: state.registry.status(&name),
        data: state.registry.data(&name).await,
        name,
    }))
}

/// Starts an agent in the background. Refused outside the schedule window
/// unless forced.
pub async fn start_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
    request: Option<Json<StartRequest>>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    ensure_configured(&state, &name)?;

    if !state.registry.status(&name).status.is_idle() {
        return Err(ApiError::Conflict(format!("supervisor {} is already running", name)));
    }

    let now = Local::now();
    if !request.force && !state.scheduler.is_within_schedule(&name, now) {
        return Err(ApiError::OutsideSchedule {
            next_window_start: state.scheduler.next_window_start(&name, now),
            agent: name,
        });
    }

    let registry = state.registry.clone();
    let agent = name.clone();
    tokio::spawn(async move {
        if let Err(e) = registry.start(&agent, request.attach, request.manual).await {
            log::warn!("{}: start requested over api failed: {}", agent, e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "agent": name, "status": "starting" })),
    ))
}

pub async fn stop_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_configured(&state, &name)?;
    state.registry.stop(&name).await;
    Ok(Json(serde_json::json!({ "agent": name, "status": "stopped" })))
}

pub async fn toggle_pause(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let paused = state
        .registry
        .toggle_pause(&name)
        .ok_or_else(|| ApiError::NotFound(format!("{} is not running", name)))?;
    Ok(Json(serde_json::json!({ "agent": name, "paused": paused })))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ScheduleSummary>, ApiError> {
    state
        .scheduler
        .summary(&name, Local::now())
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("agent {} is not configured", name)))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SchedulerHistory>, ApiError> {
    ensure_configured(&state, &name)?;
    Ok(Json(state.scheduler.history(&name).await?))
}

/// Streams supervisor events as server-sent events. Subscribers that fall
/// behind skip the events they missed.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe())
        .filter_map(|received| received.ok())
        .filter_map(|event| SseEvent::default().json_data(&event).ok())
        .map(Ok::<_, Infallible>);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn ensure_configured(state: &AppState, name: &str) -> Result<(), ApiError> {
    if state.registry.available().iter().any(|n| n == name) {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("agent {} is not configured", name)))
    }
}
