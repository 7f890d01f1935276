//! HTTP request handlers.

use super::AppState;
use crate::db::{EntityType, PingResult, PingResultStore};
use crate::monitor::Endpoint;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// API: Monitor
// ============================================================================

/// One endpoint, or a batch checked concurrently.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MonitorRequest {
    One(Endpoint),
    Many(Vec<Endpoint>),
}

#[derive(Debug, Serialize)]
pub struct MonitorOutcome {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub results: Vec<PingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn handle_monitor(
    State(state): State<AppState>,
    Json(req): Json<MonitorRequest>,
) -> impl IntoResponse {
    match req {
        MonitorRequest::One(endpoint) => match state.monitor.monitor_endpoint(&endpoint).await {
            Ok(results) => Json(results).into_response(),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        },
        MonitorRequest::Many(endpoints) => {
            let keys: Vec<_> = endpoints
                .iter()
                .map(|e| (e.entity_type, e.entity_id))
                .collect();
            let outcomes: Vec<MonitorOutcome> = state
                .monitor
                .monitor_batch(endpoints, state.config.max_in_flight)
                .await
                .into_iter()
                .zip(keys)
                .map(|(result, (entity_type, entity_id))| match result {
                    Ok(results) => MonitorOutcome {
                        entity_type,
                        entity_id,
                        results,
                        error: None,
                    },
                    Err(e) => MonitorOutcome {
                        entity_type,
                        entity_id,
                        results: Vec::new(),
                        error: Some(e.to_string()),
                    },
                })
                .collect();
            Json(outcomes).into_response()
        }
    }
}

// ============================================================================
// API: Health and history
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    #[serde(default)]
    pub window_hours: Option<u32>,
}

pub async fn handle_health(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, i64)>,
    Query(query): Query<HealthQuery>,
) -> impl IntoResponse {
    let entity_type: EntityType = match entity_type.parse() {
        Ok(t) => t,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    let window_hours = query.window_hours.unwrap_or(state.config.window_hours);

    match state.aggregator.summarize(entity_type, entity_id, window_hours) {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    #[serde(default)]
    pub since: Option<String>,
}

pub async fn handle_results(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, i64)>,
    Query(query): Query<ResultsQuery>,
) -> impl IntoResponse {
    let entity_type: EntityType = match entity_type.parse() {
        Ok(t) => t,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let since = match query.since.as_deref() {
        Some(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => {
                return (StatusCode::BAD_REQUEST, format!("invalid since: {}", s)).into_response()
            }
        },
        None => Utc::now() - ChronoDuration::hours(1),
    };

    match state.store.query_by_entity(entity_type, entity_id, since) {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_profiles(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.profiles().clone())
}
