//! Ride intake and the driver-response/timeout/cancel entry points.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use dispatch_core::dispatch::types::{CreateRideInput, DriverResponseInput};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ValidatedJson};
use crate::state::AppState;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

pub async fn create_ride(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(input): ValidatedJson<CreateRideInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state.engine.create_ride_request(input, idempotency_key)?;
    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let body = serde_json::to_value(&outcome.response)
        .map_err(|err| dispatch_core::error::DispatchError::Internal(err.to_string()))?;
    Ok((status, Json(body)))
}

pub async fn get_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let details = state.engine.get_ride_details(&ride_id)?;
    let body = serde_json::to_value(&details)
        .map_err(|err| dispatch_core::error::DispatchError::Internal(err.to_string()))?;
    Ok(Json(body))
}

pub async fn driver_response(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
    ValidatedJson(input): ValidatedJson<DriverResponseInput>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.engine.handle_driver_response(&ride_id, input)?;
    let body = serde_json::to_value(&outcome)
        .map_err(|err| dispatch_core::error::DispatchError::Internal(err.to_string()))?;
    Ok(Json(body))
}

pub async fn check_timeout(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.engine.check_timeout(&ride_id)?;
    Ok(Json(json!({ "timedOut": outcome.timed_out })))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> Result<Json<Value>, ApiError> {
    let reason = body.and_then(|Json(body)| body.reason);
    let status = state.engine.cancel_ride(&ride_id, reason.as_deref())?;
    Ok(Json(json!({
        "id": ride_id,
        "status": status.as_str(),
    })))
}
