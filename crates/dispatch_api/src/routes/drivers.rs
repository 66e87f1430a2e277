//! Driver presence endpoints: heartbeats, nearest-neighbor queries, status.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use dispatch_core::geo::Coordinates;
use dispatch_core::proximity::{DriverStatus, LocationUpdate, NearbyDriver, NearbyQuery, VehicleTier};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{validation, ApiError, ValidatedJson};
use crate::state::AppState;

const MIN_RADIUS_KM: f64 = 0.1;
const MAX_RADIUS_KM: f64 = 50.0;
const MAX_LIMIT: usize = 50;
const DEFAULT_NEARBY_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBody {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub vehicle_type: Option<VehicleTier>,
}

pub async fn update_location(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
    ValidatedJson(body): ValidatedJson<LocationBody>,
) -> Result<Json<Value>, ApiError> {
    let ack = state.proximity().update_location(
        &driver_id,
        LocationUpdate {
            position: Coordinates::new(body.latitude, body.longitude),
            timestamp: body.timestamp,
            heading: body.heading,
            speed: body.speed,
            vehicle_type: body.vehicle_type,
        },
    )?;
    Ok(Json(json!({
        "success": true,
        "driverId": driver_id,
        "cell": ack.cell.to_string(),
        "region": ack.region,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyParams {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub vehicle_type: Option<VehicleTier>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NearbyDriverDto {
    driver_id: String,
    distance_km: f64,
    latitude: f64,
    longitude: f64,
    vehicle_type: VehicleTier,
    status: DriverStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
}

impl From<NearbyDriver> for NearbyDriverDto {
    fn from(driver: NearbyDriver) -> Self {
        Self {
            driver_id: driver.driver_id,
            distance_km: driver.distance_km,
            latitude: driver.position.latitude,
            longitude: driver.position.longitude,
            vehicle_type: driver.vehicle_type,
            status: driver.status,
            heading: driver.heading,
            speed: driver.speed,
        }
    }
}

pub async fn find_nearby(
    State(state): State<AppState>,
    Query(params): Query<NearbyParams>,
) -> Result<Json<Value>, ApiError> {
    let radius_km = params.radius_km.unwrap_or(5.0);
    if !(MIN_RADIUS_KM..=MAX_RADIUS_KM).contains(&radius_km) {
        return Err(validation(format!(
            "radiusKm must be within [{MIN_RADIUS_KM}, {MAX_RADIUS_KM}]"
        )));
    }
    let limit = params.limit.unwrap_or(DEFAULT_NEARBY_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(validation(format!("limit must be within [1, {MAX_LIMIT}]")));
    }

    let position = Coordinates::new(params.latitude, params.longitude);
    let region = match params.region {
        Some(region) if !region.trim().is_empty() => region,
        _ => {
            position.validate()?;
            state.proximity().region_table().infer(position).to_string()
        }
    };

    let drivers: Vec<NearbyDriverDto> = state
        .proximity()
        .find_nearby(&NearbyQuery {
            position,
            radius_km,
            region,
            tier: params.vehicle_type,
            limit,
        })?
        .into_iter()
        .map(NearbyDriverDto::from)
        .collect();

    Ok(Json(json!({
        "count": drivers.len(),
        "drivers": drivers,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: DriverStatus,
}

pub async fn set_status(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
    ValidatedJson(body): ValidatedJson<StatusBody>,
) -> Result<Json<Value>, ApiError> {
    state.proximity().set_status(&driver_id, body.status)?;
    Ok(Json(json!({
        "driverId": driver_id,
        "status": body.status.as_str(),
    })))
}
