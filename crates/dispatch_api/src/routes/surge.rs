//! Surge pricing endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use dispatch_core::geo::Coordinates;
use dispatch_core::surge::SurgeReading;
use h3o::CellIndex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{validation, ApiError, ValidatedJson};
use crate::state::AppState;

/// Cells cross the HTTP boundary in their canonical hex form.
fn parse_cell(raw: &str) -> Result<CellIndex, ApiError> {
    raw.parse::<CellIndex>()
        .map_err(|err| validation(format!("invalid cell '{raw}': {err}")))
}

fn reading_to_json(reading: &SurgeReading) -> Value {
    json!({
        "cell": reading.cell.to_string(),
        "region": reading.region,
        "multiplier": reading.multiplier,
        "supply": reading.supply,
        "demand": reading.demand,
        "updatedAt": reading.updated_at,
        "validUntil": reading.valid_until,
    })
}

pub async fn get_cell(
    State(state): State<AppState>,
    Path(cell): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cell = parse_cell(&cell)?;
    let reading = state.surge().get_surge_for_cell(cell);
    Ok(Json(reading_to_json(&reading)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateBody {
    pub cell: String,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
}

pub async fn calculate(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<CalculateBody>,
) -> Result<Json<Value>, ApiError> {
    if body.region.trim().is_empty() {
        return Err(validation("region must not be empty"));
    }
    let cell = parse_cell(&body.cell)?;
    let reading = state.surge().calculate_surge(
        cell,
        &body.region,
        Coordinates::new(body.latitude, body.longitude),
    )?;
    Ok(Json(reading_to_json(&reading)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneParams {
    #[serde(default)]
    pub min_surge: Option<f64>,
}

pub async fn region_zones(
    State(state): State<AppState>,
    Path(region): Path<String>,
    Query(params): Query<ZoneParams>,
) -> Result<Json<Value>, ApiError> {
    let min_surge = params.min_surge.unwrap_or(1.0);
    let zones: Vec<Value> = state
        .surge()
        .get_surge_zones_for_region(&region, min_surge)
        .iter()
        .map(reading_to_json)
        .collect();
    Ok(Json(json!({
        "region": region,
        "zones": zones,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandBody {
    pub cell: String,
    pub region: String,
}

pub async fn increment_demand(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<DemandBody>,
) -> Result<Json<Value>, ApiError> {
    if body.region.trim().is_empty() {
        return Err(validation("region must not be empty"));
    }
    let cell = parse_cell(&body.cell)?;
    let count = state.surge().increment_demand(cell, &body.region);
    Ok(Json(json!({
        "cell": body.cell,
        "demandCount": count,
    })))
}
