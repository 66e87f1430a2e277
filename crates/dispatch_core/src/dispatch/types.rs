//! Request and response shapes for the dispatch engine entry points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;
use crate::proximity::VehicleTier;
use crate::rides::{OfferStatus, PaymentMethod, RideStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideInput {
    pub rider_id: String,
    pub pickup: Coordinates,
    pub destination: Coordinates,
    pub tier: VehicleTier,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedDriver {
    pub driver_id: String,
    pub distance_km: f64,
    pub eta_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideResponse {
    pub id: String,
    pub status: RideStatus,
    pub rider_id: String,
    pub pickup: Coordinates,
    pub destination: Coordinates,
    pub tier: VehicleTier,
    pub payment_method: PaymentMethod,
    pub surge_multiplier: f64,
    pub estimated_fare: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_driver: Option<MatchedDriver>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_failure_reason: Option<String>,
    pub match_attempts: u32,
    pub events_published: bool,
}

/// Result of intake: the response plus whether it was served from the
/// idempotency cache.
#[derive(Debug, Clone)]
pub struct CreateRideOutcome {
    pub response: CreateRideResponse,
    pub replayed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverAction {
    Accept,
    Decline,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverResponseInput {
    pub driver_id: String,
    pub action: DriverAction,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Accepted,
    Reassigned,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverResponseOutcome {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutOutcome {
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferSummary {
    pub offer_id: String,
    pub driver_id: String,
    pub status: OfferStatus,
    pub distance_km: f64,
    pub expires_at: DateTime<Utc>,
}

/// Read model for a ride, augmented with the current offer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RideDetails {
    pub id: String,
    pub rider_id: String,
    pub status: RideStatus,
    pub pickup: Coordinates,
    pub destination: Coordinates,
    pub tier: VehicleTier,
    pub payment_method: PaymentMethod,
    pub region: String,
    pub surge_multiplier: f64,
    pub estimated_fare: f64,
    pub match_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_offer: Option<OfferSummary>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
