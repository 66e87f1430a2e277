//! Route table for the public API.

use axum::routing::{get, patch, post};
use axum::Router;

use crate::state::AppState;

mod drivers;
mod rides;
mod surge;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/drivers/{driverId}/location",
            post(drivers::update_location),
        )
        .route("/api/v1/drivers/nearby", get(drivers::find_nearby))
        .route(
            "/api/v1/drivers/{driverId}/status",
            patch(drivers::set_status),
        )
        .route("/api/v1/rides", post(rides::create_ride))
        .route("/api/v1/rides/{rideId}", get(rides::get_ride))
        .route(
            "/api/v1/rides/{rideId}/driver-response",
            post(rides::driver_response),
        )
        .route(
            "/api/v1/rides/{rideId}/check-timeout",
            post(rides::check_timeout),
        )
        .route("/api/v1/rides/{rideId}/cancel", post(rides::cancel_ride))
        .route("/api/v1/surge/{cell}", get(surge::get_cell))
        .route("/api/v1/surge/calculate", post(surge::calculate))
        .route("/api/v1/surge/region/{region}", get(surge::region_zones))
        .route("/api/v1/surge/demand", post(surge::increment_demand))
        .with_state(state)
}
