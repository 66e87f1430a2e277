//! Shared builders for dispatch integration tests.
#![allow(dead_code)] // not every suite uses every helper

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::config::DispatchConfig;
use dispatch_core::dispatch::types::{CreateRideInput, DriverAction, DriverResponseInput};
use dispatch_core::dispatch::DispatchEngine;
use dispatch_core::events::EventBus;
use dispatch_core::geo::{Coordinates, RegionTable};
use dispatch_core::proximity::{LocationUpdate, ProximityIndex, VehicleTier};
use dispatch_core::rides::PaymentMethod;
use dispatch_core::surge::SurgeEngine;

pub const BANGALORE_CENTER: Coordinates = Coordinates {
    latitude: 12.9716,
    longitude: 77.5946,
};

pub const BANGALORE_DESTINATION: Coordinates = Coordinates {
    latitude: 12.98,
    longitude: 77.61,
};

pub struct TestPlatform {
    pub engine: DispatchEngine,
    pub proximity: Arc<ProximityIndex>,
    pub surge: Arc<SurgeEngine>,
    pub bus: Arc<EventBus>,
}

/// Build the full stack with the given config, sharing one event bus.
pub fn platform_with_config(config: DispatchConfig) -> TestPlatform {
    let bus = Arc::new(EventBus::default());
    let proximity = Arc::new(ProximityIndex::new(
        RegionTable::default(),
        config.presence_ttl,
        Arc::clone(&bus),
    ));
    let surge = Arc::new(SurgeEngine::new(
        config.clone(),
        Arc::clone(&proximity),
        Arc::clone(&bus),
    ));
    let engine = DispatchEngine::new(
        config,
        Arc::clone(&proximity),
        Arc::clone(&surge),
        Arc::clone(&bus),
    );
    TestPlatform {
        engine,
        proximity,
        surge,
        bus,
    }
}

pub fn platform() -> TestPlatform {
    platform_with_config(DispatchConfig::default())
}

/// Config with offer deadlines short enough to observe timeouts in-test.
pub fn fast_timeout_config() -> DispatchConfig {
    DispatchConfig {
        offer_ttl: Duration::from_millis(30),
        offer_entry_slack: Duration::from_millis(200),
        ..DispatchConfig::default()
    }
}

pub fn seed_driver(proximity: &ProximityIndex, driver_id: &str, position: Coordinates) {
    seed_driver_with_tier(proximity, driver_id, position, VehicleTier::Economy);
}

pub fn seed_driver_with_tier(
    proximity: &ProximityIndex,
    driver_id: &str,
    position: Coordinates,
    tier: VehicleTier,
) {
    proximity
        .update_location(
            driver_id,
            LocationUpdate {
                position,
                timestamp: None,
                heading: None,
                speed: None,
                vehicle_type: Some(tier),
            },
        )
        .expect("seed heartbeat");
}

pub fn ride_input(rider_id: &str) -> CreateRideInput {
    CreateRideInput {
        rider_id: rider_id.to_string(),
        pickup: BANGALORE_CENTER,
        destination: BANGALORE_DESTINATION,
        tier: VehicleTier::Economy,
        payment_method: PaymentMethod::Card,
    }
}

pub fn accept(driver_id: &str) -> DriverResponseInput {
    DriverResponseInput {
        driver_id: driver_id.to_string(),
        action: DriverAction::Accept,
        reason: None,
    }
}

pub fn decline(driver_id: &str, reason: &str) -> DriverResponseInput {
    DriverResponseInput {
        driver_id: driver_id.to_string(),
        action: DriverAction::Decline,
        reason: Some(reason.to_string()),
    }
}
