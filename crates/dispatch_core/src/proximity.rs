//! Driver presence and proximity index.
//!
//! Keyed by region, each grid holds a forward cell→drivers map and a reverse
//! driver→cell map so heartbeat moves are incremental. Membership in the grid
//! is necessary but not sufficient to be matchable: the short-TTL presence
//! marker is authoritative, and readers gate on it. Stale grid entries whose
//! marker lapsed are purged lazily when a query encounters them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use h3o::CellIndex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{DispatchError, DispatchResult};
use crate::events::{topics, EventBus};
use crate::geo::{self, Coordinates, RegionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    Online,
    Offline,
    OnTrip,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Online => "ONLINE",
            DriverStatus::Offline => "OFFLINE",
            DriverStatus::OnTrip => "ON_TRIP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleTier {
    Economy,
    Premium,
    Xl,
}

impl VehicleTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleTier::Economy => "ECONOMY",
            VehicleTier::Premium => "PREMIUM",
            VehicleTier::Xl => "XL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverRecord {
    pub driver_id: String,
    pub status: DriverStatus,
    pub vehicle_type: VehicleTier,
    pub position: Coordinates,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub cell: CellIndex,
    pub region: String,
    pub last_update: DateTime<Utc>,
}

/// Heartbeat payload. Status is never touched here.
#[derive(Debug, Clone)]
pub struct LocationUpdate {
    pub position: Coordinates,
    pub timestamp: Option<DateTime<Utc>>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    /// Vehicle tier reported on sign-on; ignored for known drivers.
    pub vehicle_type: Option<VehicleTier>,
}

#[derive(Debug, Clone)]
pub struct LocationAck {
    pub region: String,
    pub cell: CellIndex,
}

#[derive(Debug, Clone)]
pub struct NearbyQuery {
    pub position: Coordinates,
    pub radius_km: f64,
    pub region: String,
    pub tier: Option<VehicleTier>,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct NearbyDriver {
    pub driver_id: String,
    pub distance_km: f64,
    pub position: Coordinates,
    pub vehicle_type: VehicleTier,
    pub status: DriverStatus,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
}

/// Per-region geo set: forward cell map plus reverse map for O(1) moves.
#[derive(Debug, Default)]
struct RegionGrid {
    drivers_by_cell: HashMap<CellIndex, Vec<String>>,
    cell_of: HashMap<String, CellIndex>,
}

impl RegionGrid {
    fn upsert(&mut self, driver_id: &str, cell: CellIndex) {
        if let Some(&previous) = self.cell_of.get(driver_id) {
            if previous == cell {
                return;
            }
            self.detach(driver_id, previous);
        }
        self.drivers_by_cell
            .entry(cell)
            .or_default()
            .push(driver_id.to_string());
        self.cell_of.insert(driver_id.to_string(), cell);
    }

    fn remove(&mut self, driver_id: &str) {
        if let Some(cell) = self.cell_of.remove(driver_id) {
            self.detach(driver_id, cell);
        }
    }

    fn detach(&mut self, driver_id: &str, cell: CellIndex) {
        if let Some(ids) = self.drivers_by_cell.get_mut(&cell) {
            ids.retain(|id| id != driver_id);
            if ids.is_empty() {
                self.drivers_by_cell.remove(&cell);
            }
        }
    }

    fn drivers_in_cells(&self, cells: &[CellIndex]) -> Vec<String> {
        let mut result = Vec::new();
        for cell in cells {
            if let Some(ids) = self.drivers_by_cell.get(cell) {
                result.extend(ids.iter().cloned());
            }
        }
        result
    }
}

#[derive(Debug)]
pub struct ProximityIndex {
    region_table: RegionTable,
    presence_ttl: Duration,
    drivers: DashMap<String, DriverRecord>,
    regions: DashMap<String, RegionGrid>,
    presence: crate::soft_state::TtlMap<String, ()>,
    bus: Arc<EventBus>,
}

impl ProximityIndex {
    pub fn new(region_table: RegionTable, presence_ttl: Duration, bus: Arc<EventBus>) -> Self {
        Self {
            region_table,
            presence_ttl,
            drivers: DashMap::new(),
            regions: DashMap::new(),
            presence: crate::soft_state::TtlMap::new(),
            bus,
        }
    }

    pub fn region_table(&self) -> &RegionTable {
        &self.region_table
    }

    /// Ingest a heartbeat: write the geo set, refresh presence, upsert
    /// metadata. An unknown driver is created ONLINE (a heartbeat is its
    /// sign-on); a known driver's status is never changed here.
    pub fn update_location(
        &self,
        driver_id: &str,
        update: LocationUpdate,
    ) -> DispatchResult<LocationAck> {
        update.position.validate()?;
        if driver_id.trim().is_empty() {
            return Err(DispatchError::Validation("driverId must not be empty".into()));
        }

        let region = self.region_table.infer(update.position).to_string();
        let cell = geo::cell_for(update.position)?;
        let last_update = update.timestamp.unwrap_or_else(Utc::now);

        {
            let mut record = self
                .drivers
                .entry(driver_id.to_string())
                .or_insert_with(|| DriverRecord {
                    driver_id: driver_id.to_string(),
                    status: DriverStatus::Online,
                    vehicle_type: update.vehicle_type.unwrap_or(VehicleTier::Economy),
                    position: update.position,
                    heading: update.heading,
                    speed: update.speed,
                    cell,
                    region: region.clone(),
                    last_update,
                });
            if record.region != region {
                // Crossed a region boundary: drop out of the old grid.
                let previous = record.region.clone();
                if let Some(mut grid) = self.regions.get_mut(&previous) {
                    grid.remove(driver_id);
                }
            }
            record.position = update.position;
            record.heading = update.heading.or(record.heading);
            record.speed = update.speed.or(record.speed);
            record.cell = cell;
            record.region = region.clone();
            record.last_update = last_update;
        }

        self.regions
            .entry(region.clone())
            .or_default()
            .upsert(driver_id, cell);
        self.presence
            .insert(driver_id.to_string(), (), self.presence_ttl);

        self.bus.publish(
            topics::DRIVER_LOCATION_UPDATED,
            driver_id,
            json!({
                "driverId": driver_id,
                "latitude": update.position.latitude,
                "longitude": update.position.longitude,
                "cell": cell.to_string(),
                "region": region,
                "heading": update.heading,
                "speed": update.speed,
                "timestamp": last_update,
            }),
        );

        Ok(LocationAck { region, cell })
    }

    /// Metadata-only status write. ON_TRIP and OFFLINE drivers are excluded
    /// from nearest-neighbor results by the read-side gate.
    pub fn set_status(&self, driver_id: &str, status: DriverStatus) -> DispatchResult<DriverStatus> {
        let previous = {
            let mut record = self
                .drivers
                .get_mut(driver_id)
                .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id}")))?;
            let previous = record.status;
            record.status = status;
            previous
        };

        self.bus.publish(
            topics::DRIVER_STATUS_CHANGED,
            driver_id,
            json!({
                "driverId": driver_id,
                "previousStatus": previous.as_str(),
                "newStatus": status.as_str(),
            }),
        );
        tracing::debug!(driver_id, from = previous.as_str(), to = status.as_str(), "driver status changed");
        Ok(previous)
    }

    /// Drivers within `radius_km`, ascending by distance, gated on
    /// `status == ONLINE`, a live presence marker, and tier when requested.
    pub fn find_nearby(&self, query: &NearbyQuery) -> DispatchResult<Vec<NearbyDriver>> {
        query.position.validate()?;
        if query.radius_km <= 0.0 {
            return Err(DispatchError::Validation("radiusKm must be positive".into()));
        }

        let origin = geo::cell_for(query.position)?;
        let rings = geo::ring_for_radius_km(query.radius_km);
        let disk: Vec<CellIndex> = origin.grid_disk::<Vec<_>>(rings);

        let candidates = match self.regions.get(&query.region) {
            Some(grid) => grid.drivers_in_cells(&disk),
            None => return Ok(Vec::new()),
        };

        let mut stale = Vec::new();
        let mut matches = Vec::new();
        for driver_id in candidates {
            if !self.presence.contains_live(&driver_id) {
                stale.push(driver_id);
                continue;
            }
            let Some(record) = self.drivers.get(&driver_id) else {
                stale.push(driver_id);
                continue;
            };
            if record.status != DriverStatus::Online {
                continue;
            }
            if let Some(tier) = query.tier {
                if record.vehicle_type != tier {
                    continue;
                }
            }
            let distance_km = geo::haversine_km(query.position, record.position);
            if distance_km > query.radius_km {
                continue;
            }
            matches.push(NearbyDriver {
                driver_id: record.driver_id.clone(),
                distance_km,
                position: record.position,
                vehicle_type: record.vehicle_type,
                status: record.status,
                heading: record.heading,
                speed: record.speed,
            });
        }

        if !stale.is_empty() {
            self.evict(&query.region, &stale);
        }

        matches.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(query.limit.max(1));
        Ok(matches)
    }

    /// Count-only variant of [`find_nearby`] for surge supply probes.
    pub fn count_nearby(&self, position: Coordinates, radius_km: f64, region: &str) -> u64 {
        let query = NearbyQuery {
            position,
            radius_km,
            region: region.to_string(),
            tier: None,
            limit: usize::MAX,
        };
        match self.find_nearby(&query) {
            Ok(drivers) => drivers.len() as u64,
            Err(_) => 0,
        }
    }

    pub fn get_location(&self, driver_id: &str, region: &str) -> Option<DriverRecord> {
        let record = self.drivers.get(driver_id)?;
        if record.region != region {
            return None;
        }
        Some(record.clone())
    }

    pub fn record(&self, driver_id: &str) -> Option<DriverRecord> {
        self.drivers.get(driver_id).map(|record| record.clone())
    }

    pub fn is_present(&self, driver_id: &str) -> bool {
        self.presence.contains_live(&driver_id.to_string())
    }

    /// Tear down drivers whose presence lapsed: grid entry and metadata.
    fn evict(&self, region: &str, driver_ids: &[String]) {
        if let Some(mut grid) = self.regions.get_mut(region) {
            for driver_id in driver_ids {
                grid.remove(driver_id);
            }
        }
        for driver_id in driver_ids {
            self.drivers.remove(driver_id);
            tracing::debug!(driver_id, region, "evicted driver with lapsed presence");
        }
    }
}
