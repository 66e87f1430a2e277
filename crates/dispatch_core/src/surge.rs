//! Demand/supply-driven surge multiplier per geo cell.
//!
//! Demand is a TTL-windowed counter incremented at ride intake. Supply is a
//! live probe of the proximity index. The multiplier is smoothed, clamped to
//! the configured band, rounded to one decimal, and cached per cell with a
//! fixed TTL. Reads on the dispatch path are non-fatal and default to 1.0.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use h3o::CellIndex;
use serde_json::json;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::events::{topics, EventBus};
use crate::geo::{self, Coordinates};
use crate::proximity::ProximityIndex;
use crate::soft_state::TtlMap;

#[derive(Debug, Clone, PartialEq)]
pub struct SurgeReading {
    pub cell: CellIndex,
    pub region: String,
    pub multiplier: f64,
    pub supply: u64,
    pub demand: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl SurgeReading {
    /// Sentinel for cells with no cached entry.
    fn sentinel(cell: CellIndex, region: String, floor: f64) -> Self {
        Self {
            cell,
            region,
            multiplier: floor,
            supply: 0,
            demand: 0,
            updated_at: None,
            valid_until: None,
        }
    }
}

#[derive(Debug, Clone)]
struct DemandWindow {
    count: u64,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct SurgeEngine {
    config: DispatchConfig,
    proximity: Arc<ProximityIndex>,
    bus: Arc<EventBus>,
    cache: TtlMap<CellIndex, SurgeReading>,
    demand: DashMap<CellIndex, DemandWindow>,
    active_cells: DashMap<String, HashSet<CellIndex>>,
}

impl SurgeEngine {
    pub fn new(config: DispatchConfig, proximity: Arc<ProximityIndex>, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            proximity,
            bus,
            cache: TtlMap::new(),
            demand: DashMap::new(),
            active_cells: DashMap::new(),
        }
    }

    /// Atomic demand increment. A fresh or expired window restarts at 1 with
    /// a new deadline; increments within a live window do not extend it.
    pub fn increment_demand(&self, cell: CellIndex, _region: &str) -> u64 {
        let now = Instant::now();
        let mut window = self.demand.entry(cell).or_insert_with(|| DemandWindow {
            count: 0,
            expires_at: now + self.config.demand_counter_ttl,
        });
        if window.expires_at <= now {
            window.count = 0;
            window.expires_at = now + self.config.demand_counter_ttl;
        }
        window.count += 1;
        window.count
    }

    /// Current demand within the live window, if any.
    fn demand_for(&self, cell: CellIndex) -> u64 {
        match self.demand.get(&cell) {
            Some(window) if window.expires_at > Instant::now() => window.count,
            _ => 0,
        }
    }

    /// Cached reading for a cell, or the 1.0 sentinel.
    pub fn get_surge_for_cell(&self, cell: CellIndex) -> SurgeReading {
        let region = self
            .proximity
            .region_table()
            .infer(geo::cell_center(cell))
            .to_string();
        self.cache
            .get(&cell)
            .unwrap_or_else(|| SurgeReading::sentinel(cell, region, self.config.surge_min))
    }

    /// Recompute the multiplier for a cell and refresh the cache. Idempotent
    /// under retries: the cache write replaces any prior value.
    pub fn calculate_surge(
        &self,
        cell: CellIndex,
        region: &str,
        position: Coordinates,
    ) -> DispatchResult<SurgeReading> {
        position.validate()?;

        let supply =
            self.proximity
                .count_nearby(position, self.config.surge_supply_radius_km, region);
        let demand = self.demand_for(cell);
        let multiplier = self.multiplier_for(supply, demand);

        let previous = self.cache.get(&cell);
        let updated_at = Utc::now();
        let valid_until = updated_at
            + chrono::Duration::from_std(self.config.surge_cache_ttl)
                .map_err(|err| DispatchError::Internal(format!("surge TTL out of range: {err}")))?;
        let reading = SurgeReading {
            cell,
            region: region.to_string(),
            multiplier,
            supply,
            demand,
            updated_at: Some(updated_at),
            valid_until: Some(valid_until),
        };

        self.cache
            .insert(cell, reading.clone(), self.config.surge_cache_ttl);
        self.active_cells
            .entry(region.to_string())
            .or_default()
            .insert(cell);

        let changed = previous
            .map(|prior| (prior.multiplier - multiplier).abs() > f64::EPSILON)
            .unwrap_or(multiplier > self.config.surge_min);
        if changed {
            self.bus.publish(
                topics::SURGE_UPDATED,
                cell.to_string(),
                json!({
                    "cell": cell.to_string(),
                    "region": region,
                    "multiplier": multiplier,
                    "supply": supply,
                    "demand": demand,
                    "validUntil": valid_until,
                }),
            );
            tracing::info!(cell = %cell, region, multiplier, supply, demand, "surge updated");
        }

        Ok(reading)
    }

    /// Cell-resolved read for a coordinate pair; computes on cache miss.
    pub fn get_surge_for_location(&self, position: Coordinates) -> DispatchResult<SurgeReading> {
        let cell = geo::cell_for(position)?;
        if let Some(reading) = self.cache.get(&cell) {
            return Ok(reading);
        }
        let region = self.proximity.region_table().infer(position).to_string();
        self.calculate_surge(cell, &region, position)
    }

    /// Active surge cells for a region at or above a threshold, descending by
    /// multiplier. Expired cache entries are dropped from the registry.
    pub fn get_surge_zones_for_region(&self, region: &str, min_multiplier: f64) -> Vec<SurgeReading> {
        let cells: Vec<CellIndex> = match self.active_cells.get(region) {
            Some(active) => active.iter().copied().collect(),
            None => return Vec::new(),
        };

        let mut lapsed = Vec::new();
        let mut zones = Vec::new();
        for cell in cells {
            match self.cache.get(&cell) {
                Some(reading) if reading.multiplier >= min_multiplier => zones.push(reading),
                Some(_) => {}
                None => lapsed.push(cell),
            }
        }

        if !lapsed.is_empty() {
            if let Some(mut active) = self.active_cells.get_mut(region) {
                for cell in lapsed {
                    active.remove(&cell);
                }
            }
        }

        zones.sort_by(|a, b| {
            b.multiplier
                .partial_cmp(&a.multiplier)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        zones
    }

    /// Smoothed, clamped, one-decimal multiplier.
    fn multiplier_for(&self, supply: u64, demand: u64) -> f64 {
        let config = &self.config;
        let multiplier = if supply == 0 {
            if demand == 0 {
                config.surge_min
            } else {
                config.surge_max
            }
        } else {
            let raw = demand as f64 / supply as f64;
            (1.0 + (raw - 1.0) * config.surge_smoothing).clamp(config.surge_min, config.surge_max)
        };
        (multiplier * 10.0).round() / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::RegionTable;
    use std::time::Duration;

    const BANGALORE: Coordinates = Coordinates {
        latitude: 12.9716,
        longitude: 77.5946,
    };

    fn engine() -> (SurgeEngine, Arc<ProximityIndex>) {
        let bus = Arc::new(EventBus::default());
        let proximity = Arc::new(ProximityIndex::new(
            RegionTable::default(),
            Duration::from_secs(30),
            Arc::clone(&bus),
        ));
        let engine = SurgeEngine::new(DispatchConfig::default(), Arc::clone(&proximity), bus);
        (engine, proximity)
    }

    fn seed_online_drivers(proximity: &ProximityIndex, count: usize) {
        for i in 0..count {
            proximity
                .update_location(
                    &format!("D{i}"),
                    crate::proximity::LocationUpdate {
                        position: BANGALORE,
                        timestamp: None,
                        heading: None,
                        speed: None,
                        vehicle_type: None,
                    },
                )
                .expect("heartbeat");
        }
    }

    #[test]
    fn balanced_supply_and_demand_is_floor() {
        let (engine, proximity) = engine();
        seed_online_drivers(&proximity, 10);
        let cell = geo::cell_for(BANGALORE).expect("cell");
        for _ in 0..10 {
            engine.increment_demand(cell, "bangalore");
        }
        let reading = engine
            .calculate_surge(cell, "bangalore", BANGALORE)
            .expect("surge");
        assert_eq!(reading.supply, 10);
        assert_eq!(reading.demand, 10);
        assert_eq!(reading.multiplier, 1.0);
    }

    #[test]
    fn no_supply_no_demand_is_floor() {
        let (engine, _proximity) = engine();
        let cell = geo::cell_for(BANGALORE).expect("cell");
        let reading = engine
            .calculate_surge(cell, "bangalore", BANGALORE)
            .expect("surge");
        assert_eq!(reading.multiplier, 1.0);
    }

    #[test]
    fn demand_without_supply_is_ceiling() {
        let (engine, _proximity) = engine();
        let cell = geo::cell_for(BANGALORE).expect("cell");
        engine.increment_demand(cell, "bangalore");
        let reading = engine
            .calculate_surge(cell, "bangalore", BANGALORE)
            .expect("surge");
        assert_eq!(reading.multiplier, 3.0);
    }

    #[test]
    fn extreme_demand_clamps_to_ceiling() {
        let (engine, proximity) = engine();
        seed_online_drivers(&proximity, 1);
        let cell = geo::cell_for(BANGALORE).expect("cell");
        for _ in 0..100 {
            engine.increment_demand(cell, "bangalore");
        }
        let reading = engine
            .calculate_surge(cell, "bangalore", BANGALORE)
            .expect("surge");
        assert_eq!(reading.supply, 1);
        assert_eq!(reading.demand, 100);
        assert_eq!(reading.multiplier, 3.0);
    }

    #[test]
    fn multiplier_is_smoothed_and_one_decimal() {
        let (engine, proximity) = engine();
        seed_online_drivers(&proximity, 2);
        let cell = geo::cell_for(BANGALORE).expect("cell");
        // demand/supply = 3/2 -> 1 + 0.5 * 0.5 = 1.25 -> rounds to 1.2 or 1.3.
        for _ in 0..3 {
            engine.increment_demand(cell, "bangalore");
        }
        let reading = engine
            .calculate_surge(cell, "bangalore", BANGALORE)
            .expect("surge");
        assert!((1.0..=3.0).contains(&reading.multiplier));
        let tenths = reading.multiplier * 10.0;
        assert!((tenths - tenths.round()).abs() < 1e-9, "one decimal place");
    }

    #[test]
    fn oversupply_clamps_to_floor() {
        let (engine, proximity) = engine();
        seed_online_drivers(&proximity, 10);
        let cell = geo::cell_for(BANGALORE).expect("cell");
        engine.increment_demand(cell, "bangalore");
        let reading = engine
            .calculate_surge(cell, "bangalore", BANGALORE)
            .expect("surge");
        assert_eq!(reading.multiplier, 1.0);
    }

    #[test]
    fn uncached_cell_reads_as_sentinel() {
        let (engine, _proximity) = engine();
        let cell = geo::cell_for(BANGALORE).expect("cell");
        let reading = engine.get_surge_for_cell(cell);
        assert_eq!(reading.multiplier, 1.0);
        assert_eq!(reading.supply, 0);
        assert_eq!(reading.demand, 0);
        assert!(reading.updated_at.is_none());
    }

    #[test]
    fn location_read_populates_cache() {
        let (engine, _proximity) = engine();
        let first = engine.get_surge_for_location(BANGALORE).expect("surge");
        assert!(first.updated_at.is_some());
        let cached = engine.get_surge_for_cell(first.cell);
        assert_eq!(cached.updated_at, first.updated_at);
    }

    #[test]
    fn surge_update_event_fires_on_change() {
        let (engine, _proximity) = engine();
        let mut bus_rx = engine.bus.subscribe();
        let cell = geo::cell_for(BANGALORE).expect("cell");
        engine.increment_demand(cell, "bangalore");
        engine
            .calculate_surge(cell, "bangalore", BANGALORE)
            .expect("surge");

        let event = bus_rx.try_recv().expect("surge.updated event");
        assert_eq!(event.event_type, topics::SURGE_UPDATED);
        assert_eq!(event.data["multiplier"], 3.0);
    }

    #[test]
    fn zones_are_descending_and_thresholded() {
        let (engine, proximity) = engine();
        seed_online_drivers(&proximity, 1);
        let hot = geo::cell_for(BANGALORE).expect("cell");
        // A second cell far enough to have zero nearby supply.
        let cool_position = Coordinates::new(13.05, 77.45);
        let cool = geo::cell_for(cool_position).expect("cell");

        for _ in 0..100 {
            engine.increment_demand(hot, "bangalore");
        }
        engine.calculate_surge(hot, "bangalore", BANGALORE).expect("surge");
        engine
            .calculate_surge(cool, "bangalore", cool_position)
            .expect("surge");

        let zones = engine.get_surge_zones_for_region("bangalore", 1.0);
        assert_eq!(zones.len(), 2);
        assert!(zones[0].multiplier >= zones[1].multiplier);

        let surging = engine.get_surge_zones_for_region("bangalore", 2.0);
        assert_eq!(surging.len(), 1);
        assert_eq!(surging[0].cell, hot);
    }

    #[test]
    fn demand_window_restarts_after_expiry() {
        let bus = Arc::new(EventBus::default());
        let proximity = Arc::new(ProximityIndex::new(
            RegionTable::default(),
            Duration::from_secs(30),
            Arc::clone(&bus),
        ));
        let config = DispatchConfig {
            demand_counter_ttl: Duration::from_millis(20),
            ..DispatchConfig::default()
        };
        let engine = SurgeEngine::new(config, proximity, bus);
        let cell = geo::cell_for(BANGALORE).expect("cell");

        assert_eq!(engine.increment_demand(cell, "bangalore"), 1);
        assert_eq!(engine.increment_demand(cell, "bangalore"), 2);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(engine.increment_demand(cell, "bangalore"), 1);
    }
}
