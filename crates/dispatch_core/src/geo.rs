//! Geo primitives: haversine distance, lat/lng to H3 cell, region inference.
//!
//! Cells are H3 resolution 8 (~0.46 km average edge), the unit of demand
//! counting and surge caching. Regions are coarse named partitions resolved
//! from a fixed table of bounding boxes; requests outside every box fall back
//! to [`DEFAULT_REGION`].

use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Resolution of the dispatch grid.
pub const CELL_RESOLUTION: Resolution = Resolution::Eight;

/// Approximate spacing between adjacent cell centers at resolution 8 (km).
const CELL_SPACING_KM: f64 = 0.8;

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Region assigned when no bounding box contains the coordinates.
pub const DEFAULT_REGION: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Range check: latitude in [-90, 90], longitude in [-180, 180].
    pub fn validate(&self) -> DispatchResult<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(DispatchError::Validation(format!(
                "latitude {} out of range [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(DispatchError::Validation(format!(
                "longitude {} out of range [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Haversine distance between two coordinate pairs in kilometers.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lon1) = (a.latitude.to_radians(), a.longitude.to_radians());
    let (lat2, lon2) = (b.latitude.to_radians(), b.longitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Map coordinates to their dispatch-grid cell.
pub fn cell_for(coords: Coordinates) -> DispatchResult<CellIndex> {
    coords.validate()?;
    let latlng = LatLng::new(coords.latitude, coords.longitude)
        .map_err(|err| DispatchError::Validation(format!("invalid coordinates: {err}")))?;
    Ok(latlng.to_cell(CELL_RESOLUTION))
}

/// Centroid of a cell as coordinates.
pub fn cell_center(cell: CellIndex) -> Coordinates {
    let latlng: LatLng = cell.into();
    Coordinates::new(latlng.lat(), latlng.lng())
}

/// Grid-disk ring size covering `radius_km` around an origin cell.
///
/// One extra ring compensates for the origin sitting near a cell edge.
pub fn ring_for_radius_km(radius_km: f64) -> u32 {
    if radius_km <= 0.0 {
        return 0;
    }
    (radius_km / CELL_SPACING_KM).ceil() as u32 + 1
}

/// A named region bounded by a lat/lng box.
#[derive(Debug, Clone, Copy)]
pub struct RegionBounds {
    pub name: &'static str,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl RegionBounds {
    fn contains(&self, coords: Coordinates) -> bool {
        (self.min_lat..=self.max_lat).contains(&coords.latitude)
            && (self.min_lng..=self.max_lng).contains(&coords.longitude)
    }
}

/// Fixed table of serviced regions. First match wins.
#[derive(Debug, Clone)]
pub struct RegionTable {
    regions: Vec<RegionBounds>,
}

impl RegionTable {
    pub fn new(regions: Vec<RegionBounds>) -> Self {
        Self { regions }
    }

    /// Resolve the region for a coordinate pair, falling back to the default.
    pub fn infer(&self, coords: Coordinates) -> &str {
        self.regions
            .iter()
            .find(|region| region.contains(coords))
            .map(|region| region.name)
            .unwrap_or(DEFAULT_REGION)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.regions.iter().map(|region| region.name)
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new(vec![
            RegionBounds {
                name: "bangalore",
                min_lat: 12.75,
                max_lat: 13.25,
                min_lng: 77.35,
                max_lng: 77.90,
            },
            RegionBounds {
                name: "mumbai",
                min_lat: 18.85,
                max_lat: 19.35,
                min_lng: 72.75,
                max_lng: 73.10,
            },
            RegionBounds {
                name: "delhi",
                min_lat: 28.35,
                max_lat: 28.95,
                min_lng: 76.80,
                max_lng: 77.45,
            },
            RegionBounds {
                name: "hyderabad",
                min_lat: 17.20,
                max_lat: 17.65,
                min_lng: 78.20,
                max_lng: 78.70,
            },
        ])
    }
}
