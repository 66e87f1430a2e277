//! Candidate selection policies.
//!
//! Candidates arrive from the proximity index already filtered to eligible
//! drivers and sorted ascending by distance. [`NearestDriver`] is the
//! reference behavior; [`ScoredSelection`] augments distance with tier fit
//! and driver quality.

use std::collections::HashMap;

use crate::proximity::{NearbyDriver, VehicleTier};

pub trait SelectionPolicy: Send + Sync {
    /// Pick the candidate to offer the ride to, or `None` when the list is
    /// empty.
    fn select<'a>(
        &self,
        candidates: &'a [NearbyDriver],
        requested_tier: VehicleTier,
    ) -> Option<&'a NearbyDriver>;
}

/// Nearest eligible driver wins.
#[derive(Debug, Default)]
pub struct NearestDriver;

impl SelectionPolicy for NearestDriver {
    fn select<'a>(
        &self,
        candidates: &'a [NearbyDriver],
        _requested_tier: VehicleTier,
    ) -> Option<&'a NearbyDriver> {
        candidates.first()
    }
}

/// Historical quality signals for a driver.
#[derive(Debug, Clone, Copy)]
pub struct DriverProfile {
    pub rating: f64,
    pub acceptance_rate: f64,
}

const DEFAULT_RATING: f64 = 4.5;
const DEFAULT_ACCEPTANCE_RATE: f64 = 0.9;

/// Score-based selection:
/// `100 - 8*distanceKm + tierBonus + 20*(rating - 4.0) + 10*acceptanceRate`,
/// clamped at zero, highest score wins. Drivers without a recorded profile
/// use neutral defaults.
#[derive(Debug, Default)]
pub struct ScoredSelection {
    profiles: HashMap<String, DriverProfile>,
}

impl ScoredSelection {
    pub fn new(profiles: HashMap<String, DriverProfile>) -> Self {
        Self { profiles }
    }

    fn tier_bonus(vehicle: VehicleTier, requested: VehicleTier) -> f64 {
        if vehicle == requested {
            30.0
        } else if matches!(vehicle, VehicleTier::Premium | VehicleTier::Xl)
            && requested == VehicleTier::Economy
        {
            // A higher tier can serve an economy request.
            15.0
        } else {
            0.0
        }
    }

    fn score(&self, candidate: &NearbyDriver, requested: VehicleTier) -> f64 {
        let profile = self
            .profiles
            .get(&candidate.driver_id)
            .copied()
            .unwrap_or(DriverProfile {
                rating: DEFAULT_RATING,
                acceptance_rate: DEFAULT_ACCEPTANCE_RATE,
            });
        let score = 100.0 - 8.0 * candidate.distance_km
            + Self::tier_bonus(candidate.vehicle_type, requested)
            + 20.0 * (profile.rating - 4.0)
            + 10.0 * profile.acceptance_rate;
        score.max(0.0)
    }
}

impl SelectionPolicy for ScoredSelection {
    fn select<'a>(
        &self,
        candidates: &'a [NearbyDriver],
        requested_tier: VehicleTier,
    ) -> Option<&'a NearbyDriver> {
        let mut best: Option<(&NearbyDriver, f64)> = None;
        for candidate in candidates {
            let score = self.score(candidate, requested_tier);
            match best {
                None => best = Some((candidate, score)),
                Some((_, best_score)) if score > best_score => best = Some((candidate, score)),
                _ => {}
            }
        }
        best.map(|(candidate, _)| candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinates;
    use crate::proximity::DriverStatus;

    fn candidate(driver_id: &str, distance_km: f64, vehicle: VehicleTier) -> NearbyDriver {
        NearbyDriver {
            driver_id: driver_id.to_string(),
            distance_km,
            position: Coordinates::new(12.97, 77.59),
            vehicle_type: vehicle,
            status: DriverStatus::Online,
            heading: None,
            speed: None,
        }
    }

    #[test]
    fn nearest_takes_the_head_of_the_sorted_list() {
        let candidates = vec![
            candidate("near", 0.5, VehicleTier::Economy),
            candidate("far", 3.0, VehicleTier::Economy),
        ];
        let chosen = NearestDriver
            .select(&candidates, VehicleTier::Economy)
            .expect("candidate");
        assert_eq!(chosen.driver_id, "near");
        assert!(NearestDriver.select(&[], VehicleTier::Economy).is_none());
    }

    #[test]
    fn scored_prefers_close_drivers_with_equal_profiles() {
        let policy = ScoredSelection::default();
        let candidates = vec![
            candidate("far", 4.0, VehicleTier::Economy),
            candidate("near", 0.5, VehicleTier::Economy),
        ];
        let chosen = policy
            .select(&candidates, VehicleTier::Economy)
            .expect("candidate");
        assert_eq!(chosen.driver_id, "near");
    }

    #[test]
    fn scored_lets_a_strong_profile_beat_a_small_distance_gap() {
        let mut profiles = HashMap::new();
        profiles.insert(
            "rated".to_string(),
            DriverProfile {
                rating: 5.0,
                acceptance_rate: 1.0,
            },
        );
        profiles.insert(
            "unrated".to_string(),
            DriverProfile {
                rating: 4.0,
                acceptance_rate: 0.5,
            },
        );
        let policy = ScoredSelection::new(profiles);
        // 1 km of distance costs 8 points; the profile gap is worth 25.
        let candidates = vec![
            candidate("unrated", 0.5, VehicleTier::Economy),
            candidate("rated", 1.5, VehicleTier::Economy),
        ];
        let chosen = policy
            .select(&candidates, VehicleTier::Economy)
            .expect("candidate");
        assert_eq!(chosen.driver_id, "rated");
    }

    #[test]
    fn exact_tier_match_outranks_compatible_tier() {
        let policy = ScoredSelection::default();
        let candidates = vec![
            candidate("premium", 1.0, VehicleTier::Premium),
            candidate("economy", 1.0, VehicleTier::Economy),
        ];
        let chosen = policy
            .select(&candidates, VehicleTier::Economy)
            .expect("candidate");
        assert_eq!(chosen.driver_id, "economy");
    }
}
