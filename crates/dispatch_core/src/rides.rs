//! Ride requests, driver offers, and their store.
//!
//! The store stands in for the relational backend: rides and offers are
//! mutated one row at a time, and `transition_if` gives the conditional
//! status update (a status check in the WHERE clause) used as the second
//! barrier against double acceptance.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;
use crate::proximity::VehicleTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    Wallet,
    Cash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Pending,
    Matching,
    DriverOffered,
    Accepted,
    Declined,
    NoDrivers,
    Expired,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RideStatus::Accepted
                | RideStatus::NoDrivers
                | RideStatus::Expired
                | RideStatus::Cancelled
        )
    }

    /// Transition-validity table for the request state machine.
    pub fn can_transition(self, next: RideStatus) -> bool {
        use RideStatus::*;
        if self == next {
            return false;
        }
        match (self, next) {
            (Pending, Matching) => true,
            (Matching, DriverOffered) => true,
            (Matching, NoDrivers) => true,
            (Matching, Expired) => true,
            (DriverOffered, Accepted) => true,
            (DriverOffered, Declined) => true,
            (DriverOffered, Expired) => true,
            (Declined, Matching) => true,
            (Declined, DriverOffered) => true,
            (Declined, Expired) => true,
            // Rider cancellation applies to any non-terminal state.
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "PENDING",
            RideStatus::Matching => "MATCHING",
            RideStatus::DriverOffered => "DRIVER_OFFERED",
            RideStatus::Accepted => "ACCEPTED",
            RideStatus::Declined => "DECLINED",
            RideStatus::NoDrivers => "NO_DRIVERS",
            RideStatus::Expired => "EXPIRED",
            RideStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "PENDING",
            OfferStatus::Accepted => "ACCEPTED",
            OfferStatus::Declined => "DECLINED",
            OfferStatus::Expired => "EXPIRED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RideRequest {
    pub id: String,
    pub rider_id: String,
    pub pickup: Coordinates,
    pub destination: Coordinates,
    pub tier: VehicleTier,
    pub payment_method: PaymentMethod,
    pub status: RideStatus,
    pub surge_multiplier: f64,
    pub estimated_fare: f64,
    pub match_attempts: u32,
    pub current_offer_id: Option<String>,
    pub driver_id: Option<String>,
    pub region: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DriverOffer {
    pub id: String,
    pub ride_request_id: String,
    pub driver_id: String,
    pub status: OfferStatus,
    pub distance_km: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
}

/// In-memory relational surrogate. All mutations are atomic per row.
#[derive(Debug, Default)]
pub struct RideStore {
    rides: DashMap<String, RideRequest>,
    offers: DashMap<String, DriverOffer>,
    offers_by_ride: DashMap<String, Vec<String>>,
}

impl RideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_ride(&self, ride: RideRequest) {
        self.rides.insert(ride.id.clone(), ride);
    }

    pub fn ride(&self, ride_id: &str) -> Option<RideRequest> {
        self.rides.get(ride_id).map(|ride| ride.clone())
    }

    /// Apply a closure to the ride row under its map entry.
    pub fn update_ride<F>(&self, ride_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut RideRequest),
    {
        match self.rides.get_mut(ride_id) {
            Some(mut ride) => {
                mutate(&mut ride);
                true
            }
            None => false,
        }
    }

    /// Conditional transition: succeeds only when the row still holds
    /// `expected` and the transition table allows the move.
    pub fn transition_if(&self, ride_id: &str, expected: RideStatus, next: RideStatus) -> bool {
        match self.rides.get_mut(ride_id) {
            Some(mut ride) => {
                if ride.status != expected || !ride.status.can_transition(next) {
                    return false;
                }
                ride.status = next;
                true
            }
            None => false,
        }
    }

    pub fn insert_offer(&self, offer: DriverOffer) {
        self.offers_by_ride
            .entry(offer.ride_request_id.clone())
            .or_default()
            .push(offer.id.clone());
        self.offers.insert(offer.id.clone(), offer);
    }

    pub fn offer(&self, offer_id: &str) -> Option<DriverOffer> {
        self.offers.get(offer_id).map(|offer| offer.clone())
    }

    pub fn update_offer<F>(&self, offer_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut DriverOffer),
    {
        match self.offers.get_mut(offer_id) {
            Some(mut offer) => {
                mutate(&mut offer);
                true
            }
            None => false,
        }
    }

    pub fn offers_for_ride(&self, ride_id: &str) -> Vec<DriverOffer> {
        let ids: Vec<String> = match self.offers_by_ride.get(ride_id) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.offer(id))
            .collect()
    }

    /// Drivers who already declined or let an offer expire for this ride.
    pub fn excluded_drivers(&self, ride_id: &str) -> HashSet<String> {
        self.offers_for_ride(ride_id)
            .into_iter()
            .filter(|offer| {
                matches!(offer.status, OfferStatus::Declined | OfferStatus::Expired)
            })
            .map(|offer| offer.driver_id)
            .collect()
    }

    pub fn pending_offers_for_ride(&self, ride_id: &str) -> Vec<DriverOffer> {
        self.offers_for_ride(ride_id)
            .into_iter()
            .filter(|offer| offer.status == OfferStatus::Pending)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ride(id: &str, status: RideStatus) -> RideRequest {
        RideRequest {
            id: id.to_string(),
            rider_id: "R1".to_string(),
            pickup: Coordinates::new(12.9716, 77.5946),
            destination: Coordinates::new(12.98, 77.61),
            tier: VehicleTier::Economy,
            payment_method: PaymentMethod::Card,
            status,
            surge_multiplier: 1.0,
            estimated_fare: 10.0,
            match_attempts: 0,
            current_offer_id: None,
            driver_id: None,
            region: "bangalore".to_string(),
            idempotency_key: "k1".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::minutes(5),
        }
    }

    #[test]
    fn transition_table_permits_the_documented_machine() {
        use RideStatus::*;
        assert!(Pending.can_transition(Matching));
        assert!(Matching.can_transition(DriverOffered));
        assert!(DriverOffered.can_transition(Accepted));
        assert!(DriverOffered.can_transition(Declined));
        assert!(Declined.can_transition(Matching));
        assert!(Declined.can_transition(Expired));
        assert!(Matching.can_transition(NoDrivers));
        assert!(DriverOffered.can_transition(Cancelled));
        assert!(Matching.can_transition(Cancelled));

        assert!(!Accepted.can_transition(Cancelled));
        assert!(!Accepted.can_transition(Matching));
        assert!(!Expired.can_transition(DriverOffered));
        assert!(!Matching.can_transition(Accepted));
    }

    #[test]
    fn terminal_set_matches_vocabulary() {
        use RideStatus::*;
        for status in [Accepted, NoDrivers, Expired, Cancelled] {
            assert!(status.is_terminal(), "{status:?}");
        }
        for status in [Pending, Matching, DriverOffered, Declined] {
            assert!(!status.is_terminal(), "{status:?}");
        }
    }

    #[test]
    fn transition_if_enforces_expected_status() {
        let store = RideStore::new();
        store.insert_ride(sample_ride("r1", RideStatus::DriverOffered));

        assert!(store.transition_if("r1", RideStatus::DriverOffered, RideStatus::Accepted));
        // Second attempt observes ACCEPTED and fails: the double-accept barrier.
        assert!(!store.transition_if("r1", RideStatus::DriverOffered, RideStatus::Accepted));
        assert_eq!(store.ride("r1").expect("ride").status, RideStatus::Accepted);
    }

    #[test]
    fn excluded_drivers_collects_declined_and_expired() {
        let store = RideStore::new();
        store.insert_ride(sample_ride("r1", RideStatus::Matching));
        let base = DriverOffer {
            id: String::new(),
            ride_request_id: "r1".to_string(),
            driver_id: String::new(),
            status: OfferStatus::Pending,
            distance_km: 1.0,
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(15),
            responded_at: None,
            decline_reason: None,
        };
        store.insert_offer(DriverOffer {
            id: "o1".into(),
            driver_id: "D1".into(),
            status: OfferStatus::Declined,
            ..base.clone()
        });
        store.insert_offer(DriverOffer {
            id: "o2".into(),
            driver_id: "D2".into(),
            status: OfferStatus::Expired,
            ..base.clone()
        });
        store.insert_offer(DriverOffer {
            id: "o3".into(),
            driver_id: "D3".into(),
            status: OfferStatus::Pending,
            ..base
        });

        let excluded = store.excluded_drivers("r1");
        assert!(excluded.contains("D1"));
        assert!(excluded.contains("D2"));
        assert!(!excluded.contains("D3"));
        assert_eq!(store.pending_offers_for_ride("r1").len(), 1);
    }
}
