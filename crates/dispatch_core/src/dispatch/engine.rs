//! The matching engine proper.
//!
//! Mutations for a single ride are serialized by the per-ride lock
//! (`lock:ride:{rideId}`); intake is serialized by idempotency-key
//! arbitration. Terminal states are absorbing. The offer fast-lookup entry is
//! the authoritative signal that an offer is still live: response handling
//! gates on it, and the timeout path fires when it is overdue or gone.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::events::{topics, EventBus};
use crate::geo;
use crate::idempotency::{request_hash, IdempotencyStore, KeyArbitration};
use crate::proximity::{DriverStatus, NearbyQuery, ProximityIndex};
use crate::rides::{DriverOffer, OfferStatus, RideRequest, RideStatus, RideStore};
use crate::soft_state::{LockTable, TtlMap};
use crate::surge::SurgeEngine;

use super::selection::{NearestDriver, SelectionPolicy};
use super::types::{
    CreateRideInput, CreateRideOutcome, CreateRideResponse, DriverAction, DriverResponseInput,
    DriverResponseOutcome, MatchedDriver, OfferSummary, ResponseStatus, RideDetails,
    TimeoutOutcome,
};

const RIDES_PATH: &str = "/api/v1/rides";
const TIMEOUT_REASON: &str = "Timeout";
const MAX_ATTEMPTS_REASON: &str = "Max match attempts reached";
const NO_DRIVERS_REASON: &str = "No available drivers";

/// Fast-lookup entry for the outstanding offer of a ride.
#[derive(Debug, Clone)]
struct ActiveOffer {
    offer_id: String,
    driver_id: String,
    deadline: Instant,
}

struct MatchOutcome {
    driver: Option<MatchedDriver>,
    reason: Option<String>,
}

pub struct DispatchEngine {
    config: DispatchConfig,
    store: RideStore,
    proximity: Arc<ProximityIndex>,
    surge: Arc<SurgeEngine>,
    bus: Arc<EventBus>,
    idempotency: IdempotencyStore,
    active_offers: TtlMap<String, ActiveOffer>,
    locks: LockTable,
    selection: Box<dyn SelectionPolicy>,
}

impl DispatchEngine {
    pub fn new(
        config: DispatchConfig,
        proximity: Arc<ProximityIndex>,
        surge: Arc<SurgeEngine>,
        bus: Arc<EventBus>,
    ) -> Self {
        let idempotency = IdempotencyStore::new(config.idempotency_ttl);
        Self {
            config,
            store: RideStore::new(),
            proximity,
            surge,
            bus,
            idempotency,
            active_offers: TtlMap::new(),
            locks: LockTable::new(),
            selection: Box::new(NearestDriver),
        }
    }

    /// Swap the candidate-selection policy.
    pub fn with_selection(mut self, selection: Box<dyn SelectionPolicy>) -> Self {
        self.selection = selection;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn proximity(&self) -> &Arc<ProximityIndex> {
        &self.proximity
    }

    pub fn surge(&self) -> &Arc<SurgeEngine> {
        &self.surge
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Ride ids with a live offer entry, for the timeout sweeper.
    pub fn rides_with_active_offers(&self) -> Vec<String> {
        self.active_offers.live_keys()
    }

    /// Intake: idempotency arbitration, surge quote, fare estimate, persist,
    /// then a synchronous first matching attempt.
    pub fn create_ride_request(
        &self,
        input: CreateRideInput,
        idempotency_key: Option<&str>,
    ) -> DispatchResult<CreateRideOutcome> {
        let key = idempotency_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(DispatchError::MissingIdempotencyKey)?;

        Self::validate_input(&input)?;

        let body = serde_json::to_value(&input)
            .map_err(|err| DispatchError::Internal(format!("request not serializable: {err}")))?;
        let hash = request_hash("POST", RIDES_PATH, &body);

        match self.idempotency.begin(key, &hash) {
            KeyArbitration::New => {}
            KeyArbitration::Replay(cached) => {
                let response: CreateRideResponse = serde_json::from_value(cached)
                    .map_err(|err| DispatchError::Internal(format!("cached response corrupt: {err}")))?;
                tracing::debug!(idempotency_key = key, ride_id = %response.id, "replayed ride creation");
                return Ok(CreateRideOutcome {
                    response,
                    replayed: true,
                });
            }
            KeyArbitration::InFlight => return Err(DispatchError::RideBusy),
            KeyArbitration::Conflict => return Err(DispatchError::IdempotencyConflict),
        }

        match self.create_ride_inner(&input, key) {
            Ok(response) => {
                if let Ok(cached) = serde_json::to_value(&response) {
                    self.idempotency.complete(key, cached);
                }
                Ok(CreateRideOutcome {
                    response,
                    replayed: false,
                })
            }
            Err(err) => {
                self.idempotency.abandon(key);
                Err(err)
            }
        }
    }

    fn validate_input(input: &CreateRideInput) -> DispatchResult<()> {
        if input.rider_id.trim().is_empty() {
            return Err(DispatchError::Validation("riderId must not be empty".into()));
        }
        input.pickup.validate()?;
        input.destination.validate()?;
        Ok(())
    }

    fn create_ride_inner(
        &self,
        input: &CreateRideInput,
        idempotency_key: &str,
    ) -> DispatchResult<CreateRideResponse> {
        let region = self
            .proximity
            .region_table()
            .infer(input.pickup)
            .to_string();
        let cell = geo::cell_for(input.pickup)?;

        self.surge.increment_demand(cell, &region);
        // A surge failure must not block dispatch; quote at the floor.
        let surge_multiplier = match self.surge.get_surge_for_location(input.pickup) {
            Ok(reading) => reading.multiplier,
            Err(err) => {
                tracing::warn!(%err, cell = %cell, "surge read failed, defaulting multiplier");
                self.config.surge_min
            }
        };

        let distance_km = geo::haversine_km(input.pickup, input.destination);
        let estimated_fare = self.estimate_fare(distance_km, surge_multiplier);

        let now = Utc::now();
        let ride_id = Uuid::new_v4().to_string();
        let ride = RideRequest {
            id: ride_id.clone(),
            rider_id: input.rider_id.clone(),
            pickup: input.pickup,
            destination: input.destination,
            tier: input.tier,
            payment_method: input.payment_method,
            status: RideStatus::Matching,
            surge_multiplier,
            estimated_fare,
            match_attempts: 0,
            current_offer_id: None,
            driver_id: None,
            region: region.clone(),
            idempotency_key: idempotency_key.to_string(),
            created_at: now,
            expires_at: now + chrono_ttl(self.config.request_expiry),
        };
        self.store.insert_ride(ride.clone());

        let events_published = self.bus.publish(
            topics::RIDE_REQUESTED,
            &ride_id,
            json!({
                "rideId": ride_id,
                "riderId": ride.rider_id,
                "region": region,
                "cell": cell.to_string(),
                "tier": ride.tier.as_str(),
                "surgeMultiplier": surge_multiplier,
                "estimatedFare": estimated_fare,
            }),
        );
        tracing::info!(ride_id = %ride_id, region, surge_multiplier, "ride requested");

        let outcome = self.match_next_driver(&ride_id)?;

        let ride = self
            .store
            .ride(&ride_id)
            .ok_or_else(|| DispatchError::Internal(format!("ride {ride_id} vanished")))?;

        // While the first offer is outstanding the response reports the
        // intake status; the offer itself is on the details read.
        let response_status = if outcome.driver.is_some() {
            RideStatus::Matching
        } else {
            ride.status
        };

        Ok(CreateRideResponse {
            id: ride.id,
            status: response_status,
            rider_id: ride.rider_id,
            pickup: ride.pickup,
            destination: ride.destination,
            tier: ride.tier,
            payment_method: ride.payment_method,
            surge_multiplier: ride.surge_multiplier,
            estimated_fare: ride.estimated_fare,
            matched_driver: outcome.driver,
            match_failure_reason: outcome.reason,
            match_attempts: ride.match_attempts,
            events_published,
        })
    }

    /// Quote-time fare: linear distance plus a distance-derived time term,
    /// scaled by surge and rounded to cents.
    fn estimate_fare(&self, distance_km: f64, surge_multiplier: f64) -> f64 {
        let fare = self.config.fare;
        let estimated_minutes = distance_km * 3.0;
        let raw =
            (fare.base + fare.per_km * distance_km + fare.per_minute * estimated_minutes)
                * surge_multiplier;
        (raw * 100.0).round() / 100.0
    }

    /// One matching attempt: nearest eligible candidates minus drivers who
    /// already passed, one offer out, state and fast-lookup entry updated.
    fn match_next_driver(&self, ride_id: &str) -> DispatchResult<MatchOutcome> {
        let ride = self
            .store
            .ride(ride_id)
            .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id}")))?;
        let excluded = self.store.excluded_drivers(ride_id);

        let mut candidates = self.proximity.find_nearby(&NearbyQuery {
            position: ride.pickup,
            radius_km: self.config.default_radius_km,
            region: ride.region.clone(),
            tier: Some(ride.tier),
            limit: self.config.match_candidate_limit,
        })?;
        candidates.retain(|candidate| !excluded.contains(&candidate.driver_id));

        let Some(choice) = self.selection.select(&candidates, ride.tier) else {
            let (terminal, reason) = if ride.match_attempts == 0 {
                (RideStatus::NoDrivers, "No drivers available in the pickup area")
            } else {
                (RideStatus::Expired, NO_DRIVERS_REASON)
            };
            self.store.update_ride(ride_id, |row| {
                row.status = terminal;
                row.current_offer_id = None;
                row.driver_id = None;
            });
            self.bus.publish(
                topics::RIDE_EXPIRED,
                ride_id,
                json!({
                    "rideId": ride_id,
                    "status": terminal.as_str(),
                    "reason": reason,
                    "matchAttempts": ride.match_attempts,
                }),
            );
            tracing::info!(ride_id, status = terminal.as_str(), reason, "matching exhausted");
            return Ok(MatchOutcome {
                driver: None,
                reason: Some(reason.to_string()),
            });
        };
        let choice = choice.clone();

        let now = Utc::now();
        let offer_id = Uuid::new_v4().to_string();
        let offer = DriverOffer {
            id: offer_id.clone(),
            ride_request_id: ride_id.to_string(),
            driver_id: choice.driver_id.clone(),
            status: OfferStatus::Pending,
            distance_km: choice.distance_km,
            created_at: now,
            expires_at: now + chrono_ttl(self.config.offer_ttl),
            responded_at: None,
            decline_reason: None,
        };
        self.store.insert_offer(offer.clone());
        self.store.update_ride(ride_id, |row| {
            row.status = RideStatus::DriverOffered;
            row.current_offer_id = Some(offer_id.clone());
            row.driver_id = Some(choice.driver_id.clone());
            row.match_attempts += 1;
        });
        self.active_offers.insert(
            ride_id.to_string(),
            ActiveOffer {
                offer_id: offer_id.clone(),
                driver_id: choice.driver_id.clone(),
                deadline: Instant::now() + self.config.offer_ttl,
            },
            self.config.offer_entry_ttl(),
        );

        self.bus.publish(
            topics::RIDE_MATCHED,
            ride_id,
            json!({
                "rideId": ride_id,
                "driverId": choice.driver_id,
                "offerId": offer_id,
                "distanceKm": choice.distance_km,
                "offerExpiresAt": offer.expires_at,
            }),
        );
        tracing::info!(
            ride_id,
            driver_id = %choice.driver_id,
            distance_km = choice.distance_km,
            "offer created"
        );

        Ok(MatchOutcome {
            driver: Some(MatchedDriver {
                driver_id: choice.driver_id,
                distance_km: choice.distance_km,
                eta_minutes: (2.0 * choice.distance_km).ceil() as u32,
            }),
            reason: None,
        })
    }

    /// Arbitrate a driver's accept/decline under the per-ride lock.
    pub fn handle_driver_response(
        &self,
        ride_id: &str,
        input: DriverResponseInput,
    ) -> DispatchResult<DriverResponseOutcome> {
        let _guard = self
            .locks
            .try_acquire(&lock_key(ride_id), self.config.lock_ttl)
            .ok_or(DispatchError::RideBusy)?;
        self.handle_response_locked(
            ride_id,
            &input.driver_id,
            input.action,
            input.reason.as_deref(),
            false,
        )
    }

    fn handle_response_locked(
        &self,
        ride_id: &str,
        driver_id: &str,
        action: DriverAction,
        reason: Option<&str>,
        via_timeout: bool,
    ) -> DispatchResult<DriverResponseOutcome> {
        let ride = self
            .store
            .ride(ride_id)
            .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id}")))?;
        if ride.status != RideStatus::DriverOffered {
            return Err(DispatchError::OfferInvalid(format!(
                "ride is {}, not awaiting a driver response",
                ride.status.as_str()
            )));
        }
        let offer_id = ride
            .current_offer_id
            .clone()
            .ok_or_else(|| DispatchError::OfferInvalid("ride has no outstanding offer".into()))?;
        let offer = self
            .store
            .offer(&offer_id)
            .ok_or_else(|| DispatchError::OfferInvalid("outstanding offer not found".into()))?;
        if offer.status != OfferStatus::Pending || offer.driver_id != driver_id {
            return Err(DispatchError::OfferInvalid(
                "response does not match the outstanding offer".into(),
            ));
        }
        if !via_timeout {
            // The fast-lookup entry is authoritative: gone means expired.
            let entry = self
                .active_offers
                .get(&ride_id.to_string())
                .ok_or(DispatchError::OfferExpired)?;
            if entry.offer_id != offer_id {
                return Err(DispatchError::OfferExpired);
            }
        }

        match action {
            DriverAction::Accept => self.accept_locked(&ride, &offer),
            DriverAction::Decline => self.decline_locked(&ride, &offer, reason, via_timeout),
        }
    }

    fn accept_locked(
        &self,
        ride: &RideRequest,
        offer: &DriverOffer,
    ) -> DispatchResult<DriverResponseOutcome> {
        // Conditional transition is the second barrier against double accept.
        if !self
            .store
            .transition_if(&ride.id, RideStatus::DriverOffered, RideStatus::Accepted)
        {
            return Err(DispatchError::OfferInvalid("offer was already resolved".into()));
        }
        self.store.update_offer(&offer.id, |row| {
            row.status = OfferStatus::Accepted;
            row.responded_at = Some(Utc::now());
        });
        self.store.update_ride(&ride.id, |row| {
            row.current_offer_id = None;
            row.driver_id = Some(offer.driver_id.clone());
        });
        if let Err(err) = self.proximity.set_status(&offer.driver_id, DriverStatus::OnTrip) {
            tracing::warn!(%err, driver_id = %offer.driver_id, "accepting driver has no presence record");
        }

        self.bus.publish(
            topics::RIDE_ACCEPTED,
            &ride.id,
            json!({
                "rideId": ride.id,
                "driverId": offer.driver_id,
                "offerId": offer.id,
                "estimatedFare": ride.estimated_fare,
            }),
        );
        self.active_offers.remove(&ride.id);
        tracing::info!(ride_id = %ride.id, driver_id = %offer.driver_id, "ride accepted");

        Ok(DriverResponseOutcome {
            status: ResponseStatus::Accepted,
            driver_id: Some(offer.driver_id.clone()),
            reason: None,
        })
    }

    fn decline_locked(
        &self,
        ride: &RideRequest,
        offer: &DriverOffer,
        reason: Option<&str>,
        via_timeout: bool,
    ) -> DispatchResult<DriverResponseOutcome> {
        let offer_disposition = if via_timeout {
            OfferStatus::Expired
        } else {
            OfferStatus::Declined
        };
        let reason = reason.map(str::to_string);
        self.store.update_offer(&offer.id, |row| {
            row.status = offer_disposition;
            row.responded_at = Some(Utc::now());
            row.decline_reason = reason.clone();
        });
        self.store.update_ride(&ride.id, |row| {
            row.status = RideStatus::Declined;
            row.current_offer_id = None;
            row.driver_id = None;
        });
        self.active_offers.remove(&ride.id);

        self.bus.publish(
            topics::RIDE_DECLINED,
            &ride.id,
            json!({
                "rideId": ride.id,
                "driverId": offer.driver_id,
                "offerId": offer.id,
                "reason": reason,
                "timedOut": via_timeout,
            }),
        );
        tracing::info!(
            ride_id = %ride.id,
            driver_id = %offer.driver_id,
            timed_out = via_timeout,
            "offer declined"
        );

        if ride.match_attempts >= self.config.max_attempts {
            self.store.update_ride(&ride.id, |row| {
                row.status = RideStatus::Expired;
            });
            self.bus.publish(
                topics::RIDE_EXPIRED,
                &ride.id,
                json!({
                    "rideId": ride.id,
                    "status": RideStatus::Expired.as_str(),
                    "reason": MAX_ATTEMPTS_REASON,
                    "matchAttempts": ride.match_attempts,
                }),
            );
            return Ok(DriverResponseOutcome {
                status: ResponseStatus::Expired,
                driver_id: None,
                reason: Some(MAX_ATTEMPTS_REASON.to_string()),
            });
        }

        self.store.update_ride(&ride.id, |row| {
            row.status = RideStatus::Matching;
        });
        let outcome = self.match_next_driver(&ride.id)?;
        match outcome.driver {
            Some(driver) => Ok(DriverResponseOutcome {
                status: ResponseStatus::Reassigned,
                driver_id: Some(driver.driver_id),
                reason: None,
            }),
            None => Ok(DriverResponseOutcome {
                status: ResponseStatus::Expired,
                driver_id: None,
                reason: Some(NO_DRIVERS_REASON.to_string()),
            }),
        }
    }

    /// Expire an overdue offer as an implicit decline. Driven by polling or
    /// called directly; both paths take the same lock as response handling.
    pub fn check_timeout(&self, ride_id: &str) -> DispatchResult<TimeoutOutcome> {
        let _guard = self
            .locks
            .try_acquire(&lock_key(ride_id), self.config.lock_ttl)
            .ok_or(DispatchError::RideBusy)?;

        let ride = self
            .store
            .ride(ride_id)
            .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id}")))?;
        if ride.status != RideStatus::DriverOffered {
            return Ok(TimeoutOutcome { timed_out: false });
        }

        let driver_id = match self.active_offers.get(&ride_id.to_string()) {
            Some(entry) if entry.deadline > Instant::now() => {
                return Ok(TimeoutOutcome { timed_out: false });
            }
            Some(entry) => entry.driver_id,
            None => {
                // The entry aged out entirely; the pending offer is overdue.
                match ride
                    .current_offer_id
                    .as_deref()
                    .and_then(|offer_id| self.store.offer(offer_id))
                {
                    Some(offer) if offer.status == OfferStatus::Pending => offer.driver_id,
                    _ => return Ok(TimeoutOutcome { timed_out: false }),
                }
            }
        };

        let outcome = self.handle_response_locked(
            ride_id,
            &driver_id,
            DriverAction::Decline,
            Some(TIMEOUT_REASON),
            true,
        )?;
        tracing::info!(ride_id, driver_id, outcome = ?outcome.status, "offer timed out");
        Ok(TimeoutOutcome { timed_out: true })
    }

    /// Pure read of the ride plus its current offer.
    pub fn get_ride_details(&self, ride_id: &str) -> DispatchResult<RideDetails> {
        let ride = self
            .store
            .ride(ride_id)
            .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id}")))?;
        let current_offer = ride
            .current_offer_id
            .as_deref()
            .and_then(|offer_id| self.store.offer(offer_id))
            .map(|offer| OfferSummary {
                offer_id: offer.id,
                driver_id: offer.driver_id,
                status: offer.status,
                distance_km: offer.distance_km,
                expires_at: offer.expires_at,
            });
        Ok(RideDetails {
            id: ride.id,
            rider_id: ride.rider_id,
            status: ride.status,
            pickup: ride.pickup,
            destination: ride.destination,
            tier: ride.tier,
            payment_method: ride.payment_method,
            region: ride.region,
            surge_multiplier: ride.surge_multiplier,
            estimated_fare: ride.estimated_fare,
            match_attempts: ride.match_attempts,
            driver_id: ride.driver_id,
            current_offer,
            created_at: ride.created_at,
            expires_at: ride.expires_at,
        })
    }

    /// Rider-initiated cancellation; a no-op on terminal rides.
    pub fn cancel_ride(&self, ride_id: &str, reason: Option<&str>) -> DispatchResult<RideStatus> {
        let ride = self
            .store
            .ride(ride_id)
            .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id}")))?;
        if ride.status.is_terminal() {
            return Ok(ride.status);
        }

        let mut cancelled = false;
        let mut outstanding_offer = None;
        self.store.update_ride(ride_id, |row| {
            if row.status.is_terminal() {
                return;
            }
            outstanding_offer = row.current_offer_id.take();
            row.status = RideStatus::Cancelled;
            row.driver_id = None;
            cancelled = true;
        });
        if !cancelled {
            // Lost the race against a terminal transition.
            return Ok(self
                .store
                .ride(ride_id)
                .map(|row| row.status)
                .unwrap_or(RideStatus::Cancelled));
        }

        if let Some(offer_id) = outstanding_offer {
            self.store.update_offer(&offer_id, |row| {
                if row.status == OfferStatus::Pending {
                    row.status = OfferStatus::Expired;
                    row.responded_at = Some(Utc::now());
                    row.decline_reason = Some("Ride cancelled".to_string());
                }
            });
        }
        self.active_offers.remove(&ride_id.to_string());

        self.bus.publish(
            topics::RIDE_CANCELLED,
            ride_id,
            json!({
                "rideId": ride_id,
                "reason": reason,
            }),
        );
        tracing::info!(ride_id, reason, "ride cancelled");
        Ok(RideStatus::Cancelled)
    }
}

fn lock_key(ride_id: &str) -> String {
    format!("lock:ride:{ride_id}")
}

fn chrono_ttl(ttl: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(ttl.as_secs() as i64))
}
