//! Offer-timeout sweeper: polls every live offer entry once a second so every
//! pending offer reaches a terminal state within the offer deadline plus
//! bounded slack, even when no driver ever responds.

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::dispatch::DispatchEngine;
use dispatch_core::error::DispatchError;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run_offer_timeout_sweeper(engine: Arc<DispatchEngine>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        for ride_id in engine.rides_with_active_offers() {
            match engine.check_timeout(&ride_id) {
                Ok(outcome) if outcome.timed_out => {
                    tracing::debug!(ride_id, "sweeper expired an overdue offer");
                }
                Ok(_) => {}
                // A live driver response holds the lock; the next tick retries.
                Err(DispatchError::RideBusy) => {}
                Err(DispatchError::NotFound(_)) => {}
                Err(err) => {
                    tracing::warn!(%err, ride_id, "timeout sweep failed");
                }
            }
        }
    }
}
