//! Dispatch engine: the ride-request state machine, offer lifecycle, and
//! accept/decline/timeout arbitration.

pub mod engine;
pub mod selection;
pub mod types;

pub use engine::DispatchEngine;
pub use selection::{DriverProfile, NearestDriver, ScoredSelection, SelectionPolicy};
pub use types::{
    CreateRideInput, CreateRideOutcome, CreateRideResponse, DriverAction, DriverResponseInput,
    DriverResponseOutcome, MatchedDriver, OfferSummary, ResponseStatus, RideDetails,
    TimeoutOutcome,
};
