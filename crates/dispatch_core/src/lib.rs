//! Core of the ride-hailing dispatch platform: driver presence and
//! proximity, surge pricing, and the matching engine.
//!
//! The three subsystems share soft state with strict consistency rules:
//! presence markers gate proximity reads, the per-ride lock serializes
//! response and timeout handling, and surge reads on the dispatch path
//! degrade to the floor multiplier instead of failing intake.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod geo;
pub mod idempotency;
pub mod proximity;
pub mod rides;
pub mod soft_state;
pub mod surge;

pub use config::DispatchConfig;
pub use dispatch::DispatchEngine;
pub use error::{DispatchError, DispatchResult};
pub use events::EventBus;
pub use proximity::ProximityIndex;
pub use surge::SurgeEngine;
