//! HTTP surface for the dispatch platform. Handlers are thin adapters over
//! the synchronous engine operations; all domain rules live in
//! `dispatch_core`.

pub mod error;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use routes::build_router;
pub use state::AppState;
