use std::sync::Arc;

use dispatch_core::dispatch::DispatchEngine;
use dispatch_core::proximity::ProximityIndex;
use dispatch_core::surge::SurgeEngine;

/// Shared handler state: the engine owns the subsystem handles.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DispatchEngine>,
}

impl AppState {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self { engine }
    }

    pub fn proximity(&self) -> &Arc<ProximityIndex> {
        self.engine.proximity()
    }

    pub fn surge(&self) -> &Arc<SurgeEngine> {
        self.engine.surge()
    }
}
