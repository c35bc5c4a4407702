use std::sync::Arc;

use crate::engine::DispatchEngine;

/// Gateway application state (shared).
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DispatchEngine>,
}

impl AppState {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self { engine }
    }
}
