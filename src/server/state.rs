//! Shared server state.

use std::time::Duration;

use crate::inference::LifecycleManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: LifecycleManager,
    /// Budget for one completion
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(manager: LifecycleManager, request_timeout: Duration) -> Self {
        Self {
            manager,
            request_timeout,
        }
    }
}
