use crate::session::ManagerHandle;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Front door to the running session manager
    pub manager: ManagerHandle,
}

impl AppState {
    pub fn new(manager: ManagerHandle) -> Self {
        Self { manager }
    }
}
