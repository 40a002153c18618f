//! HTTP API for the host extension and observer UI
//!
//! - POST /capture/start - Start capturing a tab
//! - POST /capture/stop/:tab_id - Stop one tab
//! - POST /capture/stop-all - Stop every tab
//! - GET /status?tab_id= - Status of one tab
//! - GET /sessions - All sessions, pending identities and the advisory error
//! - GET /events - Server-sent status updates
//! - POST /tabs/:tab_id/removed, /tabs/:tab_id/activated, /suspend - Host lifecycle hooks
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
