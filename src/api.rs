//! HTTP API for Mindline

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::auth::IdentityProvider;
use crate::runtime::ProductionManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<ProductionManager>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(sessions: Arc<ProductionManager>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { sessions, identity }
    }
}
