//! Shared application state for all routes.

use crate::store::Backend;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// The only state shared between requests; every handler takes its executor from here.
    pub backend: Arc<dyn Backend>,
}

impl AppState {
    pub fn new(backend: impl Backend + 'static) -> Self {
        AppState {
            backend: Arc::new(backend),
        }
    }
}
