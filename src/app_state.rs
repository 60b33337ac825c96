use std::sync::Arc;

use crate::models::catalog::Catalog;
use crate::services::{cache::JobFingerprintCache, queue::JobQueue};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<JobFingerprintCache>,
    pub queue: Arc<JobQueue>,
    pub catalog: Option<Arc<Catalog>>,
}

impl AppState {
    pub fn new(cache: JobFingerprintCache, queue: JobQueue, catalog: Option<Catalog>) -> Self {
        Self {
            cache: Arc::new(cache),
            queue: Arc::new(queue),
            catalog: catalog.map(Arc::new),
        }
    }
}
