pub mod routes;

use crate::{replicate::ImageGenerator, storage::GalleryStore};
use std::sync::Arc;

pub use routes::configure_routes;

/// Shared by every worker; registered once as `web::Data`.
pub struct AppState {
    pub generator: Arc<dyn ImageGenerator>,
    pub store: Arc<dyn GalleryStore>,
}

impl AppState {
    pub fn new(generator: Arc<dyn ImageGenerator>, store: Arc<dyn GalleryStore>) -> Self {
        Self { generator, store }
    }
}
