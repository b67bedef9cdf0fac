pub mod app;
pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod replicate;
#[cfg(feature = "server")]
pub mod server;
pub mod storage;

pub use app::{Gallery, GenerateClient, SubmissionFlow};
pub use config::{Config, PollConfig, PostgresConfig, ReplicateConfig, SupabaseConfig};
pub use error::{EmojiError, GenerationError, Result};
pub use models::{GalleryEntry, NewGalleryEntry, Prediction, PredictionStatus};
pub use replicate::{ImageGenerator, Orchestrator, ReplicateClient};
pub use storage::{GalleryStore, GalleryStoreManager};
