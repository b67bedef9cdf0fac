pub mod api_client;
pub mod gallery;
pub mod submission;

pub use api_client::GenerateClient;
pub use gallery::{Card, CardImage, Gallery, GalleryHandle, GalleryView};
pub use submission::{SubmissionFlow, SubmissionState, SubmitError};
