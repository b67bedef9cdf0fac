pub mod api;
pub mod gallery;
pub mod prediction;

pub use api::*;
pub use gallery::*;
pub use prediction::*;
