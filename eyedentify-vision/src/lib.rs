pub mod error;
pub mod face;
pub mod model;
pub mod pipeline;
pub mod yunet;

// Re-export commonly used types
pub use error::VisionError;
pub use face::{Detection, Embedding, EMBED_DIM};
pub use model::{ModelHandle, ModelPaths};
pub use pipeline::{EmbedOptions, Pipeline};
