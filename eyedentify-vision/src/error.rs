use std::path::PathBuf;

/// Failures surfaced by the detection/encoding pipeline.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    /// The detector found no face and whole-image fallback is disabled.
    /// Recoverable by the caller with a different photo.
    #[error("no face detected in image")]
    NoFaceDetected,

    /// A model could not be loaded. Transient: a later call retries the load.
    #[error("model unavailable ({}): {}", path.display(), reason)]
    ModelUnavailable { path: PathBuf, reason: String },

    #[error("could not decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("inference failed: {0}")]
    Inference(#[from] ort::Error),

    /// A model produced tensors with an unexpected shape or size.
    #[error("unexpected model output: {0}")]
    BadOutput(String),
}

impl From<ndarray::ShapeError> for VisionError {
    fn from(e: ndarray::ShapeError) -> Self {
        VisionError::BadOutput(e.to_string())
    }
}
