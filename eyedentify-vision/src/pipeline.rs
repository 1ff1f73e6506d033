use image::{imageops::FilterType, DynamicImage, GenericImageView};

use crate::error::VisionError;
use crate::face::{self, Detection, Embedding};
use crate::model::{ModelHandle, ModelPaths};

/// Encoder crop side length.
pub const CROP_SIZE: u32 = 160;

/// Uploads are downscaled so the longer side is at most this before
/// detection, bounding compute on large photos.
pub const MAX_DETECT_DIM: u32 = 800;

/// Per-call knobs for [`Pipeline::embed`].
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    /// Minimum detector confidence for a box to count as a face.
    pub score_threshold: f32,
    /// IoU threshold for suppressing overlapping detections.
    pub nms_threshold: f32,
    /// When no face is found, encode the whole image resized to the crop
    /// size instead of failing with `NoFaceDetected`.
    pub whole_image_fallback: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
            whole_image_fallback: true,
        }
    }
}

/// Full pipeline: downscale → detect best face → crop → encode → normalize.
pub struct Pipeline {
    models: &'static ModelHandle,
}

impl Pipeline {
    /// Pipeline backed by the process-wide model handle, loading the models
    /// on first use.
    pub fn shared(paths: &ModelPaths) -> Result<Self, VisionError> {
        Ok(Self {
            models: ModelHandle::global(paths)?,
        })
    }

    /// Embed a face photo supplied as raw encoded bytes (any raster format
    /// the `image` crate can decode).
    pub fn embed_bytes(&self, bytes: &[u8], opts: &EmbedOptions) -> Result<Embedding, VisionError> {
        let img = image::load_from_memory(bytes)?;
        self.embed(&img, opts)
    }

    /// Embed a decoded image: the single most confident face is cropped and
    /// encoded; without a detection the whole image is encoded or the call
    /// fails, per `opts.whole_image_fallback`.
    pub fn embed(&self, img: &DynamicImage, opts: &EmbedOptions) -> Result<Embedding, VisionError> {
        let img = downscale(img, MAX_DETECT_DIM);

        let crop = match self.detect_best(&img, opts)? {
            Some(detection) => face::crop_face(&img, &detection, CROP_SIZE),
            None if opts.whole_image_fallback => {
                img.resize_exact(CROP_SIZE, CROP_SIZE, FilterType::Triangle)
            }
            None => return Err(VisionError::NoFaceDetected),
        };

        let mut encoder = self.models.encoder();
        face::encode_face(&mut encoder, &crop.to_rgb8())
    }

    /// Run detection and keep the single most confident face, if any.
    pub fn detect_best(
        &self,
        img: &DynamicImage,
        opts: &EmbedOptions,
    ) -> Result<Option<Detection>, VisionError> {
        let detections = {
            let mut detector = self.models.detector();
            face::detect_faces(&mut detector, img, opts.score_threshold, opts.nms_threshold)?
        };
        Ok(detections
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score)))
    }
}

/// Resize so the longer side is at most `max_dim`, preserving aspect ratio.
/// Images already within bounds are returned as-is.
fn downscale(img: &DynamicImage, max_dim: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w.max(h) <= max_dim {
        img.clone()
    } else {
        img.resize(max_dim, max_dim, FilterType::Lanczos3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downscale_bounds_longer_side() {
        let img = DynamicImage::new_rgb8(1600, 1200);
        let out = downscale(&img, MAX_DETECT_DIM);
        assert_eq!(out.dimensions(), (800, 600));
    }

    #[test]
    fn test_downscale_keeps_small_images() {
        let img = DynamicImage::new_rgb8(640, 480);
        let out = downscale(&img, MAX_DETECT_DIM);
        assert_eq!(out.dimensions(), (640, 480));
    }

    #[test]
    fn test_embed_options_defaults() {
        let opts = EmbedOptions::default();
        assert_eq!(opts.score_threshold, 0.6);
        assert_eq!(opts.nms_threshold, 0.3);
        assert!(opts.whole_image_fallback);
    }
}
