use anyhow::{Context, Result};
use eyedentify_vision::{EmbedOptions, ModelPaths};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::matcher::MatchPolicy;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("EYEDENTIFY_CONFIG_PATH").unwrap_or("/usr/local/etc/eyedentify/config.toml"),
    )
});

pub static STORE_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("EYEDENTIFY_STORE_PREFIX").unwrap_or("/usr/local/etc/eyedentify"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum similarity for a match to count as a positive identification.
    pub recognition_threshold: f32,
    /// Lower bound reserved for a "possible match" tier; carried in the
    /// policy but not applied by the matcher.
    pub rejection_threshold: f32,
    /// A match at or above this score ends the gallery scan immediately.
    pub high_confidence_early_exit: f32,
    /// Encode the whole resized image when no face is detected instead of
    /// rejecting the photo.
    pub whole_image_fallback: bool,
    pub detector_score_threshold: f32,
    pub detector_nms_threshold: f32,
    pub detector_model: PathBuf,
    pub encoder_model: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recognition_threshold: 0.50,
            rejection_threshold: 0.30,
            high_confidence_early_exit: 0.90,
            whole_image_fallback: true,
            detector_score_threshold: 0.6,
            detector_nms_threshold: 0.3,
            detector_model: PathBuf::from(
                "/usr/local/share/eyedentify/face_detection_yunet_2023mar.onnx",
            ),
            encoder_model: PathBuf::from("/usr/local/share/eyedentify/facenet_vggface2.onnx"),
        }
    }
}

impl Config {
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.detector_model.clone(),
            encoder: self.encoder_model.clone(),
        }
    }

    pub fn embed_options(&self) -> EmbedOptions {
        EmbedOptions {
            score_threshold: self.detector_score_threshold,
            nms_threshold: self.detector_nms_threshold,
            whole_image_fallback: self.whole_image_fallback,
        }
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            recognition_threshold: self.recognition_threshold,
            rejection_threshold: self.rejection_threshold,
            high_confidence_early_exit: self.high_confidence_early_exit,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
