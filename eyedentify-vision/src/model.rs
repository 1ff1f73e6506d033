use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::OnceCell;
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

use crate::error::VisionError;

#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};

/// Locations of the detector and encoder ONNX files.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub encoder: PathBuf,
}

/// Process-wide handle owning both inference sessions.
///
/// `Session::run` needs `&mut self`, so each session sits behind its own
/// mutex and inference on it is serialized. Loaded once via
/// [`ModelHandle::global`]; a failed load leaves the slot empty so the next
/// caller retries.
pub struct ModelHandle {
    detector: Mutex<Session>,
    encoder: Mutex<Session>,
}

static MODELS: OnceCell<ModelHandle> = OnceCell::new();

impl ModelHandle {
    /// Return the shared handle, loading the models on first call.
    ///
    /// Concurrent callers block while a single load executes. The paths are
    /// only consulted by the call that performs the load.
    pub fn global(paths: &ModelPaths) -> Result<&'static ModelHandle, VisionError> {
        MODELS.get_or_try_init(|| ModelHandle::load(paths))
    }

    /// Load both sessions without touching the shared slot.
    pub fn load(paths: &ModelPaths) -> Result<ModelHandle, VisionError> {
        Ok(ModelHandle {
            detector: Mutex::new(session_from_file(&paths.detector)?),
            encoder: Mutex::new(session_from_file(&paths.encoder)?),
        })
    }

    pub fn detector(&self) -> MutexGuard<'_, Session> {
        self.detector.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn encoder(&self) -> MutexGuard<'_, Session> {
        self.encoder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn session_builder() -> Result<SessionBuilder, VisionError> {
    #[cfg_attr(not(any(feature = "openvino", feature = "cuda")), allow(unused_mut))]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder).map_err(ort::Error::from)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder);
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn session_from_file(path: &Path) -> Result<Session, VisionError> {
    session_builder()?
        .commit_from_file(path)
        .map_err(|e| VisionError::ModelUnavailable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
