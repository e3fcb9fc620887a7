// THEORY:
// `ExamConfig` is the single source of tunables for the pipeline. It replaces
// process-wide globals for the storage directories: the config is built once at
// startup, validated, and handed to `ExamPipeline::open`, which owns everything
// derived from it.
//
// Configuration is plain TOML. Every field has a default, so an empty file (or
// no file at all) yields a working setup rooted at `static/uploads` and
// `static/results`.

use crate::error::{ExamError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_MAX_PIXELS: u64 = 40_000_000;
const DEFAULT_OVERLAY_ALPHA: f32 = 0.4;

/// Which exam registry implementation backs the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum RegistryBackend {
    /// Volatile: every record is lost when the process exits.
    #[default]
    Memory,
    /// Durable: records are journaled to a JSON-lines file and replayed on open.
    File { path: PathBuf },
}

/// Configuration for the exam pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamConfig {
    /// Storage area for uploaded originals.
    pub originals_dir: PathBuf,
    /// Storage area for composited overlays.
    pub results_dir: PathBuf,
    /// Largest image (width * height) the analyzer accepts.
    pub max_pixels: u64,
    /// Opacity of the saliency overlay over the original, in (0, 1].
    pub overlay_alpha: f32,
    /// Number of analysis workers in the parallel pipeline.
    pub workers: usize,
    pub registry: RegistryBackend,
}

impl Default for ExamConfig {
    fn default() -> Self {
        Self {
            originals_dir: PathBuf::from("static/uploads"),
            results_dir: PathBuf::from("static/results"),
            max_pixels: DEFAULT_MAX_PIXELS,
            overlay_alpha: DEFAULT_OVERLAY_ALPHA,
            workers: num_cpus::get(),
            registry: RegistryBackend::default(),
        }
    }
}

impl ExamConfig {
    /// A config whose storage areas live under `root`.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            originals_dir: root.join("uploads"),
            results_dir: root.join("results"),
            ..Self::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: ExamConfig =
            toml::from_str(raw).map_err(|e| ExamError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ExamError::storage(path, e))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_pixels == 0 {
            return Err(ExamError::Config("max_pixels must be greater than zero".into()));
        }
        if self.workers == 0 {
            return Err(ExamError::Config("workers must be greater than zero".into()));
        }
        if !(self.overlay_alpha > 0.0 && self.overlay_alpha <= 1.0) {
            return Err(ExamError::Config(format!(
                "overlay_alpha must be in (0, 1], got {}",
                self.overlay_alpha
            )));
        }
        if self.originals_dir == self.results_dir {
            return Err(ExamError::Config(
                "originals_dir and results_dir must be different locations".into(),
            ));
        }
        Ok(())
    }
}
