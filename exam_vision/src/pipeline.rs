// THEORY:
// The `pipeline` module is the top-level API of the exam engine. `ExamPipeline`
// is the explicit context object built once at startup: it owns the asset store,
// the ingestion service, the analyzer and the registry, and every operation the
// operator workflow needs (upload, list, look up, fetch an asset) goes through it.
//
// An upload runs in three stages with a hard seam between each:
//   ingest -> analyze -> append
// `ingest` and `complete` are public on their own so a scheduler (see
// `parallel_pipeline`) can run the slow analysis stage elsewhere. The run is
// all-or-nothing: a record is appended only after the original and the overlay
// are both persisted and the confidence is drawn. Any earlier failure leaves the
// registry untouched.
//
// An `InvalidUpload` (empty payload, empty filename) is not reported as an
// error. The upload entry point swallows it and returns `UploadOutcome::Discarded`.

use crate::config::{ExamConfig, RegistryBackend};
use crate::core_modules::asset_store::AssetStore;
use crate::core_modules::dashboard::DashboardQuery;
use crate::core_modules::exam_record::ExamDraft;
use crate::core_modules::inference::{Analyzer, InferenceSimulator};
use crate::core_modules::ingestion::IngestionService;
use crate::core_modules::registry::{ExamRegistry, FileRegistry, MemoryRegistry};
use crate::error::{ExamError, Result};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::asset_store::{AssetRef, StorageArea};
pub use crate::core_modules::dashboard::DashboardRow;
pub use crate::core_modules::exam_record::{Confidence, ExamId, ExamRecord, ExamStatus};
pub use crate::core_modules::image_asset::ImageAsset;
pub use crate::core_modules::inference::Analysis;

/// What happened to one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The exam was analyzed and recorded.
    Stored(ExamRecord),
    /// The upload was invalid and silently dropped; nothing was written.
    Discarded,
}

impl UploadOutcome {
    pub fn record(&self) -> Option<&ExamRecord> {
        match self {
            UploadOutcome::Stored(record) => Some(record),
            UploadOutcome::Discarded => None,
        }
    }
}

/// The exam processing context: storage, analysis and registry in one place.
pub struct ExamPipeline {
    config: ExamConfig,
    store: Arc<AssetStore>,
    ingestion: IngestionService,
    analyzer: Arc<dyn Analyzer>,
    registry: Arc<dyn ExamRegistry>,
}

impl ExamPipeline {
    /// Validates `config`, creates both storage areas and opens the registry.
    pub fn open(config: ExamConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(AssetStore::open(&config.originals_dir, &config.results_dir)?);
        let registry: Arc<dyn ExamRegistry> = match &config.registry {
            RegistryBackend::Memory => {
                warn!("exam registry is in-memory only; records are lost on restart");
                Arc::new(MemoryRegistry::new())
            }
            RegistryBackend::File { path } => Arc::new(FileRegistry::open(path)?),
        };
        let analyzer = Arc::new(InferenceSimulator::new(
            store.clone(),
            config.max_pixels,
            config.overlay_alpha,
        ));
        info!(
            originals = %config.originals_dir.display(),
            results = %config.results_dir.display(),
            durable = registry.is_durable(),
            exams = registry.len(),
            "exam pipeline ready"
        );
        Ok(Self::with_parts(config, store, analyzer, registry))
    }

    /// Assembles a pipeline from existing parts, e.g. to swap in another analyzer.
    pub fn with_parts(
        config: ExamConfig,
        store: Arc<AssetStore>,
        analyzer: Arc<dyn Analyzer>,
        registry: Arc<dyn ExamRegistry>,
    ) -> Self {
        Self {
            ingestion: IngestionService::new(store.clone(), config.max_pixels),
            config,
            store,
            analyzer,
            registry,
        }
    }

    /// Runs a full upload: ingest, analyze, append.
    pub fn upload(&self, raw_bytes: &[u8], filename: &str) -> Result<UploadOutcome> {
        self.upload_as(raw_bytes, filename, None)
    }

    /// Like `upload`, with a caller-chosen patient alias.
    pub fn upload_as(
        &self,
        raw_bytes: &[u8],
        filename: &str,
        patient_alias: Option<String>,
    ) -> Result<UploadOutcome> {
        let original = match self.ingest(raw_bytes, filename) {
            Ok(original) => original,
            Err(e) if e.is_silent() => {
                debug!(filename, reason = %e, "upload discarded");
                return Ok(UploadOutcome::Discarded);
            }
            Err(e) => return Err(e),
        };
        self.complete(&original, patient_alias).map(UploadOutcome::Stored)
    }

    /// Stage 1: validate and persist the original.
    pub fn ingest(&self, raw_bytes: &[u8], filename: &str) -> Result<ImageAsset> {
        self.ingestion.ingest(raw_bytes, filename)
    }

    /// Stages 2 and 3: analyze an ingested original and record the exam.
    #[instrument(skip(self, original, patient_alias), fields(original = %original.reference()))]
    pub fn complete(&self, original: &ImageAsset, patient_alias: Option<String>) -> Result<ExamRecord> {
        let analysis = self.analyzer.analyze(original)?;
        let record = self.registry.append(ExamDraft {
            original_asset: original.reference().clone(),
            result_asset: analysis.result.reference().clone(),
            patient_alias,
            confidence: analysis.confidence,
        })?;
        info!(
            exam_id = record.id,
            result = %record.result_asset,
            confidence = record.confidence.value(),
            "exam recorded"
        );
        Ok(record)
    }

    pub fn dashboard(&self) -> Vec<DashboardRow> {
        DashboardQuery::new(self.registry.clone()).rows()
    }

    pub fn exam(&self, id: ExamId) -> Result<ExamRecord> {
        self.registry.get(id)
    }

    /// Raw bytes of a stored original or result.
    pub fn fetch_asset(&self, reference: &AssetRef) -> Result<Vec<u8>> {
        self.store.read(reference)
    }

    /// Raw bytes of the overlay recorded for exam `id`.
    pub fn fetch_result(&self, id: ExamId) -> Result<Vec<u8>> {
        let record = self.exam(id)?;
        self.fetch_asset(&record.result_asset).map_err(|e| match e {
            ExamError::NotFound(_) => {
                ExamError::NotFound(format!("result asset {} for exam {id}", record.result_asset))
            }
            other => other,
        })
    }

    pub fn config(&self) -> &ExamConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<AssetStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<dyn ExamRegistry> {
        &self.registry
    }
}
