// THEORY:
// The dashboard is a pure read over the registry: one flat row per exam, in the
// order the registry lists them. It holds no state of its own and caches
// nothing; the registry is the single source of truth.

use crate::core_modules::asset_store::AssetRef;
use crate::core_modules::exam_record::{Confidence, ExamId, ExamRecord, ExamStatus};
use crate::core_modules::registry::ExamRegistry;
use serde::Serialize;
use std::sync::Arc;

/// One line of the review dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardRow {
    pub id: ExamId,
    pub patient_alias: String,
    pub status: ExamStatus,
    pub confidence: Confidence,
    pub original_asset: AssetRef,
    pub result_asset: AssetRef,
}

impl From<ExamRecord> for DashboardRow {
    fn from(record: ExamRecord) -> Self {
        Self {
            id: record.id,
            patient_alias: record.patient_alias,
            status: record.status,
            confidence: record.confidence,
            original_asset: record.original_asset,
            result_asset: record.result_asset,
        }
    }
}

#[derive(Clone)]
pub struct DashboardQuery {
    registry: Arc<dyn ExamRegistry>,
}

impl DashboardQuery {
    pub fn new(registry: Arc<dyn ExamRegistry>) -> Self {
        Self { registry }
    }

    pub fn rows(&self) -> Vec<DashboardRow> {
        self.registry.list().into_iter().map(DashboardRow::from).collect()
    }
}
