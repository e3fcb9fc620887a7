// THEORY:
// The `exam_record` module defines what the registry stores. An `ExamDraft` is
// everything a finished pipeline run knows about an exam except its identity;
// the registry turns it into an `ExamRecord` by assigning the next id.
//
// The confidence score is a newtype whose only constructors enforce the
// [88, 98] range, including when a record is read back from a journal, so an
// out-of-range score cannot exist anywhere in the system.

use crate::core_modules::asset_store::AssetRef;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ExamId = u64;

/// Review state of an exam. The pipeline only ever produces `PendingReview`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExamStatus {
    PendingReview,
    Reviewed,
}

impl fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExamStatus::PendingReview => f.write_str("Pending Review"),
            ExamStatus::Reviewed => f.write_str("Reviewed"),
        }
    }
}

/// Simulated certainty of an analysis, always within [88, 98].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Confidence(u8);

impl Confidence {
    pub const MIN: u8 = 88;
    pub const MAX: u8 = 98;

    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Draws a score uniformly from the valid range.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.random_range(Self::MIN..=Self::MAX))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Confidence {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Confidence::new(value).ok_or_else(|| {
            format!(
                "confidence {value} is outside [{}, {}]",
                Confidence::MIN,
                Confidence::MAX
            )
        })
    }
}

impl From<Confidence> for u8 {
    fn from(confidence: Confidence) -> Self {
        confidence.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// A completed analysis waiting for an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamDraft {
    pub original_asset: AssetRef,
    pub result_asset: AssetRef,
    /// Caller-supplied alias. When absent the registry derives one from the id.
    pub patient_alias: Option<String>,
    pub confidence: Confidence,
}

/// One processed upload, as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamRecord {
    pub id: ExamId,
    pub original_asset: AssetRef,
    pub result_asset: AssetRef,
    /// Opaque alias; never the patient's real identity.
    pub patient_alias: String,
    pub status: ExamStatus,
    pub confidence: Confidence,
}

impl ExamRecord {
    /// Assigns `id` to a draft. Only registries call this.
    pub(crate) fn from_draft(id: ExamId, draft: ExamDraft) -> Self {
        let patient_alias = draft
            .patient_alias
            .filter(|alias| !alias.trim().is_empty())
            .unwrap_or_else(|| default_alias(id));
        Self {
            id,
            original_asset: draft.original_asset,
            result_asset: draft.result_asset,
            patient_alias,
            status: ExamStatus::PendingReview,
            confidence: draft.confidence,
        }
    }
}

fn default_alias(id: ExamId) -> String {
    format!("Anonymous Patient {id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::asset_store::StorageArea;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn draft(alias: Option<&str>) -> ExamDraft {
        ExamDraft {
            original_asset: AssetRef::new(StorageArea::Originals, "scan.png"),
            result_asset: AssetRef::new(StorageArea::Results, "result_000001_scan.png"),
            patient_alias: alias.map(str::to_string),
            confidence: Confidence::new(90).unwrap(),
        }
    }

    #[test]
    fn confidence_rejects_values_outside_the_range() {
        assert!(Confidence::new(87).is_none());
        assert!(Confidence::new(99).is_none());
        assert_eq!(Confidence::new(88).map(Confidence::value), Some(88));
        assert_eq!(Confidence::new(98).map(Confidence::value), Some(98));
    }

    #[test]
    fn random_confidence_covers_the_whole_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = [false; 11];
        for _ in 0..2_000 {
            let c = Confidence::random(&mut rng).value();
            assert!((88..=98).contains(&c));
            seen[usize::from(c - 88)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn confidence_deserialization_enforces_the_range() {
        assert!(serde_json::from_str::<Confidence>("93").is_ok());
        assert!(serde_json::from_str::<Confidence>("42").is_err());
    }

    #[test]
    fn records_start_pending_review_with_a_derived_alias() {
        let record = ExamRecord::from_draft(3, draft(None));
        assert_eq!(record.status, ExamStatus::PendingReview);
        assert_eq!(record.patient_alias, "Anonymous Patient 3");
    }

    #[test]
    fn caller_alias_is_kept_unless_blank() {
        assert_eq!(ExamRecord::from_draft(1, draft(Some("P-17"))).patient_alias, "P-17");
        assert_eq!(
            ExamRecord::from_draft(2, draft(Some("  "))).patient_alias,
            "Anonymous Patient 2"
        );
    }

    #[test]
    fn display_forms() {
        assert_eq!(ExamStatus::PendingReview.to_string(), "Pending Review");
        assert_eq!(Confidence::new(95).unwrap().to_string(), "95%");
    }
}
