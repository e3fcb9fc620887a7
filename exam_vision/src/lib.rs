// THEORY:
// This file is the main entry point for the `exam_vision` library crate. It
// exports `ExamPipeline` (and its worker-pool variant `ParallelPipeline`) as the
// high-level interface for the exam workflow: upload an image, analyze it,
// record the exam, list exams for review.
//
// The building blocks (`core_modules`) stay public so a caller can assemble a
// pipeline from its own parts, e.g. a real model behind the `Analyzer` trait or
// a different `ExamRegistry`.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod telemetry;

pub use config::{ExamConfig, RegistryBackend};
pub use error::{ExamError, Result};
pub use parallel_pipeline::{JobTicket, ParallelPipeline};
pub use pipeline::{ExamPipeline, UploadOutcome};
