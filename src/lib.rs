//! Course Flux - feature engineering and label construction for online-course
//! completion prediction
//!
//! Flux turns raw course platform logs into a design matrix through a
//! deterministic pipeline: interaction merging → temporal truncation →
//! aggregation and ratio derivation → step-difficulty scoring → feature
//! synthesis → assembly against full-history labels.
//!
//! ## Modules
//!
//! - **Baseline pipeline**: window-truncated per-user counts ([`baseline_x_y`])
//! - **Full pipeline**: synthesized, ratio, step-score and time-series features
//!   ([`CourseFluxProcessor`])

pub mod aggregate;
pub mod assembler;
pub mod config;
pub mod encoder;
pub mod error;
pub mod interaction;
pub mod label;
pub mod pipeline;
pub mod ratio;
pub mod schema;
pub mod split;
pub mod step_weight;
pub mod synthesis;
pub mod table;

pub use assembler::DesignMatrix;
pub use config::PipelineConfig;
pub use encoder::{DesignMatrixEncoder, MatrixKind};
pub use error::{CacheError, ComputeError};
pub use label::Labels;
pub use pipeline::{baseline_x_y, CourseFluxProcessor};
pub use split::split_by_users;
pub use table::FeatureTable;

// Schema exports
pub use schema::{Action, EventRecord, Interaction, LogAdapter, StepMetadata, SubmissionRecord};

/// Crate version embedded in every manifest
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for manifests
pub const PRODUCER_NAME: &str = "course-flux";
