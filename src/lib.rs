//! FRAM Engine - fatigue risk scoring for crew duty schedules
//!
//! The engine scores every duty period of a roster in two passes through a
//! deterministic pipeline: request validation → FRAM workload regression
//! (stages 2 to 6, per duty block) → two-process sleep/wake simulation over
//! the whole roster → final per-duty score.
//!
//! ## Modules
//!
//! - **FRAM**: piecewise-polynomial workload regression over duty attributes
//! - **Sleep/wake**: homeostatic and circadian simulation, feature extraction
//!   and the final linear score

pub mod common;
pub mod error;
pub mod fram;
pub mod mapper;
pub mod pipeline;
pub mod sleepwake;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use error::ComputeError;
pub use mapper::EntityMapper;
pub use pipeline::{generate, workload_scores, ScoreGenerator};
pub use sleepwake::{process_sleep_wake, SimulationConfig};
pub use types::{FrmModelRequest, FrmModelResponse};

/// Engine version reported by the CLI and the C ABI
pub const FRAM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "fram-engine";
