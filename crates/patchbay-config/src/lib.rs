//! Session and engine configuration for patchbay.
//!
//! A session is one TOML file holding the engine settings (sample rate,
//! block size, host IO) and a graph description. This crate reads and
//! writes those files, validates them, and turns them into a ready
//! [`GraphManager`](patchbay_core::GraphManager).
//!
//! # Features
//!
//! - **Sessions**: [`SessionFile`] load/save as TOML
//! - **Engine**: [`EngineConfig`] with defaults for every field
//! - **Validation**: ranges, id uniqueness and arc endpoints, all errors collected
//!
//! # Example
//!
//! ```rust,no_run
//! use patchbay_config::SessionFile;
//!
//! let session = SessionFile::load("live.toml").unwrap();
//! let (mut manager, report) = session.build_manager().unwrap();
//! for warning in &report.warnings {
//!     eprintln!("{warning}");
//! }
//! manager.prepare_to_render(session.engine.sample_rate_hz(), session.engine.block_size);
//! ```

mod engine;
mod error;
mod session;

/// Session validation.
pub mod validation;

pub use engine::{DEFAULT_BLOCK_SIZE, DEFAULT_SAMPLE_RATE, EngineConfig};
pub use error::ConfigError;
pub use session::SessionFile;
pub use validation::{
    BLOCK_SIZE_RANGE, SAMPLE_RATE_RANGE, ValidationError, ValidationResult, validate_engine,
    validate_graph, validate_session,
};
