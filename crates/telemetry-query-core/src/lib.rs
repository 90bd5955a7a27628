//! # Telemetry Query
//!
//! Typed query client for Workers observability telemetry.
//!
//! Lets an agent list raw log events, compute aggregates over a time window,
//! and discover which keys and values exist before spending a query on a
//! guess.
//!
//! ## Architecture
//!
//! - **Models**: request clauses, the three request shapes, and the
//!   polymorphic response shapes
//! - **Validation**: turns raw JSON into fully-defaulted requests, or rejects
//!   it with the offending field path
//! - **Executor**: one backend round trip per operation, with view-aware
//!   response normalization
//! - **Tools**: the agent-facing boundary, where every outcome becomes a
//!   string payload
//!
//! ## Quick Start
//!
//! ```bash
//! # Which keys exist for a worker?
//! telemetry-query keys --last 1h --limit 1000
//!
//! # p99 wall time over the last day
//! telemetry-query query --last 24h --calc p99:$workers.wallTimeMs
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod models;
pub mod tools;
pub mod validation;

pub use config::Config;
pub use context::AccountContext;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::AccountContext;
    pub use crate::error::{Error, Result};
    pub use crate::executor::{HttpBackend, QueryExecutor, TelemetryBackend};
    pub use crate::models::*;
    pub use crate::tools::ObservabilityTools;
    pub use crate::validation::Validate;
}
