//! Funnel engine: ordered-funnel analytics over a user event log.
//!
//! Modular structure:
//! - [`events`]: Raw and parsed event records, timestamp parsing
//! - [`storage`]: Append-only event store (in-memory or SQLite) with versioned snapshots
//! - [`funnel`]: Step definitions, per-user progress, funnel roll-up
//! - [`features`]: Per-user feature vectors labelled by conversion
//! - [`model`]: Seeded random forest ranking features that predict conversion
//! - [`service`]: Query service: cache, retry, training pool, timeouts
//! - [`http`]: axum routes
//! - [`logging`]: Structured JSON logging

pub mod config;
pub mod error;
pub mod events;
pub mod features;
pub mod funnel;
pub mod http;
pub mod logging;
pub mod model;
pub mod service;
pub mod storage;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use events::{Event, NewEvent};
pub use features::{FeatureExtractor, FeatureVector};
pub use funnel::{compute_funnel, FunnelDefinition, FunnelResult, ProgressPass};
pub use logging::StructuredLogger;
pub use model::{SuggestionResult, Suggester};
pub use service::QueryService;
pub use storage::{EventStore, MemoryEventStore, SqliteEventStore};
