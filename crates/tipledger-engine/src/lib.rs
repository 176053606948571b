//! # tipledger-engine
//!
//! The upload reconciliation and insight-caching engine:
//!
//! - content fingerprinting (exact + similarity hashes)
//! - the duplicate gate with its ordered rejection rules
//! - rule-based document classification over oracle fields
//! - trip aggregation with a monotone completeness state machine
//! - tip variance and derived metrics
//! - a content-addressable computation cache with request coalescing
//! - windowed reanalysis with append-only session records
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tipledger_db::memory::MemoryStores;
//! use tipledger_engine::{EngineConfig, MockOracle, UploadService};
//!
//! let stores = MemoryStores::new();
//! let service = UploadService::new(
//!     stores.documents(),
//!     stores.trips(),
//!     stores.cache(),
//!     stores.sessions(),
//!     Arc::new(MockOracle::new()),
//!     EngineConfig::from_env(),
//! );
//!
//! let outcome = service.submit_upload(&image_bytes, "trip.png", None).await?;
//! ```

pub mod aggregator;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod fingerprint;
pub mod gate;
pub mod reanalysis;
pub mod recognize;
pub mod service;
pub mod variance;

// Re-export core types
pub use tipledger_core::*;

pub use aggregator::{AttachOutcome, TripAggregator, TripRef};
pub use cache::{CacheStats, ComputationCache};
pub use classifier::{classify, parse_money, Classification};
pub use config::EngineConfig;
pub use fingerprint::{fingerprint, Fingerprint};
pub use gate::{DuplicateGate, GateConfig, GateDecision};
pub use reanalysis::{compute_aggregate, ReanalysisEngine};
pub use recognize::{HttpRecognitionClient, MockOracle, RecognitionOracle};
pub use service::UploadService;
pub use variance::{compute_metrics, compute_variance};
