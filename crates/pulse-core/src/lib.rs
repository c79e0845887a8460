//! Pulse Core - Media Analytics Collection Library
//!
//! This crate turns raw player lifecycle calls into an ordered stream of
//! analytics hits delivered to a collection backend:
//! - Rule-based validation of lifecycle calls
//! - Session context (ads, chapters, custom states, QoE)
//! - Hit generation with ping cadence and idle/length recovery
//! - Ordered real-time delivery with retry
//! - Offline batching for downloaded content
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Pulse Core                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │    Event     │  │    Media     │  │     Hit      │          │
//! │  │   Tracker    │──│   Context    │──│  Generator   │          │
//! │  └──────────────┘  └──────────────┘  └──────┬───────┘          │
//! │                                             │                   │
//! │                                      ┌──────┴──────┐            │
//! │                                      │    Media    │            │
//! │                                      │   Service   │            │
//! │                                      └──────┬──────┘            │
//! │                                             │                   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────┴───────┐          │
//! │  │  Real-Time   │  │   Offline    │  │     Hit      │          │
//! │  │   Session    │  │   Session    │  │    Store     │          │
//! │  └──────┬───────┘  └──────┬───────┘  └──────────────┘          │
//! │         └────────┬────────┘                                     │
//! │             ┌────┴────┐                                         │
//! │             │ Network │                                         │
//! │             └─────────┘                                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod hit;
pub mod context;
pub mod generator;
pub mod tracker;
pub mod network;
pub mod store;
pub mod session;
pub mod realtime;
pub mod offline;
pub mod service;

pub use error::{Error, Result};
pub use types::*;
pub use hit::MediaHit;
pub use context::MediaContext;
pub use generator::{MediaCollectionHitGenerator, MediaProcessor, SessionConfig};
pub use tracker::{MediaEvent, MediaEventTracker, RuleOutcome, RuleViolation};
pub use network::{HttpNetwork, Network};
pub use store::{HitStore, InMemoryHitStore};
pub use session::MediaSession;
pub use realtime::MediaRealTimeSession;
pub use offline::MediaOfflineSession;
pub use service::MediaService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Pulse Core initialized");
}
