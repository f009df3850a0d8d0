//! # Calluna
//!
//! A typed, ergonomic document-store client for Elasticsearch-compatible
//! search engines.
//!
//! ## Features
//!
//! - Typed CRUD over one named index, with a pluggable codec
//! - Optimistic-concurrency updates with bounded conflict retry
//! - Bulk writes with per-item outcome correlation
//! - Scroll-driven lazy streaming of search results
//! - Async and blocking calling conventions with identical semantics
pub mod blocking;
mod codec;
mod dao;
mod data;
mod error;
mod protocol;
pub mod search;
mod transport;
pub mod util;

// Re-exports for the public API
pub use codec::{JsonCodec, ModelCodec};
pub use dao::bulk::{BulkBuffer, BulkOpKind, BulkOutcome, BulkStatus};
pub use dao::{IndexDao, IndexOptions};
pub use data::{DocumentVersion, TypedHit, TypedRecord};
pub use error::{CallunaError, Result};
pub use search::{QueryBody, SearchResults, SearchSpec, SearchSpecBuilder};
pub use transport::{EngineRequest, EngineResponse, HttpTransport, Method, Transport};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
