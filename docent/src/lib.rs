//! docent: a multi-tenant hybrid retrieval and response pipeline.
//!
//! Documents are chunked with contextual headers, embedded behind a cached
//! and circuit-broken provider client, indexed through a pluggable
//! [`store::KnowledgeStore`], retrieved with fused vector+keyword ranking,
//! and turned into chat-ready answers with calibrated confidence. Every
//! user-facing entry point degrades instead of failing: search falls back to
//! vector-only and then to empty, and the responder always returns a
//! well-formed answer.

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod events;
pub mod formatting;
pub mod llm;
pub mod models;
pub mod processing;
pub mod services;
pub mod store;
pub mod telemetry;

pub use cache::{BoundedCache, CacheSet, CacheStats};
pub use config::Config;
pub use error::{DocentError, ErrorKind, Result};
pub use models::{
    BotResponse, ChatTurn, Document, ResponseOptions, SearchOptions, SearchResult, SyncReport,
};
pub use services::{DocumentSource, ResponseService, SearchService, SyncService};
pub use store::{InMemoryStore, KnowledgeStore};
