use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, ChunkHit, Document, FactHit, HybridQuery, LearnedFact};

mod memory;

pub use memory::InMemoryStore;

/// Persistence capability consumed by the pipeline. Implementations own the
/// actual retrieval machinery (vector index, keyword index, fusion); callers
/// only see ranked hits.
///
/// Every method takes explicit tenant scope. Implementations must never
/// return rows from another workspace.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Fused vector + keyword retrieval, ranked by
    /// `vector_weight * similarity + keyword_weight * keyword_score`.
    async fn hybrid_search(&self, query: &HybridQuery) -> Result<Vec<ChunkHit>>;

    /// Vector-only retrieval. Used by the degraded search tier when the
    /// hybrid capability is unavailable.
    async fn vector_search(&self, query: &HybridQuery) -> Result<Vec<ChunkHit>>;

    /// Learned facts whose question embedding is similar to the query.
    async fn match_learned_facts(
        &self,
        workspace_id: &str,
        bot_id: Option<&str>,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<FactHit>>;

    async fn insert_learned_fact(&self, fact: LearnedFact) -> Result<()>;

    /// Look up a document by its identifier in the source system.
    async fn find_document_by_source(
        &self,
        workspace_id: &str,
        source_id: &str,
    ) -> Result<Option<Document>>;

    /// Insert or fully replace a document row. Chunks are managed separately
    /// via [`replace_chunks`](Self::replace_chunks).
    async fn upsert_document(&self, document: Document) -> Result<()>;

    /// Atomically swap a document's chunk set. Old chunks must not survive,
    /// even when `chunks` is empty.
    async fn replace_chunks(&self, document_id: &str, chunks: Vec<Chunk>) -> Result<()>;

    /// Remove a document and all of its chunks.
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Batched metadata lookup for resolving search hits to their documents.
    async fn get_documents_by_ids(&self, ids: &[String]) -> Result<Vec<Document>>;

    async fn list_documents(&self, workspace_id: &str) -> Result<Vec<Document>>;

    async fn count_documents(&self, workspace_id: &str) -> Result<usize>;
}
