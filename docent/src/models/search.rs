use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Options for a hybrid search call. `workspace_id` is mandatory: every
/// retrieval is tenant-scoped, never inferred.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub workspace_id: String,
    pub bot_id: Option<String>,
    pub top_k: Option<usize>,
    pub vector_weight: Option<f32>,
    pub keyword_weight: Option<f32>,
    pub min_similarity: Option<f32>,
    pub include_shared: bool,
    pub enable_reranking: bool,
    pub enable_query_expansion: bool,
}

impl SearchOptions {
    pub fn new(workspace_id: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            bot_id: None,
            top_k: None,
            vector_weight: None,
            keyword_weight: None,
            min_similarity: None,
            include_shared: true,
            enable_reranking: false,
            enable_query_expansion: false,
        }
    }

    pub fn with_bot(mut self, bot_id: &str) -> Self {
        self.bot_id = Some(bot_id.to_string());
        self
    }
}

/// Parameters handed to the persistence layer's fused retrieval capability.
#[derive(Debug, Clone)]
pub struct HybridQuery {
    pub query_text: String,
    pub query_embedding: Vec<f32>,
    pub match_count: usize,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub workspace_id: String,
    pub bot_id: Option<String>,
    pub include_shared: bool,
}

/// A ranked chunk row returned by the store. Document metadata is resolved
/// separately in one batched lookup.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub id: String,
    pub document_id: String,
    pub content: String,
    /// Cosine-like similarity in [0, 1].
    pub similarity: f32,
    /// Fused vector+keyword rank score.
    pub rank_score: f32,
}

/// An ephemeral, fully resolved search result. Never persisted beyond the
/// short-lived result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub similarity: f32,
    pub rank_score: f32,
    pub rerank_score: Option<f32>,
    pub source_title: String,
    pub source_url: Option<String>,
    pub category: Option<String>,
}

impl SearchResult {
    /// Final ordering authority: rerank score when present, fused rank
    /// otherwise.
    pub fn effective_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.rank_score)
    }
}

/// A Q/A pair captured from a user correction, embedded so it can be merged
/// into future search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedFact {
    pub id: String,
    pub workspace_id: String,
    pub bot_id: Option<String>,
    pub question: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl LearnedFact {
    pub fn new(workspace_id: &str, question: &str, answer: &str, embedding: Vec<f32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.to_string(),
            bot_id: None,
            question: question.to_string(),
            answer: answer.to_string(),
            embedding,
            is_verified: false,
            created_at: Utc::now(),
        }
    }
}

/// A learned fact matched against a query embedding.
#[derive(Debug, Clone)]
pub struct FactHit {
    pub fact: LearnedFact,
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_score_prefers_rerank() {
        let mut result = SearchResult {
            chunk_id: "c1".to_string(),
            document_id: "d1".to_string(),
            content: "text".to_string(),
            similarity: 0.8,
            rank_score: 0.75,
            rerank_score: None,
            source_title: "Doc".to_string(),
            source_url: None,
            category: None,
        };
        assert_eq!(result.effective_score(), 0.75);

        result.rerank_score = Some(0.9);
        assert_eq!(result.effective_score(), 0.9);
    }

    #[test]
    fn test_learned_fact_starts_unverified() {
        let fact = LearnedFact::new("ws_1", "q", "a", vec![0.0; 4]);
        assert!(!fact.is_verified);
        assert_eq!(fact.workspace_id, "ws_1");
    }
}
