use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{DocentError, Result};
use crate::models::{Chunk, ChunkHit, Document, FactHit, HybridQuery, LearnedFact};
use crate::store::KnowledgeStore;

/// In-memory [`KnowledgeStore`] backed by hash maps behind `RwLock`s.
///
/// Retrieval is a linear scan: cosine similarity over chunk embeddings plus a
/// token-overlap keyword score, fused with the weights from the query. Fine
/// for tests and small corpora; a database-backed store would swap in behind
/// the same trait.
#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<String, Document>>,
    /// Chunks keyed by document id.
    chunks: RwLock<HashMap<String, Vec<Chunk>>>,
    facts: RwLock<Vec<LearnedFact>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn document_visible(doc: &Document, workspace_id: &str, bot_id: Option<&str>, include_shared: bool) -> bool {
        if !doc.is_active || doc.workspace_id != workspace_id {
            return false;
        }
        match (&doc.bot_id, bot_id) {
            // Workspace-shared document.
            (None, _) => include_shared || bot_id.is_none(),
            (Some(owner), Some(requested)) => owner == requested,
            (Some(_), None) => false,
        }
    }

    fn scan(&self, query: &HybridQuery, keyword_weight: f32) -> Result<Vec<ChunkHit>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| DocentError::Store("document lock poisoned".to_string()))?;
        let chunks = self
            .chunks
            .read()
            .map_err(|_| DocentError::Store("chunk lock poisoned".to_string()))?;

        let query_terms = tokenize(&query.query_text);

        let mut hits: Vec<ChunkHit> = Vec::new();
        for (document_id, doc_chunks) in chunks.iter() {
            let visible = documents.get(document_id).is_some_and(|doc| {
                Self::document_visible(
                    doc,
                    &query.workspace_id,
                    query.bot_id.as_deref(),
                    query.include_shared,
                )
            });
            if !visible {
                continue;
            }

            for chunk in doc_chunks {
                let similarity = cosine_similarity(&query.query_embedding, &chunk.embedding);
                let keyword = if keyword_weight > 0.0 {
                    keyword_overlap(&query_terms, &chunk.contextual_content)
                } else {
                    0.0
                };
                let rank_score = query.vector_weight * similarity + keyword_weight * keyword;
                if rank_score <= 0.0 {
                    continue;
                }
                hits.push(ChunkHit {
                    id: chunk.id.clone(),
                    document_id: document_id.clone(),
                    content: chunk.content.clone(),
                    similarity,
                    rank_score,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.rank_score
                .partial_cmp(&a.rank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(query.match_count);
        Ok(hits)
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn hybrid_search(&self, query: &HybridQuery) -> Result<Vec<ChunkHit>> {
        self.scan(query, query.keyword_weight)
    }

    async fn vector_search(&self, query: &HybridQuery) -> Result<Vec<ChunkHit>> {
        self.scan(query, 0.0)
    }

    async fn match_learned_facts(
        &self,
        workspace_id: &str,
        bot_id: Option<&str>,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<FactHit>> {
        let facts = self
            .facts
            .read()
            .map_err(|_| DocentError::Store("fact lock poisoned".to_string()))?;

        let mut hits: Vec<FactHit> = facts
            .iter()
            .filter(|fact| {
                fact.workspace_id == workspace_id
                    && (fact.bot_id.is_none() || fact.bot_id.as_deref() == bot_id)
            })
            .map(|fact| FactHit {
                fact: fact.clone(),
                similarity: cosine_similarity(embedding, &fact.embedding),
            })
            .filter(|hit| hit.similarity > 0.0)
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn insert_learned_fact(&self, fact: LearnedFact) -> Result<()> {
        self.facts
            .write()
            .map_err(|_| DocentError::Store("fact lock poisoned".to_string()))?
            .push(fact);
        Ok(())
    }

    async fn find_document_by_source(
        &self,
        workspace_id: &str,
        source_id: &str,
    ) -> Result<Option<Document>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| DocentError::Store("document lock poisoned".to_string()))?;
        Ok(documents
            .values()
            .find(|doc| doc.workspace_id == workspace_id && doc.source_id == source_id)
            .cloned())
    }

    async fn upsert_document(&self, document: Document) -> Result<()> {
        self.documents
            .write()
            .map_err(|_| DocentError::Store("document lock poisoned".to_string()))?
            .insert(document.id.clone(), document);
        Ok(())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: Vec<Chunk>) -> Result<()> {
        self.chunks
            .write()
            .map_err(|_| DocentError::Store("chunk lock poisoned".to_string()))?
            .insert(document_id.to_string(), chunks);
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.documents
            .write()
            .map_err(|_| DocentError::Store("document lock poisoned".to_string()))?
            .remove(document_id);
        self.chunks
            .write()
            .map_err(|_| DocentError::Store("chunk lock poisoned".to_string()))?
            .remove(document_id);
        Ok(())
    }

    async fn get_documents_by_ids(&self, ids: &[String]) -> Result<Vec<Document>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| DocentError::Store("document lock poisoned".to_string()))?;
        Ok(ids
            .iter()
            .filter_map(|id| documents.get(id).cloned())
            .collect())
    }

    async fn list_documents(&self, workspace_id: &str) -> Result<Vec<Document>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| DocentError::Store("document lock poisoned".to_string()))?;
        let mut docs: Vec<Document> = documents
            .values()
            .filter(|doc| doc.workspace_id == workspace_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(docs)
    }

    async fn count_documents(&self, workspace_id: &str) -> Result<usize> {
        let documents = self
            .documents
            .read()
            .map_err(|_| DocentError::Store("document lock poisoned".to_string()))?;
        Ok(documents
            .values()
            .filter(|doc| doc.workspace_id == workspace_id && doc.is_active)
            .count())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(String::from)
        .collect()
}

/// Fraction of query terms present in the chunk text.
fn keyword_overlap(query_terms: &HashSet<String>, text: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms = tokenize(text);
    let matched = query_terms.iter().filter(|t| text_terms.contains(*t)).count();
    matched as f32 / query_terms.len() as f32
}
