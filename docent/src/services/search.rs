use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{scoped_key, CacheSet, CachedHit};
use crate::config::SearchConfig;
use crate::embeddings::EmbeddingService;
use crate::error::{DocentError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::models::{ChunkHit, Document, HybridQuery, SearchOptions, SearchResult};
use crate::store::KnowledgeStore;

/// How many learned facts are considered for merging into one result set.
const LEARNED_FACT_LIMIT: usize = 3;

/// Hybrid retrieval over the knowledge store.
///
/// The public entry point never returns an error. The primary path is fused
/// vector+keyword retrieval; a fused failure degrades to vector-only search
/// against the same embedding, and a total failure yields an empty result set.
pub struct SearchService {
    store: Arc<dyn KnowledgeStore>,
    embeddings: Arc<EmbeddingService>,
    caches: Arc<CacheSet>,
    events: Arc<dyn EventSink>,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embeddings: Arc<EmbeddingService>,
        caches: Arc<CacheSet>,
        events: Arc<dyn EventSink>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            caches,
            events,
            config,
        }
    }

    /// Run a hybrid search. Returns ranked results, or an empty vec when
    /// every tier has failed; never an error.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Vec<SearchResult> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let cache_key = scoped_key(query, &options.workspace_id, options.bot_id.as_deref());
        if let Some(cached) = self.caches.search_results.get(&cache_key) {
            debug!(workspace_id = %options.workspace_id, "search result cache hit");
            return cached.iter().map(from_cached).collect();
        }

        match self.run_pipeline(query, options).await {
            Ok(results) => {
                let projection: Vec<CachedHit> = results.iter().map(CachedHit::from).collect();
                self.caches.search_results.set(cache_key, projection);
                self.events.emit(PipelineEvent::SearchCompleted {
                    workspace_id: options.workspace_id.clone(),
                    result_count: results.len(),
                    degraded: false,
                });
                results
            }
            Err(error) => {
                warn!(workspace_id = %options.workspace_id, %error, "hybrid search failed, attempting vector-only fallback");
                self.events.emit(PipelineEvent::SearchFailed {
                    workspace_id: options.workspace_id.clone(),
                    message: error.to_string(),
                });

                match self.vector_fallback(query, options).await {
                    Ok(results) => {
                        self.events.emit(PipelineEvent::SearchCompleted {
                            workspace_id: options.workspace_id.clone(),
                            result_count: results.len(),
                            degraded: true,
                        });
                        results
                    }
                    Err(error) => {
                        warn!(workspace_id = %options.workspace_id, %error, "vector fallback failed, returning empty result set");
                        Vec::new()
                    }
                }
            }
        }
    }

    async fn run_pipeline(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let budget = Duration::from_secs(self.config.timeout_secs);

        // Expansion feeds the keyword side only; the embedding is always
        // computed from the original query so the semantic vector never
        // drifts.
        let keyword_text = if options.enable_query_expansion {
            expand_query(query)
        } else {
            query.to_string()
        };

        let embedding = self
            .with_budget("query embedding", budget, self.embeddings.embed_query(
                query,
                &options.workspace_id,
                options.bot_id.as_deref(),
            ))
            .await?;

        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let hybrid_query = HybridQuery {
            query_text: keyword_text,
            query_embedding: embedding.clone(),
            match_count: top_k,
            vector_weight: options.vector_weight.unwrap_or(self.config.vector_weight),
            keyword_weight: options.keyword_weight.unwrap_or(self.config.keyword_weight),
            workspace_id: options.workspace_id.clone(),
            bot_id: options.bot_id.clone(),
            include_shared: options.include_shared,
        };

        let hits = match self
            .with_budget("hybrid search", budget, self.store.hybrid_search(&hybrid_query))
            .await
        {
            Ok(hits) => hits,
            Err(error) => {
                warn!(%error, "fused retrieval failed, retrying vector-only with the same embedding");
                self.with_budget("vector search", budget, self.store.vector_search(&hybrid_query))
                    .await?
            }
        };

        let min_similarity = options.min_similarity.unwrap_or(self.config.min_similarity);
        let mut results = self.resolve_hits(hits, min_similarity).await?;

        self.merge_learned_facts(&mut results, options, &embedding)
            .await;

        results.sort_by(|a, b| {
            b.rank_score
                .partial_cmp(&a.rank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);

        if options.enable_reranking {
            rerank(query, &mut results);
        }

        Ok(results)
    }

    /// Last-resort tier: a fresh vector-only search, skipping expansion,
    /// learned facts, and reranking.
    async fn vector_fallback(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let budget = Duration::from_secs(self.config.timeout_secs);
        let embedding = self
            .with_budget("query embedding", budget, self.embeddings.embed_query(
                query,
                &options.workspace_id,
                options.bot_id.as_deref(),
            ))
            .await?;

        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let hybrid_query = HybridQuery {
            query_text: query.to_string(),
            query_embedding: embedding,
            match_count: top_k,
            vector_weight: 1.0,
            keyword_weight: 0.0,
            workspace_id: options.workspace_id.clone(),
            bot_id: options.bot_id.clone(),
            include_shared: options.include_shared,
        };

        let hits = self
            .with_budget("vector search", budget, self.store.vector_search(&hybrid_query))
            .await?;
        let min_similarity = options.min_similarity.unwrap_or(self.config.min_similarity);
        let mut results = self.resolve_hits(hits, min_similarity).await?;
        results.sort_by(|a, b| {
            b.rank_score
                .partial_cmp(&a.rank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    /// Filter by similarity and resolve parent document metadata in a single
    /// batched lookup.
    async fn resolve_hits(
        &self,
        hits: Vec<ChunkHit>,
        min_similarity: f32,
    ) -> Result<Vec<SearchResult>> {
        let surviving: Vec<ChunkHit> = hits
            .into_iter()
            .filter(|hit| hit.similarity >= min_similarity)
            .collect();

        let mut document_ids: Vec<String> =
            surviving.iter().map(|hit| hit.document_id.clone()).collect();
        document_ids.sort();
        document_ids.dedup();

        let documents: HashMap<String, Document> = self
            .store
            .get_documents_by_ids(&document_ids)
            .await?
            .into_iter()
            .map(|doc| (doc.id.clone(), doc))
            .collect();

        Ok(surviving
            .into_iter()
            .filter_map(|hit| {
                // A chunk whose document vanished mid-query is dropped.
                let doc = documents.get(&hit.document_id)?;
                Some(SearchResult {
                    chunk_id: hit.id,
                    document_id: hit.document_id,
                    content: hit.content,
                    similarity: hit.similarity,
                    rank_score: hit.rank_score,
                    rerank_score: None,
                    source_title: doc.title.clone(),
                    source_url: doc.source_url.clone(),
                    category: doc.category.clone(),
                })
            })
            .collect())
    }

    /// Fold learned facts into the result set at a fixed similarity discount.
    /// A fact lookup failure only costs the facts, never the search.
    async fn merge_learned_facts(
        &self,
        results: &mut Vec<SearchResult>,
        options: &SearchOptions,
        embedding: &[f32],
    ) {
        let facts = match self
            .store
            .match_learned_facts(
                &options.workspace_id,
                options.bot_id.as_deref(),
                embedding,
                LEARNED_FACT_LIMIT,
            )
            .await
        {
            Ok(facts) => facts,
            Err(error) => {
                warn!(%error, "learned fact lookup failed, continuing without facts");
                return;
            }
        };

        let discount = self.config.learned_fact_discount;
        let min_similarity = options.min_similarity.unwrap_or(self.config.min_similarity);

        for hit in facts {
            let discounted = hit.similarity * discount;
            if discounted < min_similarity {
                continue;
            }
            results.push(SearchResult {
                chunk_id: hit.fact.id.clone(),
                document_id: hit.fact.id.clone(),
                content: hit.fact.answer.clone(),
                similarity: discounted,
                rank_score: discounted,
                rerank_score: None,
                source_title: "Learned knowledge".to_string(),
                source_url: None,
                category: None,
            });
        }
    }

    async fn with_budget<T>(
        &self,
        operation: &'static str,
        budget: Duration,
        future: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(budget, future).await {
            Ok(result) => result,
            Err(_) => Err(DocentError::Timeout { operation, budget }),
        }
    }
}

fn from_cached(hit: &CachedHit) -> SearchResult {
    SearchResult {
        chunk_id: hit.chunk_id.clone(),
        document_id: String::new(),
        content: hit.content.clone(),
        similarity: hit.similarity,
        rank_score: hit.similarity,
        rerank_score: None,
        source_title: hit.source_title.clone(),
        source_url: None,
        category: None,
    }
}

/// Append deterministic synonyms for known terms. Keyword-side only.
fn expand_query(query: &str) -> String {
    let lexicon: &[(&str, &str)] = &[
        ("policy", "rules guidelines"),
        ("procedure", "process steps"),
        ("refund", "return reimbursement"),
        ("vacation", "leave pto holiday"),
        ("password", "credentials login"),
        ("salary", "pay compensation"),
        ("meeting", "call standup"),
        ("schedule", "calendar timetable"),
        ("document", "file doc"),
        ("onboarding", "orientation training"),
    ];

    let lower = query.to_lowercase();
    let mut expanded = query.to_string();
    for (term, synonyms) in lexicon {
        if lower.contains(term) {
            expanded.push(' ');
            expanded.push_str(synonyms);
        }
    }
    expanded
}

/// Secondary relevance pass: blend the fused rank with lexical overlap
/// against the original (non-expanded) query, then re-sort. The rerank score
/// is the final ordering authority.
fn rerank(query: &str, results: &mut [SearchResult]) {
    let query_terms: HashSet<String> = terms(query);
    if query_terms.is_empty() {
        return;
    }

    for result in results.iter_mut() {
        let content_terms = terms(&result.content);
        let matched = query_terms
            .iter()
            .filter(|t| content_terms.contains(*t))
            .count();
        let overlap = matched as f32 / query_terms.len() as f32;
        result.rerank_score = Some(0.6 * result.rank_score + 0.4 * overlap);
    }

    results.sort_by(|a, b| {
        b.effective_score()
            .partial_cmp(&a.effective_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSet;
    use crate::config::{CacheConfig, EmbeddingsConfig};
    use crate::error::DocentError;
    use crate::events;
    use crate::models::{Chunk, Document, FactHit, LearnedFact, TextChunk};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_embedding_server(vector: Vec<f32>) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": vector}]
            })))
            .mount(&server)
            .await;
        server
    }

    fn embeddings(base_url: String, caches: Arc<CacheSet>) -> Arc<EmbeddingService> {
        let config = EmbeddingsConfig {
            model: "text-embedding-3-small".to_string(),
            dimensions: 2,
            batch_size: 10,
            batch_delay_ms: 0,
            base_url,
            api_key: Some("test-key".to_string()),
            timeout_secs: 5,
            max_retries: 0,
            breaker_threshold: 5,
            breaker_cooldown_secs: 60,
        };
        Arc::new(EmbeddingService::new(config, caches).unwrap())
    }

    fn service(store: Arc<dyn KnowledgeStore>, base_url: String) -> SearchService {
        let caches = CacheSet::new(&CacheConfig::default());
        SearchService::new(
            store,
            embeddings(base_url, Arc::clone(&caches)),
            caches,
            events::null_sink(),
            SearchConfig::default(),
        )
    }

    async fn seed(store: &InMemoryStore, workspace_id: &str, title: &str, content: &str) -> Document {
        let mut doc = Document::new(workspace_id, &format!("src_{title}"), title);
        doc.content_hash = "hash".to_string();
        store.upsert_document(doc.clone()).await.unwrap();
        let chunk = Chunk::from_text(
            &doc.id,
            TextChunk {
                content: content.to_string(),
                contextual_content: content.to_string(),
                chunk_index: 0,
                total_chunks: 1,
                token_count: content.len().div_ceil(4),
            },
            vec![1.0, 0.0],
        );
        store.replace_chunks(&doc.id, vec![chunk]).await.unwrap();
        doc
    }

    #[tokio::test]
    async fn test_search_returns_resolved_results() {
        let server = mock_embedding_server(vec![1.0, 0.0]).await;
        let store = Arc::new(InMemoryStore::new());
        seed(&store, "ws_1", "Handbook", "The checkout procedure requires a manager key.").await;

        let service = service(store, server.uri());
        let results = service
            .search("what's the checkout procedure?", &SearchOptions::new("ws_1"))
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_title, "Handbook");
        assert!(results[0].similarity > 0.3);
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let server = mock_embedding_server(vec![1.0, 0.0]).await;
        let service = service(Arc::new(InMemoryStore::new()), server.uri());
        assert!(service.search("   ", &SearchOptions::new("ws_1")).await.is_empty());
    }

    #[tokio::test]
    async fn test_second_identical_search_is_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [1.0, 0.0]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        seed(&store, "ws_1", "Handbook", "refund policy text").await;

        let service = service(store, server.uri());
        let options = SearchOptions::new("ws_1");

        let first = service.search("refund policy", &options).await;
        let second = service.search("refund policy", &options).await;

        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].content, second[0].content);
    }

    /// Store whose fused retrieval always fails, to exercise degradation.
    struct FusedFailureStore {
        inner: InMemoryStore,
        fail_vector_too: bool,
    }

    #[async_trait]
    impl KnowledgeStore for FusedFailureStore {
        async fn hybrid_search(&self, _query: &HybridQuery) -> crate::error::Result<Vec<ChunkHit>> {
            Err(DocentError::Store("fused retrieval unavailable".to_string()))
        }

        async fn vector_search(&self, query: &HybridQuery) -> crate::error::Result<Vec<ChunkHit>> {
            if self.fail_vector_too {
                return Err(DocentError::Store("vector retrieval unavailable".to_string()));
            }
            self.inner.vector_search(query).await
        }

        async fn match_learned_facts(
            &self,
            workspace_id: &str,
            bot_id: Option<&str>,
            embedding: &[f32],
            limit: usize,
        ) -> crate::error::Result<Vec<FactHit>> {
            self.inner
                .match_learned_facts(workspace_id, bot_id, embedding, limit)
                .await
        }

        async fn insert_learned_fact(&self, fact: LearnedFact) -> crate::error::Result<()> {
            self.inner.insert_learned_fact(fact).await
        }

        async fn find_document_by_source(
            &self,
            workspace_id: &str,
            source_id: &str,
        ) -> crate::error::Result<Option<Document>> {
            self.inner.find_document_by_source(workspace_id, source_id).await
        }

        async fn upsert_document(&self, document: Document) -> crate::error::Result<()> {
            self.inner.upsert_document(document).await
        }

        async fn replace_chunks(
            &self,
            document_id: &str,
            chunks: Vec<Chunk>,
        ) -> crate::error::Result<()> {
            self.inner.replace_chunks(document_id, chunks).await
        }

        async fn delete_document(&self, document_id: &str) -> crate::error::Result<()> {
            self.inner.delete_document(document_id).await
        }

        async fn get_documents_by_ids(
            &self,
            ids: &[String],
        ) -> crate::error::Result<Vec<Document>> {
            self.inner.get_documents_by_ids(ids).await
        }

        async fn list_documents(&self, workspace_id: &str) -> crate::error::Result<Vec<Document>> {
            self.inner.list_documents(workspace_id).await
        }

        async fn count_documents(&self, workspace_id: &str) -> crate::error::Result<usize> {
            self.inner.count_documents(workspace_id).await
        }
    }

    #[tokio::test]
    async fn test_fused_failure_degrades_to_vector_only() {
        let server = mock_embedding_server(vec![1.0, 0.0]).await;
        let inner = InMemoryStore::new();
        seed(&inner, "ws_1", "Handbook", "refund policy text").await;
        let store = Arc::new(FusedFailureStore {
            inner,
            fail_vector_too: false,
        });

        let service = service(store, server.uri());
        let results = service.search("refund policy", &SearchOptions::new("ws_1")).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_title, "Handbook");
    }

    #[tokio::test]
    async fn test_total_failure_returns_empty_never_throws() {
        let server = mock_embedding_server(vec![1.0, 0.0]).await;
        let store = Arc::new(FusedFailureStore {
            inner: InMemoryStore::new(),
            fail_vector_too: true,
        });

        let service = service(store, server.uri());
        let results = service.search("anything", &SearchOptions::new("ws_1")).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_learned_facts_fold_in_at_discount() {
        let server = mock_embedding_server(vec![1.0, 0.0]).await;
        let store = Arc::new(InMemoryStore::new());
        seed(&store, "ws_1", "Handbook", "general office rules").await;
        store
            .insert_learned_fact(LearnedFact::new(
                "ws_1",
                "wifi password",
                "The wifi password is GuestNet2024",
                vec![1.0, 0.0],
            ))
            .await
            .unwrap();

        let service = service(store, server.uri());
        let results = service.search("wifi password", &SearchOptions::new("ws_1")).await;

        let fact = results
            .iter()
            .find(|r| r.source_title == "Learned knowledge")
            .expect("learned fact merged into results");
        // Exact-match fact discounted by the configured factor.
        assert!((fact.similarity - 0.8).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_reranking_is_final_ordering_authority() {
        let server = mock_embedding_server(vec![1.0, 0.0]).await;
        let store = Arc::new(InMemoryStore::new());
        let doc = seed(&store, "ws_1", "Handbook", "checkout procedure manager key").await;
        // Second chunk: same embedding, no lexical overlap with the query.
        let off_topic = Chunk::from_text(
            &doc.id,
            TextChunk {
                content: "holiday party planning notes".to_string(),
                contextual_content: "holiday party planning notes".to_string(),
                chunk_index: 1,
                total_chunks: 2,
                token_count: 8,
            },
            vec![1.0, 0.0],
        );
        let existing = Chunk::from_text(
            &doc.id,
            TextChunk {
                content: "checkout procedure manager key".to_string(),
                contextual_content: "checkout procedure manager key".to_string(),
                chunk_index: 0,
                total_chunks: 2,
                token_count: 8,
            },
            vec![1.0, 0.0],
        );
        store
            .replace_chunks(&doc.id, vec![off_topic, existing])
            .await
            .unwrap();

        let service = service(store, server.uri());
        let mut options = SearchOptions::new("ws_1");
        options.enable_reranking = true;

        let results = service.search("checkout procedure", &options).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("checkout"));
        assert!(results[0].rerank_score.is_some());
    }

    #[tokio::test]
    async fn test_similarity_floor_applies_to_keyword_only_hits() {
        let server = mock_embedding_server(vec![1.0, 0.0]).await;
        let store = Arc::new(InMemoryStore::new());
        // Orthogonal embedding: cosine similarity to the query is exactly 0,
        // but the content shares the query's terms, so the store's keyword
        // side still ranks it.
        let doc = seed(&store, "ws_1", "Handbook", "unrelated").await;
        let chunk = Chunk::from_text(
            &doc.id,
            TextChunk {
                content: "refund policy text".to_string(),
                contextual_content: "refund policy text".to_string(),
                chunk_index: 0,
                total_chunks: 1,
                token_count: 5,
            },
            vec![0.0, 1.0],
        );
        store.replace_chunks(&doc.id, vec![chunk]).await.unwrap();

        let service = service(store, server.uri());
        let results = service.search("refund policy", &SearchOptions::new("ws_1")).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_error_names_the_stage_that_elapsed() {
        let server = mock_embedding_server(vec![1.0, 0.0]).await;
        let caches = CacheSet::new(&CacheConfig::default());
        let service = SearchService::new(
            Arc::new(InMemoryStore::new()),
            embeddings(server.uri(), Arc::clone(&caches)),
            caches,
            events::null_sink(),
            SearchConfig {
                timeout_secs: 0,
                ..SearchConfig::default()
            },
        );

        let error = service
            .run_pipeline("refund policy", &SearchOptions::new("ws_1"))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            DocentError::Timeout {
                operation: "query embedding",
                ..
            }
        ));
    }

    #[test]
    fn test_expand_query_appends_synonyms() {
        let expanded = expand_query("what is the refund policy");
        assert!(expanded.starts_with("what is the refund policy"));
        assert!(expanded.contains("reimbursement"));
        assert!(expanded.contains("guidelines"));

        assert_eq!(expand_query("unrelated question"), "unrelated question");
    }
}
