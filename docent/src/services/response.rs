use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{scoped_key, CacheSet};
use crate::config::{ConfidenceWeights, SearchConfig};
use crate::embeddings::EmbeddingService;
use crate::error::DocentError;
use crate::events::{EventSink, PipelineEvent};
use crate::formatting::format_for_chat;
use crate::llm::{prompts, CompletionOptions, LlmProvider};
use crate::models::{BotResponse, ChatTurn, LearnedFact, ResponseOptions, SearchOptions, SearchResult};
use crate::services::SearchService;
use crate::store::KnowledgeStore;

/// Conversation turns included in the model prompt.
const HISTORY_WINDOW: usize = 3;

const NO_RESULTS_REPLY: &str =
    "I couldn't find anything relevant to that in the documents I have access to. Could you rephrase the question, or check that the right documents are synced?";

const APOLOGY_REPLY: &str =
    "I'm sorry, I'm having some trouble answering right now. Please try again in a moment.";

/// The outermost user-facing boundary. `respond` never returns an error:
/// every failure path terminates in a well-formed answer whose confidence
/// drops as the answer degrades (1.0 nominal, 0.4 partial fallback, 0.1
/// total failure).
pub struct ResponseService {
    search: Arc<SearchService>,
    store: Arc<dyn KnowledgeStore>,
    embeddings: Arc<EmbeddingService>,
    llm: LlmProvider,
    caches: Arc<CacheSet>,
    events: Arc<dyn EventSink>,
    config: SearchConfig,
}

impl ResponseService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        search: Arc<SearchService>,
        store: Arc<dyn KnowledgeStore>,
        embeddings: Arc<EmbeddingService>,
        llm: LlmProvider,
        caches: Arc<CacheSet>,
        events: Arc<dyn EventSink>,
        config: SearchConfig,
    ) -> Self {
        Self {
            search,
            store,
            embeddings,
            llm,
            caches,
            events,
            config,
        }
    }

    /// Answer a question. Intent checks run in order, first match wins:
    /// greeting (only with no prior history), document inventory, then the
    /// retrieval-augmented path.
    pub async fn respond(
        &self,
        question: &str,
        options: &ResponseOptions,
        history: &[ChatTurn],
    ) -> BotResponse {
        if history.is_empty() && is_greeting(question) {
            return self.greeting_response(options).await;
        }

        if is_inventory_question(question) {
            return self.inventory_response(options).await;
        }

        // Only standalone questions are cacheable; any history makes the
        // answer context-dependent.
        let cacheable = history.is_empty();
        let cache_key = scoped_key(question, &options.workspace_id, options.bot_id.as_deref());
        if cacheable {
            if let Some(cached) = self.caches.responses.get(&cache_key) {
                if let Ok(response) = serde_json::from_str::<BotResponse>(&cached) {
                    debug!(workspace_id = %options.workspace_id, "response cache hit");
                    return response;
                }
            }
        }

        let results = self
            .run_search(question, options, self.config.response_top_k)
            .await;

        if results.is_empty() {
            return BotResponse::new(NO_RESULTS_REPLY.to_string(), Vec::new(), 0.1);
        }

        match self.generate(question, &results, options, history).await {
            Ok(content) => {
                let confidence = confidence_score(&results, &self.config.confidence);
                let response =
                    BotResponse::new(content, source_titles(&results), confidence);
                if cacheable {
                    if let Ok(serialized) = serde_json::to_string(&response) {
                        self.caches.responses.set(cache_key, serialized);
                    }
                }
                self.events.emit(PipelineEvent::ResponseGenerated {
                    workspace_id: options.workspace_id.clone(),
                    confidence: response.confidence,
                    fallback: false,
                });
                response
            }
            Err(error) => {
                warn!(workspace_id = %options.workspace_id, %error, "answer generation failed, degrading");
                let response = self.fallback_response(question, options).await;
                self.events.emit(PipelineEvent::ResponseGenerated {
                    workspace_id: options.workspace_id.clone(),
                    confidence: response.confidence,
                    fallback: true,
                });
                response
            }
        }
    }

    /// Handle a user correcting a previous answer: synthesize an
    /// acknowledgement and, independently, persist the Q/correction pair as a
    /// learned fact. A persistence failure never blocks the acknowledgement.
    pub async fn handle_correction(
        &self,
        question: &str,
        original_answer: &str,
        correction: &str,
        options: &ResponseOptions,
    ) -> BotResponse {
        let ack = match self.synthesize_acknowledgement(question, original_answer, correction).await
        {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, "acknowledgement synthesis failed, using template");
                prompts::correction_acknowledgement(correction)
            }
        };

        self.persist_learned_fact(question, correction, options).await;
        self.events.emit(PipelineEvent::CorrectionCaptured {
            workspace_id: options.workspace_id.clone(),
        });

        BotResponse::new(format_for_chat(&ack), Vec::new(), 1.0)
    }

    async fn greeting_response(&self, options: &ResponseOptions) -> BotResponse {
        let count = self
            .store
            .count_documents(&options.workspace_id)
            .await
            .unwrap_or(0);

        let content = format!(
            "Hi! I'm your knowledge assistant. I currently have access to {count} synced document{} and can answer questions about anything in them. Ask away, and if I ever get something wrong you can correct me and I'll remember.",
            if count == 1 { "" } else { "s" }
        );
        BotResponse::new(content, Vec::new(), 1.0)
    }

    /// Enumerate documents directly from the store, grouped by file type.
    /// Bypasses both caches and the model.
    async fn inventory_response(&self, options: &ResponseOptions) -> BotResponse {
        let documents = match self.store.list_documents(&options.workspace_id).await {
            Ok(docs) => docs,
            Err(error) => {
                warn!(%error, "document listing failed");
                return BotResponse::new(APOLOGY_REPLY.to_string(), Vec::new(), 0.1);
            }
        };

        if documents.is_empty() {
            return BotResponse::new(
                "I don't have any documents synced yet.".to_string(),
                Vec::new(),
                1.0,
            );
        }

        let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for doc in &documents {
            groups
                .entry(doc.source_type.label())
                .or_default()
                .push(doc.title.as_str());
        }

        let mut content = format!("Here are the {} documents I know about:\n", documents.len());
        for (label, titles) in &groups {
            content.push_str(&format!("\n*{label}*\n"));
            for title in titles {
                content.push_str(&format!("• {title}\n"));
            }
        }

        let sources = documents.iter().map(|d| d.title.clone()).collect();
        BotResponse::new(content.trim_end().to_string(), sources, 1.0)
    }

    async fn run_search(
        &self,
        question: &str,
        options: &ResponseOptions,
        top_k: usize,
    ) -> Vec<SearchResult> {
        let mut search_options = SearchOptions::new(&options.workspace_id);
        search_options.bot_id = options.bot_id.clone();
        search_options.top_k = Some(top_k);
        search_options.include_shared = options.include_shared_knowledge;
        search_options.enable_reranking = true;
        search_options.enable_query_expansion = true;

        let mut results = self.search.search(question, &search_options).await;

        if let Some(categories) = &options.categories {
            results.retain(|r| {
                r.category
                    .as_ref()
                    .map_or(true, |c| categories.contains(c))
            });
        }

        results
    }

    /// Call the model over the retrieved context under the response budget.
    async fn generate(
        &self,
        question: &str,
        results: &[SearchResult],
        options: &ResponseOptions,
        history: &[ChatTurn],
    ) -> crate::error::Result<String> {
        let system_prompt = options
            .system_instructions
            .as_deref()
            .unwrap_or(prompts::DEFAULT_SYSTEM_PROMPT);

        let window_start = history.len().saturating_sub(HISTORY_WINDOW);
        let recent_history = &history[window_start..];

        let prompt = prompts::answer_prompt(question, results);

        let (budget_secs, max_tokens) = self
            .llm
            .config()
            .map(|c| (c.timeout_secs, c.max_output_tokens))
            .unwrap_or((25, 1024));
        let budget = Duration::from_secs(budget_secs);

        let completion_options = CompletionOptions {
            max_tokens: Some(max_tokens),
            ..Default::default()
        };

        let raw = match tokio::time::timeout(
            budget,
            self.llm
                .complete(Some(system_prompt), recent_history, &prompt, Some(&completion_options)),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(DocentError::Timeout {
                    operation: "response generation",
                    budget,
                })
            }
        };

        Ok(format_for_chat(&raw))
    }

    /// Degraded tier: re-run a narrow search and hand back the best raw hit
    /// at 0.4 confidence; if even that yields nothing, a generic apology at
    /// 0.1.
    async fn fallback_response(&self, question: &str, options: &ResponseOptions) -> BotResponse {
        let results = self
            .run_search(question, options, self.config.fallback_top_k)
            .await;

        match results.first() {
            Some(best) => {
                let content = format!(
                    "I'm having trouble composing a full answer right now, but here's the most relevant information I found:\n\n{}\n\n_Source: {}_",
                    best.content, best.source_title
                );
                BotResponse::new(content, vec![best.source_title.clone()], 0.4)
            }
            None => BotResponse::new(APOLOGY_REPLY.to_string(), Vec::new(), 0.1),
        }
    }

    async fn synthesize_acknowledgement(
        &self,
        question: &str,
        original_answer: &str,
        correction: &str,
    ) -> crate::error::Result<String> {
        let prompt = format!(
            r#"A user corrected one of your previous answers.

Question: {question}
Your previous answer: {original_answer}
The user's correction: {correction}

Acknowledge the correction and restate the corrected answer in one or two sentences. Do not apologize at length."#
        );

        let budget_secs = self.llm.config().map(|c| c.timeout_secs).unwrap_or(25);
        match tokio::time::timeout(
            Duration::from_secs(budget_secs),
            self.llm.complete(None, &[], &prompt, None),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DocentError::Timeout {
                operation: "correction acknowledgement",
                budget: Duration::from_secs(budget_secs),
            }),
        }
    }

    async fn persist_learned_fact(
        &self,
        question: &str,
        correction: &str,
        options: &ResponseOptions,
    ) {
        let embedding = match self.embeddings.embed(question).await {
            Ok(vector) => vector,
            Err(error) => {
                warn!(%error, "could not embed correction, learned fact not persisted");
                return;
            }
        };

        let mut fact = LearnedFact::new(&options.workspace_id, question, correction, embedding);
        fact.bot_id = options.bot_id.clone();

        if let Err(error) = self.store.insert_learned_fact(fact).await {
            warn!(%error, "learned fact persistence failed");
        }
    }
}

/// Weighted confidence: top-hit similarity, mean similarity, and a
/// document-diversity bonus that saturates at the configured distinct-source
/// count. Clamped to [0, 1].
pub fn confidence_score(results: &[SearchResult], weights: &ConfidenceWeights) -> f32 {
    if results.is_empty() {
        return 0.0;
    }

    let top = results
        .iter()
        .map(|r| r.similarity)
        .fold(0.0f32, f32::max);
    let mean = results.iter().map(|r| r.similarity).sum::<f32>() / results.len() as f32;

    let mut doc_ids: Vec<&str> = results.iter().map(|r| r.document_id.as_str()).collect();
    doc_ids.sort_unstable();
    doc_ids.dedup();
    let diversity = (doc_ids.len() as f32 / weights.diversity_cap as f32).min(1.0);

    (weights.top_similarity * top + weights.mean_similarity * mean + weights.diversity * diversity)
        .clamp(0.0, 1.0)
}

fn source_titles(results: &[SearchResult]) -> Vec<String> {
    let mut titles: Vec<String> = Vec::new();
    for result in results {
        if !titles.contains(&result.source_title) {
            titles.push(result.source_title.clone());
        }
    }
    titles
}

fn is_greeting(question: &str) -> bool {
    let q = question.trim().to_lowercase();
    let q = q.trim_end_matches(['!', '.', '?']);

    matches!(
        q,
        "hi" | "hello" | "hey" | "yo" | "hi there" | "hello there" | "good morning"
            | "good afternoon" | "good evening" | "hey there"
    ) || q.contains("what can you do")
        || q.contains("how can you help")
        || q.contains("who are you")
}

fn is_inventory_question(question: &str) -> bool {
    let q = question.trim().to_lowercase();

    const PATTERNS: [&str; 7] = [
        "list all doc",
        "list the doc",
        "list your doc",
        "what documents",
        "which documents",
        "what files",
        "show me the doc",
    ];
    PATTERNS.iter().any(|p| q.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSet;
    use crate::config::{CacheConfig, EmbeddingsConfig, LlmConfig};
    use crate::events;
    use crate::models::{Chunk, Document, TextChunk};
    use crate::store::InMemoryStore;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_embedding_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;
        server
    }

    fn build_service(
        store: Arc<InMemoryStore>,
        embed_url: String,
        llm: LlmProvider,
    ) -> ResponseService {
        let caches = CacheSet::new(&CacheConfig::default());
        let embed_config = EmbeddingsConfig {
            model: "text-embedding-3-small".to_string(),
            dimensions: 2,
            batch_size: 10,
            batch_delay_ms: 0,
            base_url: embed_url,
            api_key: Some("test-key".to_string()),
            timeout_secs: 5,
            max_retries: 0,
            breaker_threshold: 5,
            breaker_cooldown_secs: 60,
        };
        let embeddings =
            Arc::new(EmbeddingService::new(embed_config, Arc::clone(&caches)).unwrap());
        let search = Arc::new(SearchService::new(
            store.clone() as Arc<dyn KnowledgeStore>,
            Arc::clone(&embeddings),
            Arc::clone(&caches),
            events::null_sink(),
            SearchConfig::default(),
        ));
        ResponseService::new(
            search,
            store as Arc<dyn KnowledgeStore>,
            embeddings,
            llm,
            caches,
            events::null_sink(),
            SearchConfig::default(),
        )
    }

    fn llm_against(server_uri: String) -> LlmProvider {
        LlmProvider::new(Some(&LlmConfig {
            model: "gpt-4o".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: Some(server_uri),
            max_output_tokens: 256,
            timeout_secs: 5,
            max_retries: 0,
        }))
    }

    async fn seed(store: &InMemoryStore, title: &str, content: &str) -> Document {
        let mut doc = Document::new("ws_1", &format!("src_{title}"), title);
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
    async fn test_greeting_short_circuits_search() {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, "Handbook", "content").await;

        // No embedding server mounted: a search attempt would fail loudly.
        let service = build_service(
            store,
            "http://127.0.0.1:9".to_string(),
            LlmProvider::unavailable("not configured"),
        );

        let response = service
            .respond("what can you do?", &ResponseOptions::new("ws_1"), &[])
            .await;

        assert!(response.content.contains("1 synced document"));
        assert_eq!(response.confidence, 1.0);
        assert!(response.sources.is_empty());
    }

    #[tokio::test]
    async fn test_greeting_with_history_is_not_short_circuited() {
        let server = mock_embedding_server().await;
        let store = Arc::new(InMemoryStore::new());
        let service = build_service(store, server.uri(), LlmProvider::unavailable("none"));

        let history = vec![ChatTurn::user("earlier"), ChatTurn::assistant("answer")];
        let response = service
            .respond("hi", &ResponseOptions::new("ws_1"), &history)
            .await;

        // Goes down the search path, finds nothing.
        assert!((response.confidence - 0.1).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_inventory_lists_documents_by_type() {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, "Handbook", "content").await;
        let mut report = Document::new("ws_1", "src_report", "Q3 Report");
        report.source_type = crate::models::SourceType::Pdf;
        store.upsert_document(report).await.unwrap();

        let service = build_service(
            store,
            "http://127.0.0.1:9".to_string(),
            LlmProvider::unavailable("none"),
        );

        let response = service
            .respond("list all docs please", &ResponseOptions::new("ws_1"), &[])
            .await;

        assert!(response.content.contains("*PDF*"));
        assert!(response.content.contains("Q3 Report"));
        assert!(response.content.contains("Handbook"));
        assert_eq!(response.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_zero_results_returns_fixed_low_confidence() {
        let server = mock_embedding_server().await;
        let store = Arc::new(InMemoryStore::new());
        let service = build_service(store, server.uri(), LlmProvider::unavailable("none"));

        let response = service
            .respond("what is the refund policy?", &ResponseOptions::new("ws_1"), &[])
            .await;

        assert!(response.content.contains("couldn't find"));
        assert!((response.confidence - 0.1).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_model_failure_degrades_to_raw_best_hit() {
        let server = mock_embedding_server().await;
        let store = Arc::new(InMemoryStore::new());
        seed(&store, "Handbook", "The checkout procedure requires a manager key.").await;

        let service = build_service(store, server.uri(), LlmProvider::unavailable("no model"));

        let response = service
            .respond("what's the checkout procedure?", &ResponseOptions::new("ws_1"), &[])
            .await;

        assert!(response.content.contains("manager key"));
        assert_eq!(response.sources, vec!["Handbook".to_string()]);
        assert!((response.confidence - 0.4).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_successful_generation_grounds_sources() {
        let embed_server = mock_embedding_server().await;
        let llm_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 0,
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "You need a **manager key** for checkout."},
                    "finish_reason": "stop"
                }]
            })))
            .mount(&llm_server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        seed(&store, "Handbook", "The checkout procedure requires a manager key.").await;

        let service = build_service(store, embed_server.uri(), llm_against(llm_server.uri()));

        let response = service
            .respond("what's the checkout procedure?", &ResponseOptions::new("ws_1"), &[])
            .await;

        assert!(response.sources.contains(&"Handbook".to_string()));
        // Markdown sanitized for the chat surface.
        assert!(response.content.contains("*manager key*"));
        assert!(!response.content.contains("**"));
        assert!(response.confidence > 0.4);
    }

    #[tokio::test]
    async fn test_correction_persists_fact_even_without_model() {
        let server = mock_embedding_server().await;
        let store = Arc::new(InMemoryStore::new());
        let service = build_service(
            Arc::clone(&store),
            server.uri(),
            LlmProvider::unavailable("none"),
        );

        let response = service
            .handle_correction(
                "what is the wifi password?",
                "I don't know.",
                "The wifi password is GuestNet2024",
                &ResponseOptions::new("ws_1"),
            )
            .await;

        assert!(response.content.contains("GuestNet2024"));

        let hits = store
            .match_learned_facts("ws_1", None, &[1.0, 0.0], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fact.answer, "The wifi password is GuestNet2024");
    }

    #[test]
    fn test_confidence_monotonicity() {
        let weights = ConfidenceWeights::default();

        let make = |sims: &[(f32, &str)]| -> Vec<SearchResult> {
            sims.iter()
                .map(|(sim, doc)| SearchResult {
                    chunk_id: "c".to_string(),
                    document_id: doc.to_string(),
                    content: "x".to_string(),
                    similarity: *sim,
                    rank_score: *sim,
                    rerank_score: None,
                    source_title: doc.to_string(),
                    source_url: None,
                    category: None,
                })
                .collect()
        };

        let weak = make(&[(0.4, "d1"), (0.4, "d1")]);
        let strong = make(&[(0.9, "d1"), (0.8, "d2"), (0.8, "d3")]);

        assert!(confidence_score(&strong, &weights) >= confidence_score(&weak, &weights));
        assert_eq!(confidence_score(&[], &weights), 0.0);

        // Saturates within [0, 1] even with perfect scores.
        let perfect = make(&[(1.0, "d1"), (1.0, "d2"), (1.0, "d3"), (1.0, "d4"), (1.0, "d5")]);
        assert!(confidence_score(&perfect, &weights) <= 1.0);
    }

    #[test]
    fn test_greeting_patterns() {
        assert!(is_greeting("hi"));
        assert!(is_greeting("Hello!"));
        assert!(is_greeting("What can you do?"));
        assert!(!is_greeting("hi, what's the refund policy?"));
        assert!(!is_greeting("what's the checkout procedure?"));
    }

    #[test]
    fn test_inventory_patterns() {
        assert!(is_inventory_question("list all docs"));
        assert!(is_inventory_question("What documents do you have?"));
        assert!(!is_inventory_question("what's in the handbook document?"));
    }
}
