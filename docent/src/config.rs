use serde::Deserialize;
use std::env;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt(var: &str) -> Option<String> {
    env::var(var).ok().filter(|val| !val.is_empty())
}

/// Split a `provider/model` string. Bare model names default to "openai".
pub fn parse_llm_provider_model(model: &str) -> (&str, &str) {
    match model.split_once('/') {
        Some((provider, rest)) if !provider.is_empty() && !rest.is_empty() => (provider, rest),
        _ => ("openai", model),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub embeddings: EmbeddingsConfig,
    pub llm: Option<LlmConfig>,
    pub search: SearchConfig,
    pub cache: CacheConfig,
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    /// Delay between batches, to stay under provider rate limits.
    pub batch_delay_ms: u64,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Consecutive failures before the circuit opens.
    pub breaker_threshold: u32,
    /// Cool-down before a half-open probe is allowed.
    pub breaker_cooldown_secs: u64,
}

/// Chat model configuration for answer synthesis.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub top_k: usize,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub min_similarity: f32,
    /// Wider retrieval used when grounding a generated answer.
    pub response_top_k: usize,
    /// Narrow retrieval used by the degraded fallback path.
    pub fallback_top_k: usize,
    pub timeout_secs: u64,
    /// Similarity discount applied when merging learned facts into results.
    pub learned_fact_discount: f32,
    pub confidence: ConfidenceWeights,
}

/// Weights of the confidence formula. Empirically tuned defaults; the only
/// hard requirement is that higher similarity and more distinct source
/// documents never lower the score.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfidenceWeights {
    pub top_similarity: f32,
    pub mean_similarity: f32,
    pub diversity: f32,
    /// Distinct-document count at which the diversity bonus saturates.
    pub diversity_cap: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub embedding_capacity: usize,
    pub search_capacity: usize,
    pub response_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size as an approximate token budget (chars / 4).
    pub target_tokens: usize,
    /// Character overlap carried between adjacent chunks.
    pub overlap_chars: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let llm = parse_env_opt("LLM_MODEL").map(|model| LlmConfig {
            model,
            api_key: parse_env_opt("LLM_API_KEY").or_else(|| parse_env_opt("OPENAI_API_KEY")),
            base_url: parse_env_opt("LLM_BASE_URL"),
            max_output_tokens: parse_env_or("LLM_MAX_OUTPUT_TOKENS", 1024),
            timeout_secs: parse_env_or("LLM_TIMEOUT_SECS", 25),
            max_retries: parse_env_or("LLM_MAX_RETRIES", 2),
        });

        Self {
            embeddings: EmbeddingsConfig {
                model: parse_env_or("EMBEDDING_MODEL", "text-embedding-3-small".to_string()),
                dimensions: parse_env_or("EMBEDDING_DIMENSIONS", 1536),
                batch_size: parse_env_or("EMBEDDING_BATCH_SIZE", 100),
                batch_delay_ms: parse_env_or("EMBEDDING_BATCH_DELAY_MS", 100),
                base_url: parse_env_or(
                    "EMBEDDING_BASE_URL",
                    "https://api.openai.com/v1".to_string(),
                ),
                api_key: parse_env_opt("EMBEDDING_API_KEY")
                    .or_else(|| parse_env_opt("OPENAI_API_KEY")),
                timeout_secs: parse_env_or("EMBEDDING_TIMEOUT_SECS", 10),
                max_retries: parse_env_or("EMBEDDING_MAX_RETRIES", 2),
                breaker_threshold: parse_env_or("EMBEDDING_BREAKER_THRESHOLD", 5),
                breaker_cooldown_secs: parse_env_or("EMBEDDING_BREAKER_COOLDOWN_SECS", 30),
            },
            llm,
            search: SearchConfig {
                top_k: parse_env_or("SEARCH_TOP_K", 10),
                vector_weight: parse_env_or("SEARCH_VECTOR_WEIGHT", 0.7),
                keyword_weight: parse_env_or("SEARCH_KEYWORD_WEIGHT", 0.3),
                min_similarity: parse_env_or("SEARCH_MIN_SIMILARITY", 0.3),
                response_top_k: parse_env_or("SEARCH_RESPONSE_TOP_K", 15),
                fallback_top_k: parse_env_or("SEARCH_FALLBACK_TOP_K", 5),
                timeout_secs: parse_env_or("SEARCH_TIMEOUT_SECS", 15),
                learned_fact_discount: parse_env_or("SEARCH_LEARNED_FACT_DISCOUNT", 0.8),
                confidence: ConfidenceWeights {
                    top_similarity: parse_env_or("CONFIDENCE_TOP_WEIGHT", 0.5),
                    mean_similarity: parse_env_or("CONFIDENCE_MEAN_WEIGHT", 0.3),
                    diversity: parse_env_or("CONFIDENCE_DIVERSITY_WEIGHT", 0.2),
                    diversity_cap: parse_env_or("CONFIDENCE_DIVERSITY_CAP", 5),
                },
            },
            cache: CacheConfig {
                embedding_capacity: parse_env_or("CACHE_EMBEDDING_CAPACITY", 1000),
                search_capacity: parse_env_or("CACHE_SEARCH_CAPACITY", 500),
                response_capacity: parse_env_or("CACHE_RESPONSE_CAPACITY", 200),
            },
            chunking: ChunkingConfig {
                target_tokens: parse_env_or("CHUNK_TARGET_TOKENS", 375),
                overlap_chars: parse_env_or("CHUNK_OVERLAP_CHARS", 200),
            },
        }
    }
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            top_similarity: 0.5,
            mean_similarity: 0.3,
            diversity: 0.2,
            diversity_cap: 5,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            min_similarity: 0.3,
            response_top_k: 15,
            fallback_top_k: 5,
            timeout_secs: 15,
            learned_fact_discount: 0.8,
            confidence: ConfidenceWeights::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_capacity: 1000,
            search_capacity: 500,
            response_capacity: 200,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 375,
            overlap_chars: 200,
        }
    }
}
