mod api;
mod breaker;
mod service;

pub use api::{EmbeddingApiClient, EmbeddingApiConfig};
pub use breaker::CircuitBreaker;
pub use service::EmbeddingService;
