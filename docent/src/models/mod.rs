mod chunk;
mod document;
mod response;
mod search;

pub use chunk::{Chunk, TextChunk};
pub use document::{Document, SourceFile, SourceType, SyncError, SyncReport};
pub use response::{BotResponse, ChatRole, ChatTurn, ResponseOptions};
pub use search::{ChunkHit, FactHit, HybridQuery, LearnedFact, SearchOptions, SearchResult};
