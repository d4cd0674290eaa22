mod chunker;

pub use chunker::{estimate_tokens, validate_chunk_size, ChunkContext, TextChunker};
