use serde::{Deserialize, Serialize};

/// Output of the chunker: a bounded slice of document text before any
/// embedding has been attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// The raw slice of the source text.
    pub content: String,
    /// The content with a synthesized header (title, file-type label,
    /// "Section i of N") prepended. This is what gets embedded and shown to
    /// the model, so context-free chunks still retrieve well.
    pub contextual_content: String,
    /// Zero-based position within the document.
    pub chunk_index: usize,
    /// Total chunks produced for the document; identical on every chunk.
    pub total_chunks: usize,
    pub token_count: usize,
}

/// A stored chunk row: text plus its embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub contextual_content: String,
    pub embedding: Vec<f32>,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

impl Chunk {
    pub fn from_text(document_id: &str, text: TextChunk, embedding: Vec<f32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            content: text.content,
            contextual_content: text.contextual_content,
            embedding,
            chunk_index: text.chunk_index,
            total_chunks: text.total_chunks,
        }
    }
}
