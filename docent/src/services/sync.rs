use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::ChunkingConfig;
use crate::embeddings::EmbeddingService;
use crate::error::{ErrorKind, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::models::{Chunk, Document, SourceFile, SourceType, SyncError, SyncReport};
use crate::processing::{ChunkContext, TextChunker};
use crate::store::KnowledgeStore;

/// External document source consumed by the sync orchestrator (a Drive
/// folder, a web crawler). Listing and text extraction live behind this
/// boundary; the orchestrator only sees plain text.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn list_files(&self) -> Result<Vec<SourceFile>>;

    async fn fetch_text(&self, file: &SourceFile) -> Result<String>;
}

/// Drives the write path into the retrieval index: discover files, hash
/// content, and re-chunk/re-embed whatever changed. Idempotent under retry;
/// one bad file never aborts the batch.
pub struct SyncService {
    store: Arc<dyn KnowledgeStore>,
    embeddings: Arc<EmbeddingService>,
    chunker: TextChunker,
    events: Arc<dyn EventSink>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embeddings: Arc<EmbeddingService>,
        chunking: &ChunkingConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            embeddings,
            chunker: TextChunker::new(chunking),
            events,
        }
    }

    /// Synchronize a workspace's index against a source. Always returns a
    /// report; per-file failures become report entries.
    pub async fn sync(
        &self,
        workspace_id: &str,
        bot_id: Option<&str>,
        source: &dyn DocumentSource,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        let files = match source.list_files().await {
            Ok(files) => files,
            Err(error) => {
                warn!(%workspace_id, %error, "source listing failed");
                report.errors.push(SyncError {
                    file_name: "<listing>".to_string(),
                    message: error.to_string(),
                    auth_expired: error.kind() == ErrorKind::AuthExpired,
                });
                return report;
            }
        };

        let mut seen_source_ids: HashSet<String> = HashSet::new();

        for file in &files {
            seen_source_ids.insert(file.id.clone());

            match self.sync_file(workspace_id, bot_id, source, file).await {
                Ok(FileOutcome::Added) => report.added += 1,
                Ok(FileOutcome::Updated) => report.updated += 1,
                Ok(FileOutcome::Unchanged) => {}
                Err(error) => {
                    warn!(file = %file.name, %error, "file sync failed");
                    report.errors.push(SyncError {
                        file_name: file.name.clone(),
                        message: error.to_string(),
                        auth_expired: error.kind() == ErrorKind::AuthExpired,
                    });
                }
            }
        }

        report.removed = self
            .remove_vanished(workspace_id, bot_id, &seen_source_ids, &mut report.errors)
            .await;

        info!(
            %workspace_id,
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            errors = report.errors.len(),
            "sync finished"
        );
        self.events.emit(PipelineEvent::SyncCompleted {
            workspace_id: workspace_id.to_string(),
            added: report.added,
            updated: report.updated,
            removed: report.removed,
            error_count: report.errors.len(),
        });

        report
    }

    async fn sync_file(
        &self,
        workspace_id: &str,
        bot_id: Option<&str>,
        source: &dyn DocumentSource,
        file: &SourceFile,
    ) -> Result<FileOutcome> {
        let text = source.fetch_text(file).await?;
        let hash = content_hash(&text);

        let existing = self
            .store
            .find_document_by_source(workspace_id, &file.id)
            .await?;

        match existing {
            Some(document) if document.content_hash == hash => {
                debug!(file = %file.name, "content unchanged, skipping");
                Ok(FileOutcome::Unchanged)
            }
            Some(mut document) => {
                document.title = file.name.clone();
                document.source_type = SourceType::from_mime(&file.mime_type);
                document.source_url = file.url.clone();
                document.content_hash = hash;
                document.updated_at = chrono::Utc::now();

                self.index_document(&document, &text).await?;
                self.store.upsert_document(document).await?;
                Ok(FileOutcome::Updated)
            }
            None => {
                let mut document = Document::new(workspace_id, &file.id, &file.name);
                document.bot_id = bot_id.map(String::from);
                document.source_type = SourceType::from_mime(&file.mime_type);
                document.source_url = file.url.clone();
                document.content_hash = hash;

                self.index_document(&document, &text).await?;
                self.store.upsert_document(document).await?;
                Ok(FileOutcome::Added)
            }
        }
    }

    /// Chunk, embed, and atomically swap the document's chunk rows. The
    /// contextual variant is what gets embedded.
    async fn index_document(&self, document: &Document, text: &str) -> Result<()> {
        let context = ChunkContext {
            title: Some(document.title.clone()),
            mime_type: Some(mime_for(document.source_type)),
        };
        let text_chunks = self.chunker.chunk(text, Some(&context));

        let contextual: Vec<String> = text_chunks
            .iter()
            .map(|c| c.contextual_content.clone())
            .collect();
        let embeddings = self.embeddings.embed_batch(&contextual).await?;

        let chunks: Vec<Chunk> = text_chunks
            .into_iter()
            .zip(embeddings)
            .map(|(text_chunk, embedding)| Chunk::from_text(&document.id, text_chunk, embedding))
            .collect();

        self.store.replace_chunks(&document.id, chunks).await
    }

    /// Delete documents that vanished from the source. Only documents owned
    /// by this sync's scope are candidates: a bot-scoped sync never touches
    /// another bot's documents, and an unscoped sync never touches bot-owned
    /// ones.
    async fn remove_vanished(
        &self,
        workspace_id: &str,
        bot_id: Option<&str>,
        seen: &HashSet<String>,
        errors: &mut Vec<SyncError>,
    ) -> usize {
        let documents = match self.store.list_documents(workspace_id).await {
            Ok(docs) => docs,
            Err(error) => {
                warn!(%error, "could not list documents for removal pass");
                errors.push(SyncError {
                    file_name: "<removal>".to_string(),
                    message: error.to_string(),
                    auth_expired: false,
                });
                return 0;
            }
        };

        let mut removed = 0;
        for document in documents {
            if document.bot_id.as_deref() != bot_id {
                continue;
            }
            if seen.contains(&document.source_id) {
                continue;
            }
            match self.store.delete_document(&document.id).await {
                Ok(()) => removed += 1,
                Err(error) => errors.push(SyncError {
                    file_name: document.title.clone(),
                    message: error.to_string(),
                    auth_expired: false,
                }),
            }
        }
        removed
    }
}

enum FileOutcome {
    Added,
    Updated,
    Unchanged,
}

/// SHA-256 of the extracted plain text, hex encoded.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn mime_for(source_type: SourceType) -> String {
    match source_type {
        SourceType::GoogleDoc => "application/vnd.google-apps.document",
        SourceType::Pdf => "application/pdf",
        SourceType::Word => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        SourceType::Spreadsheet => "application/vnd.google-apps.spreadsheet",
        SourceType::Presentation => "application/vnd.google-apps.presentation",
        SourceType::WebPage => "text/html",
        SourceType::Markdown => "text/markdown",
        SourceType::PlainText => "text/plain",
    }
    .to_string()
}
