use std::sync::Arc;

/// Analytics/observability events emitted by the pipeline.
///
/// The sink is a fire-and-forget side-effect port: the core never awaits it
/// for correctness and a failing sink must never affect control flow.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    SearchCompleted {
        workspace_id: String,
        result_count: usize,
        degraded: bool,
    },
    SearchFailed {
        workspace_id: String,
        message: String,
    },
    ResponseGenerated {
        workspace_id: String,
        confidence: f32,
        fallback: bool,
    },
    CorrectionCaptured {
        workspace_id: String,
    },
    SyncCompleted {
        workspace_id: String,
        added: usize,
        updated: usize,
        removed: usize,
        error_count: usize,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Default sink: forwards events to `tracing` at info level.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::SearchCompleted {
                workspace_id,
                result_count,
                degraded,
            } => {
                tracing::info!(%workspace_id, result_count, degraded, "search completed");
            }
            PipelineEvent::SearchFailed {
                workspace_id,
                message,
            } => {
                tracing::warn!(%workspace_id, %message, "search failed");
            }
            PipelineEvent::ResponseGenerated {
                workspace_id,
                confidence,
                fallback,
            } => {
                tracing::info!(%workspace_id, confidence, fallback, "response generated");
            }
            PipelineEvent::CorrectionCaptured { workspace_id } => {
                tracing::info!(%workspace_id, "correction captured");
            }
            PipelineEvent::SyncCompleted {
                workspace_id,
                added,
                updated,
                removed,
                error_count,
            } => {
                tracing::info!(
                    %workspace_id, added, updated, removed, error_count,
                    "document sync completed"
                );
            }
        }
    }
}

/// Sink that drops everything; used in tests.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: PipelineEvent) {}
}

pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingSink)
}

#[cfg(test)]
pub(crate) fn null_sink() -> Arc<dyn EventSink> {
    Arc::new(NullSink)
}
