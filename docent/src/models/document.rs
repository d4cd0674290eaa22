use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of artifact a document was synced from. Drives the human label
/// prepended to chunk context headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    GoogleDoc,
    Pdf,
    Word,
    Spreadsheet,
    Presentation,
    WebPage,
    Markdown,
    #[default]
    PlainText,
}

impl SourceType {
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "application/vnd.google-apps.document" => SourceType::GoogleDoc,
            "application/pdf" => SourceType::Pdf,
            "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                SourceType::Word
            }
            "application/vnd.google-apps.spreadsheet"
            | "application/vnd.ms-excel"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                SourceType::Spreadsheet
            }
            "application/vnd.google-apps.presentation"
            | "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                SourceType::Presentation
            }
            "text/html" => SourceType::WebPage,
            "text/markdown" => SourceType::Markdown,
            _ => SourceType::PlainText,
        }
    }

    /// Human-readable label used in contextual chunk headers.
    pub fn label(&self) -> &'static str {
        match self {
            SourceType::GoogleDoc => "Google Doc",
            SourceType::Pdf => "PDF",
            SourceType::Word => "Word Document",
            SourceType::Spreadsheet => "Spreadsheet",
            SourceType::Presentation => "Presentation",
            SourceType::WebPage => "Web Page",
            SourceType::Markdown => "Markdown",
            SourceType::PlainText => "Plain Text",
        }
    }
}

/// A synced source artifact. All documents are scoped to a workspace; an
/// optional bot id narrows ownership further.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub workspace_id: String,
    pub bot_id: Option<String>,
    pub title: String,
    pub source_type: SourceType,
    /// Identifier of the artifact in its source system (e.g. a Drive file id).
    pub source_id: String,
    pub source_url: Option<String>,
    /// SHA-256 of the extracted plain text, used for change detection.
    pub content_hash: String,
    pub category: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(workspace_id: &str, source_id: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.to_string(),
            bot_id: None,
            title: title.to_string(),
            source_type: SourceType::default(),
            source_id: source_id.to_string(),
            source_url: None,
            content_hash: String::new(),
            category: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A file discovered in an external source during sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub url: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Per-file failure recorded in a sync report instead of aborting the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    pub file_name: String,
    pub message: String,
    /// True when the failure was an expired/revoked credential; the caller
    /// should prompt the tenant to re-authenticate.
    pub auth_expired: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub errors: Vec<SyncError>,
}
