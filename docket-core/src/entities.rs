use std::{fmt, path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FailureReason, JobError};

pub const DOCKET_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Every extension accepted at submission, lowercase and without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "bmp", "tiff", "webp", "doc", "docx", "txt", "md", "xml",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Image,
    Word,
    Text,
    Xml,
}

impl DocumentType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "jpg" | "jpeg" | "png" | "bmp" | "tiff" | "webp" => Some(Self::Image),
            "doc" | "docx" => Some(Self::Word),
            "txt" | "md" => Some(Self::Text),
            "xml" => Some(Self::Xml),
            _ => None,
        }
    }

    /// Detects the document type from the filename extension.
    pub fn from_filename(filename: &str) -> Result<Self, JobError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        Self::from_extension(ext).ok_or_else(|| {
            JobError::UnsupportedFormat(format!(
                "{filename:?} (supported: {})",
                SUPPORTED_EXTENSIONS.join(", ")
            ))
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Image => "image",
            Self::Word => "word",
            Self::Text => "text",
            Self::Xml => "xml",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionMode {
    #[serde(rename = "text_only")]
    TextOnly,
    #[serde(rename = "text_layout")]
    TextLayout,
    #[default]
    #[serde(rename = "markdown")]
    Markdown,
    #[serde(rename = "structured")]
    Structured,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextOnly => "text_only",
            Self::TextLayout => "text_layout",
            Self::Markdown => "markdown",
            Self::Structured => "structured",
        }
    }
}

impl FromStr for ExtractionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text_only" => Ok(Self::TextOnly),
            "text_layout" => Ok(Self::TextLayout),
            "markdown" => Ok(Self::Markdown),
            "structured" => Ok(Self::Structured),
            other => anyhow::bail!(
                "Invalid extraction mode {other:?}: expected text_only, text_layout, markdown or structured"
            ),
        }
    }
}

/// Options forwarded untouched to the document processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub extraction_mode: ExtractionMode,
    pub extract_images: bool,
    pub extract_tables: bool,
    pub ocr_language: String,
    pub preserve_layout: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            extraction_mode: ExtractionMode::Markdown,
            extract_images: true,
            extract_tables: true,
            ocr_language: "ch".to_owned(),
            preserve_layout: true,
        }
    }
}

impl ProcessOptions {
    pub fn with_mode(extraction_mode: ExtractionMode) -> Self {
        Self {
            extraction_mode,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedImage {
    pub path: String,
    pub kind: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub pages: Option<usize>,
    pub original_format: String,
    pub processor: String,
    pub converted_to: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text_content: String,
    pub markdown_content: Option<String>,
    pub images: Vec<ExtractedImage>,
    pub tables: Vec<serde_json::Value>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a job, as handed out to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub filename: String,
    pub file_size: u64,
    pub document_type: DocumentType,
    pub extraction_mode: ExtractionMode,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub result: Option<ExtractionResult>,
    pub failure: Option<FailureReason>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub max_concurrent_tasks: usize,
}

impl JobStats {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.timed_out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<JobSnapshot>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}
