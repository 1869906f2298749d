use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    entities::{DocumentType, ExtractionResult, JobId, ProcessOptions},
    error::ProcessorError,
};

pub mod command;
pub mod router;
pub mod text;

pub use command::{CommandConfig, CommandProcessor};
pub use router::{default_processor, RoutingProcessor};
pub use text::TextProcessor;

/// Everything a processor gets to see about one job.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub job_id: JobId,
    pub filename: String,
    pub payload: Arc<[u8]>,
    pub document_type: DocumentType,
    pub options: ProcessOptions,
}

/// Turns raw document bytes into extracted content.
///
/// Implementations may take arbitrarily long or never return; the job manager
/// enforces its own deadline and abandons the call when it expires.
#[async_trait]
pub trait DocumentProcessor: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn supports(&self, document_type: DocumentType) -> bool;

    async fn process(&self, req: ProcessRequest) -> Result<ExtractionResult, ProcessorError>;
}
