use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    entities::{DocumentType, ExtractionResult},
    error::ProcessorError,
};

use super::{CommandConfig, CommandProcessor, DocumentProcessor, ProcessRequest, TextProcessor};

/// Dispatches each request to the backend registered for its document type.
#[derive(Clone, Default)]
pub struct RoutingProcessor {
    backends: HashMap<DocumentType, Arc<dyn DocumentProcessor>>,
}

impl RoutingProcessor {
    pub fn new(backends: Vec<(DocumentType, Arc<dyn DocumentProcessor>)>) -> Self {
        Self {
            backends: backends.into_iter().collect(),
        }
    }

    /// Registers `backend` for every document type it supports, replacing
    /// earlier registrations.
    pub fn register(mut self, backend: Arc<dyn DocumentProcessor>) -> Self {
        for document_type in [
            DocumentType::Pdf,
            DocumentType::Image,
            DocumentType::Word,
            DocumentType::Text,
            DocumentType::Xml,
        ] {
            if backend.supports(document_type) {
                self.backends.insert(document_type, backend.clone());
            }
        }
        self
    }

    pub fn backend(&self, document_type: DocumentType) -> Option<&Arc<dyn DocumentProcessor>> {
        self.backends.get(&document_type)
    }
}

impl std::fmt::Debug for RoutingProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<_> = self
            .backends
            .iter()
            .map(|(ty, backend)| (ty.as_str(), backend.name()))
            .collect();
        routes.sort();
        f.debug_struct("RoutingProcessor")
            .field("routes", &routes)
            .finish()
    }
}

#[async_trait]
impl DocumentProcessor for RoutingProcessor {
    fn name(&self) -> &str {
        "router"
    }

    fn supports(&self, document_type: DocumentType) -> bool {
        self.backends.contains_key(&document_type)
    }

    async fn process(&self, req: ProcessRequest) -> Result<ExtractionResult, ProcessorError> {
        let backend = self
            .backends
            .get(&req.document_type)
            .ok_or(ProcessorError::Unsupported(req.document_type))?;
        tracing::debug!(
            backend = backend.name(),
            document_type = %req.document_type,
            "routing document"
        );
        backend.process(req).await
    }
}

/// Text and XML are handled natively, everything else by the external parser.
pub fn default_processor(config: CommandConfig) -> RoutingProcessor {
    RoutingProcessor::default()
        .register(Arc::new(CommandProcessor::new(config)))
        .register(Arc::new(TextProcessor))
}
