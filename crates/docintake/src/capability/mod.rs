//! Document-understanding service: classification and OCR.

pub mod http;
pub mod scripted;

pub use http::DocumentIntelligenceClient;
pub use scripted::{CapabilityCall, ScriptedCapability};

use async_trait::async_trait;

use crate::error::CapabilityError;

/// Long-running document analysis. Each call submits the document and
/// resolves once the remote operation has finished.
#[async_trait]
pub trait DocumentIntelligence: Send + Sync {
    /// Runs a document classifier and returns its raw result.
    async fn classify(
        &self,
        model_id: &str,
        document: &[u8],
    ) -> Result<serde_json::Value, CapabilityError>;

    /// Runs an extraction model. The result carries `pages[].lines[].content`.
    async fn analyze(
        &self,
        model_id: &str,
        document: &[u8],
    ) -> Result<serde_json::Value, CapabilityError>;
}
