//! Provider registry and the ASR provider capability
//!
//! The mapping "provider name -> implementation" is built once at process
//! startup and handed to the scheduler/worker as an explicit dependency,
//! never as an ambient singleton.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One recognised span of speech within a transcription result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker_id: Option<String>,
    pub start_time: f64,
    pub end_time: f64,
    pub content: String,
    pub confidence: Option<f64>,
}

/// An opaque reference to the audio a provider should transcribe (a storage
/// key, a signed URL, ...). The core never interprets this value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioReference(pub String);

/// The capability every ASR provider exposes: transcribe an audio reference
/// into a finite, materialised sequence of segments. Providers report the
/// measured duration either directly or via the sum of segment ranges;
/// settlement takes whichever value `transcribe` returns verbatim.
#[async_trait]
pub trait AsrProvider: Send + Sync {
    /// Stable provider name, matching the `provider` column.
    fn name(&self) -> &str;

    async fn transcribe(
        &self,
        audio: &AudioReference,
    ) -> Result<(Vec<TranscriptSegment>, f64), crate::error::AsrError>;
}

/// Registered (provider -> implementation) mapping, read-only after
/// construction. Registration order is preserved since the scheduler's
/// stable tie-break depends on candidate list order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AsrProvider>>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn AsrProvider>) {
        let name = provider.name().to_string();
        if !self.providers.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AsrProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// All registered provider names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProvider(String);

    #[async_trait]
    impl AsrProvider for EchoProvider {
        fn name(&self) -> &str {
            &self.0
        }

        async fn transcribe(
            &self,
            _audio: &AudioReference,
        ) -> Result<(Vec<TranscriptSegment>, f64), crate::error::AsrError> {
            Ok((vec![], 0.0))
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider("tencent".to_string())));
        assert!(registry.is_registered("tencent"));
        assert!(!registry.is_registered("aliyun"));
        assert!(registry.get("tencent").is_some());
    }
}
