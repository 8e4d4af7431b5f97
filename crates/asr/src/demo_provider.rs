//! Demo ASR provider implementation shared by the API and worker binaries
//! so both processes see the same registered providers. Concrete vendor
//! SDKs are out of scope for this repo; this stand-in produces a single
//! synthetic segment spanning the whole audio reference so the settlement
//! path has a measured duration to charge against.

use async_trait::async_trait;

use crate::error::AsrError;
use crate::registry::{AsrProvider, AudioReference, TranscriptSegment};

pub struct FixedDurationProvider {
    name: String,
    duration_seconds: f64,
}

impl FixedDurationProvider {
    pub fn new(name: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            name: name.into(),
            duration_seconds,
        }
    }
}

#[async_trait]
impl AsrProvider for FixedDurationProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transcribe(
        &self,
        audio: &AudioReference,
    ) -> Result<(Vec<TranscriptSegment>, f64), AsrError> {
        let segment = TranscriptSegment {
            speaker_id: None,
            start_time: 0.0,
            end_time: self.duration_seconds,
            content: format!("transcribed: {}", audio.0),
            confidence: Some(0.95),
        };
        Ok((vec![segment], self.duration_seconds))
    }
}
