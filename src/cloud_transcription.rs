use crate::audio_toolkit::audio::{encode_wav, AudioChunk, EncodedAudio};
use futures_util::future::BoxFuture;
use log::debug;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Service error code signalling that the current provider does not offer
/// the requested capability (e.g. diarization, an unknown model).
const CAPABILITY_ERROR_CODE: &str = "model_not_available";

#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Network or service failure. The chunk's contribution is simply
    /// lost; the transcript continues from the next chunk.
    #[error("transcription request failed: {0}")]
    Transient(String),
    /// The provider reported it does not offer this model/capability.
    #[error("capability not offered by the current provider: {0}")]
    CapabilityUnavailable(String),
    /// A locally malformed request, e.g. a chunk with no audio data.
    #[error("invalid transcription request: {0}")]
    Validation(String),
}

/// Per-call parameters. Optional fields are omitted from the request
/// entirely when they carry no information.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// Recent transcript tail sent as the recognition prompt. Omitted when
    /// `None` or empty.
    pub prompt: Option<String>,
    /// Language code; omitted when `None`, empty or `"auto"`.
    pub language: Option<String>,
    pub temperature: f32,
    pub model: String,
    /// Replaces the client's bearer credential for this call only. Carried
    /// in the Authorization header, never in the request body.
    pub api_key_override: Option<String>,
}

/// One diarized span of recognized speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerSegment {
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    pub start: f32,
    #[serde(default)]
    pub end: f32,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct DiarizedResponse {
    #[serde(default)]
    segments: Vec<SpeakerSegment>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Seam between the pipeline and the speech-recognition service, so tests
/// can stand in a scripted oracle.
pub trait TranscribeOracle: Send + Sync {
    fn transcribe(
        &self,
        chunk: AudioChunk,
        opts: TranscribeOptions,
    ) -> BoxFuture<'static, Result<String, TranscriptionError>>;

    fn transcribe_diarized(
        &self,
        chunk: AudioChunk,
        opts: TranscribeOptions,
    ) -> BoxFuture<'static, Result<Vec<SpeakerSegment>, TranscriptionError>>;
}

/// HTTP client for an OpenAI-compatible transcription endpoint.
#[derive(Clone)]
pub struct TranscriptionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TranscriptionClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.unwrap_or_default(),
        })
    }

    /// Submits one chunk and returns the recognized text, which may be
    /// empty. Calls for successive chunks may be in flight concurrently.
    pub async fn submit(
        &self,
        chunk: &AudioChunk,
        opts: &TranscribeOptions,
    ) -> Result<String, TranscriptionError> {
        let form = build_form(chunk, opts)?;
        let response = self
            .post_multipart("/audio/transcriptions", form, opts.api_key_override.as_deref())
            .await?;

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Transient(format!("failed to parse response: {}", e)))?;

        Ok(body.text.trim().to_string())
    }

    /// Diarized variant: same submission discipline, distinct endpoint and
    /// response shape.
    pub async fn submit_diarized(
        &self,
        chunk: &AudioChunk,
        opts: &TranscribeOptions,
    ) -> Result<Vec<SpeakerSegment>, TranscriptionError> {
        let form = build_form(chunk, opts)?;
        let response = self
            .post_multipart(
                "/audio/transcriptions/diarized",
                form,
                opts.api_key_override.as_deref(),
            )
            .await?;

        let body: DiarizedResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Transient(format!("failed to parse response: {}", e)))?;

        Ok(normalize_segments(body.segments, &body.text))
    }

    async fn post_multipart(
        &self,
        path: &str,
        form: Form,
        api_key_override: Option<&str>,
    ) -> Result<reqwest::Response, TranscriptionError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Sending transcription request to: {}", url);

        let mut request = self.http.post(&url).multipart(form);
        let key = api_key_override.unwrap_or(&self.api_key);
        if !key.is_empty() {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranscriptionError::Transient(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error response".to_string());
            return Err(classify_service_error(status, &body));
        }

        Ok(response)
    }
}

impl TranscribeOracle for TranscriptionClient {
    fn transcribe(
        &self,
        chunk: AudioChunk,
        opts: TranscribeOptions,
    ) -> BoxFuture<'static, Result<String, TranscriptionError>> {
        let client = self.clone();
        Box::pin(async move { client.submit(&chunk, &opts).await })
    }

    fn transcribe_diarized(
        &self,
        chunk: AudioChunk,
        opts: TranscribeOptions,
    ) -> BoxFuture<'static, Result<Vec<SpeakerSegment>, TranscriptionError>> {
        let client = self.clone();
        Box::pin(async move { client.submit_diarized(&chunk, &opts).await })
    }
}

fn build_form(chunk: &AudioChunk, opts: &TranscribeOptions) -> Result<Form, TranscriptionError> {
    if chunk.is_empty() {
        return Err(TranscriptionError::Validation(
            "no audio data in chunk".to_string(),
        ));
    }

    let encoded: EncodedAudio = encode_wav(&chunk.samples, chunk.sample_rate)
        .map_err(|e| TranscriptionError::Validation(format!("failed to encode audio: {}", e)))?;

    let audio_part = Part::bytes(encoded.bytes)
        .file_name(encoded.file_name)
        .mime_str(encoded.mime_type)
        .map_err(|e| TranscriptionError::Validation(format!("failed to create audio part: {}", e)))?;

    let mut form = Form::new()
        .part("file", audio_part)
        .text("model", opts.model.clone())
        .text("response_format", "json")
        .text("temperature", opts.temperature.to_string());

    if let Some(prompt) = effective_field(&opts.prompt) {
        form = form.text("prompt", prompt.to_string());
    }
    if let Some(language) = effective_language(&opts.language) {
        form = form.text("language", language.to_string());
    }

    Ok(form)
}

/// A field is sent only when it carries text.
fn effective_field(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// `"auto"` means provider-side detection, expressed by omitting the field.
fn effective_language(value: &Option<String>) -> Option<&str> {
    effective_field(value).filter(|v| *v != "auto")
}

fn classify_service_error(status: reqwest::StatusCode, body: &str) -> TranscriptionError {
    if let Ok(parsed) = serde_json::from_str::<ServiceError>(body) {
        if parsed.code.as_deref() == Some(CAPABILITY_ERROR_CODE) {
            return TranscriptionError::CapabilityUnavailable(parsed.message);
        }
        return TranscriptionError::Transient(format!("status {}: {}", status, parsed.message));
    }
    TranscriptionError::Transient(format!("status {}: {}", status, body))
}

/// A diarized response with no segments but non-empty flat text still
/// yields one segment, so consumers always see at least one span for
/// non-empty audio.
fn normalize_segments(segments: Vec<SpeakerSegment>, flat_text: &str) -> Vec<SpeakerSegment> {
    if segments.is_empty() && !flat_text.trim().is_empty() {
        return vec![SpeakerSegment {
            speaker: "A".to_string(),
            text: flat_text.trim().to_string(),
            start: 0.0,
            end: 0.0,
        }];
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_omitted_for_auto() {
        assert_eq!(effective_language(&None), None);
        assert_eq!(effective_language(&Some("auto".to_string())), None);
        assert_eq!(effective_language(&Some("".to_string())), None);
        assert_eq!(effective_language(&Some("en".to_string())), Some("en"));
    }

    #[test]
    fn test_prompt_omitted_when_empty() {
        assert_eq!(effective_field(&Some("   ".to_string())), None);
        assert_eq!(
            effective_field(&Some("previous words".to_string())),
            Some("previous words")
        );
    }

    #[test]
    fn test_empty_chunk_is_a_validation_error() {
        let chunk = AudioChunk::new(Vec::new(), 16_000);
        let result = build_form(&chunk, &TranscribeOptions::default());
        assert!(matches!(result, Err(TranscriptionError::Validation(_))));
    }

    #[test]
    fn test_capability_code_maps_to_typed_error() {
        let body = r#"{"message":"diarization not offered","code":"model_not_available"}"#;
        let err = classify_service_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, TranscriptionError::CapabilityUnavailable(_)));
    }

    #[test]
    fn test_other_service_errors_are_transient() {
        let body = r#"{"message":"rate limited","code":"rate_limit"}"#;
        let err = classify_service_error(reqwest::StatusCode::TOO_MANY_REQUESTS, body);
        assert!(matches!(err, TranscriptionError::Transient(_)));

        let err = classify_service_error(reqwest::StatusCode::BAD_GATEWAY, "not json at all");
        assert!(matches!(err, TranscriptionError::Transient(_)));
    }

    #[test]
    fn test_segment_synthesized_from_flat_text() {
        let segments = normalize_segments(Vec::new(), "hello there");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].speaker, "A");
        assert_eq!(segments[0].text, "hello there");
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[0].end, 0.0);
    }

    #[test]
    fn test_no_segment_synthesized_from_empty_text() {
        assert!(normalize_segments(Vec::new(), "  ").is_empty());
    }

    #[test]
    fn test_existing_segments_pass_through() {
        let input = vec![SpeakerSegment {
            speaker: "B".to_string(),
            text: "hi".to_string(),
            start: 0.5,
            end: 1.2,
        }];
        let segments = normalize_segments(input, "hi");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].speaker, "B");
    }
}
