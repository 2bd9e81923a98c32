use anyhow::{anyhow, Result};
use futures_util::future::BoxFuture;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Markdown sections every summary response carries.
pub const SUMMARY_SECTIONS: [&str; 4] = ["Summary", "Key Points", "Goals", "Action Items"];

const EMPTY_SECTION_PLACEHOLDER: &str = "None identified.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClarifyRequest<'a> {
    text: &'a str,
    language: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateRequest<'a> {
    text: &'a str,
    target_language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_language: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SummarizeRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_prompt: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
}

/// Seam between the pipeline and the text-correction collaborators, so
/// tests can stand in a scripted service.
pub trait TextOracle: Send + Sync {
    fn clarify(&self, text: String, language: String) -> BoxFuture<'static, Result<String>>;

    fn translate(
        &self,
        text: String,
        target_language: String,
        source_language: Option<String>,
    ) -> BoxFuture<'static, Result<String>>;
}

/// HTTP client for the clarify / translate / summarize text services.
#[derive(Clone)]
pub struct TextServiceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TextServiceClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.unwrap_or_default(),
        })
    }

    /// Grammar/logic correction over a batch of completed sentences.
    pub async fn clarify(&self, text: &str, language: &str) -> Result<String> {
        let response: TextResponse = self
            .post_json("/clarify", &ClarifyRequest { text, language })
            .await?;
        Ok(response.text)
    }

    pub async fn translate(
        &self,
        text: &str,
        target_language: &str,
        source_language: Option<&str>,
    ) -> Result<String> {
        let response: TextResponse = self
            .post_json(
                "/translate",
                &TranslateRequest {
                    text,
                    target_language,
                    source_language,
                },
            )
            .await?;
        Ok(response.text)
    }

    /// One-shot summary of a transcript. The returned markdown always
    /// carries the full section set; sections the service left out are
    /// filled with the empty placeholder.
    pub async fn summarize(
        &self,
        text: &str,
        language: Option<&str>,
        custom_prompt: Option<&str>,
    ) -> Result<String> {
        let response: SummaryResponse = self
            .post_json(
                "/summarize",
                &SummarizeRequest {
                    text,
                    language,
                    custom_prompt,
                },
            )
            .await?;
        Ok(ensure_summary_sections(&response.summary))
    }

    /// Fetches the model identifiers offered by the provider. Accepts the
    /// OpenAI `{ data: [{ id }] }` shape as well as a plain string array.
    pub async fn fetch_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        debug!("Fetching models from: {}", url);

        let mut request = self.http.get(&url);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("failed to fetch models: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(anyhow!(
                "model list request failed ({}): {}",
                status,
                error_text
            ));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse model list: {}", e))?;

        let mut models = Vec::new();
        if let Some(data) = parsed.get("data").and_then(|d| d.as_array()) {
            for entry in data {
                if let Some(id) = entry.get("id").and_then(|i| i.as_str()) {
                    models.push(id.to_string());
                }
            }
        } else if let Some(array) = parsed.as_array() {
            for entry in array {
                if let Some(model) = entry.as_str() {
                    models.push(model.to_string());
                }
            }
        }

        Ok(models)
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Sending text service request to: {}", url);

        let mut request = self.http.post(&url).json(body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error response".to_string());
            return Err(anyhow!(
                "text service request failed with status {}: {}",
                status,
                error_text
            ));
        }

        response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse text service response: {}", e))
    }
}

impl TextOracle for TextServiceClient {
    fn clarify(&self, text: String, language: String) -> BoxFuture<'static, Result<String>> {
        let client = self.clone();
        Box::pin(async move { TextServiceClient::clarify(&client, &text, &language).await })
    }

    fn translate(
        &self,
        text: String,
        target_language: String,
        source_language: Option<String>,
    ) -> BoxFuture<'static, Result<String>> {
        let client = self.clone();
        Box::pin(async move {
            TextServiceClient::translate(
                &client,
                &text,
                &target_language,
                source_language.as_deref(),
            )
            .await
        })
    }
}

/// Appends any required markdown section the service left out, rendered
/// with the literal empty placeholder.
pub fn ensure_summary_sections(summary: &str) -> String {
    let mut out = summary.trim_end().to_string();
    for section in SUMMARY_SECTIONS {
        let header = format!("## {}", section);
        if !out.contains(&header) {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&header);
            out.push_str("\n\n");
            out.push_str(EMPTY_SECTION_PLACEHOLDER);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sections_are_filled_in() {
        let summary = "## Summary\n\nWe discussed the roadmap.";
        let normalized = ensure_summary_sections(summary);

        for section in SUMMARY_SECTIONS {
            assert!(
                normalized.contains(&format!("## {}", section)),
                "missing section {}",
                section
            );
        }
        assert!(normalized.contains("We discussed the roadmap."));
        assert!(normalized.contains(EMPTY_SECTION_PLACEHOLDER));
    }

    #[test]
    fn test_complete_summary_is_untouched() {
        let summary = "## Summary\n\nA\n\n## Key Points\n\nB\n\n## Goals\n\nC\n\n## Action Items\n\nD";
        assert_eq!(ensure_summary_sections(summary), summary);
    }

    #[test]
    fn test_translate_request_omits_missing_source() {
        let with_source = serde_json::to_value(TranslateRequest {
            text: "hallo",
            target_language: "en",
            source_language: Some("de"),
        })
        .unwrap();
        assert_eq!(with_source["sourceLanguage"], "de");
        assert_eq!(with_source["targetLanguage"], "en");

        let without_source = serde_json::to_value(TranslateRequest {
            text: "hallo",
            target_language: "en",
            source_language: None,
        })
        .unwrap();
        assert!(without_source.get("sourceLanguage").is_none());
    }
}
