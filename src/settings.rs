use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_SETTINGS_PATH: &str = "murmur.json";

/// Per-session configuration. Loaded once at session start; mutating a
/// running session requires a restart.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// Segmentation interval in milliseconds. Clamped to 1-10 seconds.
    #[serde(default = "default_chunk_duration_ms")]
    pub chunk_duration_ms: u64,
    /// ISO-639-1-like language code, or "auto" to let the provider detect.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default)]
    pub temperature: f32,
    /// RMS level below which a chunk is dropped as silence.
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
    /// How many trailing transcript characters ride along as the prompt.
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
    #[serde(default)]
    pub clarify_enabled: bool,
    /// Completed sentences accumulated before a clarify call goes out.
    #[serde(default = "default_clarify_batch_sentences")]
    pub clarify_batch_sentences: usize,
    #[serde(default)]
    pub diarization_enabled: bool,
    #[serde(default)]
    pub translation_enabled: bool,
    #[serde(default)]
    pub translation_target_language: Option<String>,
    #[serde(default)]
    pub summary_instructions: Option<String>,
    #[serde(default = "default_transcription_base_url")]
    pub transcription_base_url: String,
    #[serde(default = "default_text_service_base_url")]
    pub text_service_base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub selected_microphone: Option<String>,
}

impl AppSettings {
    /// Clamps out-of-range values and enforces cross-field invariants.
    /// Translation operates on clarified text, so enabling it forces
    /// clarify on.
    pub fn normalize(&mut self) {
        self.chunk_duration_ms = self.chunk_duration_ms.clamp(1_000, 10_000);
        self.silence_threshold = self.silence_threshold.clamp(0.001, 0.05);
        self.temperature = self.temperature.clamp(0.0, 1.0);
        self.context_chars = self.context_chars.min(500);
        self.clarify_batch_sentences = self.clarify_batch_sentences.max(1);

        if self.translation_enabled && !self.clarify_enabled {
            debug!("Translation enabled; forcing clarify on");
            self.clarify_enabled = true;
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            chunk_duration_ms: default_chunk_duration_ms(),
            language: default_language(),
            transcription_model: default_transcription_model(),
            temperature: 0.0,
            silence_threshold: default_silence_threshold(),
            context_chars: default_context_chars(),
            clarify_enabled: false,
            clarify_batch_sentences: default_clarify_batch_sentences(),
            diarization_enabled: false,
            translation_enabled: false,
            translation_target_language: None,
            summary_instructions: None,
            transcription_base_url: default_transcription_base_url(),
            text_service_base_url: default_text_service_base_url(),
            api_key: None,
            selected_microphone: None,
        }
    }
}

fn default_chunk_duration_ms() -> u64 {
    3_000
}

fn default_language() -> String {
    "auto".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_silence_threshold() -> f32 {
    0.005
}

fn default_context_chars() -> usize {
    200
}

fn default_clarify_batch_sentences() -> usize {
    3
}

fn default_transcription_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_text_service_base_url() -> String {
    "http://localhost:8787/v1".to_string()
}

/// Reads settings from `path`, creating the file with defaults when it does
/// not exist. A file that fails to parse falls back to defaults rather than
/// aborting the session.
pub fn load_or_create_settings<P: AsRef<Path>>(path: P) -> Result<AppSettings> {
    let path = path.as_ref();

    let mut settings = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        match serde_json::from_str::<AppSettings>(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    "Failed to parse settings file {}: {}. Using defaults",
                    path.display(),
                    e
                );
                AppSettings::default()
            }
        }
    } else {
        let defaults = AppSettings::default();
        write_settings(path, &defaults)?;
        defaults
    };

    settings.normalize();
    Ok(settings)
}

pub fn write_settings<P: AsRef<Path>>(path: P, settings: &AppSettings) -> Result<()> {
    let path = path.as_ref();
    let mut normalized = settings.clone();
    normalized.normalize();

    let raw = serde_json::to_string_pretty(&normalized).context("failed to serialize settings")?;
    fs::write(path, raw)
        .with_context(|| format!("failed to write settings file {}", path.display()))?;
    debug!("Wrote settings to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_clamps_ranges() {
        let mut settings = AppSettings {
            chunk_duration_ms: 50,
            silence_threshold: 0.5,
            temperature: 3.0,
            context_chars: 10_000,
            clarify_batch_sentences: 0,
            ..AppSettings::default()
        };
        settings.normalize();

        assert_eq!(settings.chunk_duration_ms, 1_000);
        assert_eq!(settings.silence_threshold, 0.05);
        assert_eq!(settings.temperature, 1.0);
        assert_eq!(settings.context_chars, 500);
        assert_eq!(settings.clarify_batch_sentences, 1);
    }

    #[test]
    fn test_translation_forces_clarify() {
        let mut settings = AppSettings {
            translation_enabled: true,
            translation_target_language: Some("de".to_string()),
            clarify_enabled: false,
            ..AppSettings::default()
        };
        settings.normalize();
        assert!(settings.clarify_enabled);
    }

    #[test]
    fn test_load_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = load_or_create_settings(&path).unwrap();
        assert!(path.exists());
        assert_eq!(settings.chunk_duration_ms, 3_000);
        assert_eq!(settings.language, "auto");
    }

    #[test]
    fn test_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = AppSettings::default();
        settings.language = "en".to_string();
        settings.clarify_enabled = true;
        settings.selected_microphone = Some("USB Microphone".to_string());
        write_settings(&path, &settings).unwrap();

        let loaded = load_or_create_settings(&path).unwrap();
        assert_eq!(loaded.language, "en");
        assert!(loaded.clarify_enabled);
        assert_eq!(
            loaded.selected_microphone.as_deref(),
            Some("USB Microphone")
        );
    }

    #[test]
    fn test_unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let settings = load_or_create_settings(&path).unwrap();
        assert_eq!(settings.transcription_model, "whisper-1");
    }
}
