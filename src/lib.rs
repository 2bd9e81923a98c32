pub mod audio_toolkit;
pub mod cloud_transcription;
pub mod llm_client;
pub mod settings;
pub mod streaming;

pub use audio_toolkit::audio::{
    list_input_devices, AudioChunk, AudioRecorder, CpalDeviceInfo, EncodedAudio,
};
pub use cloud_transcription::{
    SpeakerSegment, TranscribeOptions, TranscribeOracle, TranscriptionClient, TranscriptionError,
};
pub use llm_client::{TextOracle, TextServiceClient};
pub use settings::{load_or_create_settings, write_settings, AppSettings};
pub use streaming::controller::{SessionEvent, StreamingSession};
pub use streaming::reconciler::{MergeOutcome, ReconcilerConfig, TranscriptReconciler};
