//! The live transcription pipeline: time-boxed segmentation, transcript
//! reconciliation, and the session actor that wires capture to the oracles.

pub mod chunker;
pub mod controller;
pub mod reconciler;

pub use chunker::ChunkSegmenter;
pub use controller::{SessionEvent, StreamingSession};
pub use reconciler::{MergeOutcome, ReconcilerConfig, TranscriptReconciler};
