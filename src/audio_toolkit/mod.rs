// Re-export all capture-side components
pub mod audio;
pub mod vad;

pub use audio::{list_input_devices, AudioChunk, AudioRecorder, CpalDeviceInfo, EncodedAudio};
pub use vad::{rms, EnergyGate, GateVerdict};
