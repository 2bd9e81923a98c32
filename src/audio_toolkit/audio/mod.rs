// Re-export all audio components
pub mod device;
pub mod recorder;
pub mod resampler;
pub mod wav;

pub use device::{find_input_device, list_input_devices, CpalDeviceInfo};
pub use recorder::{AudioRecorder, FRAME_DURATION_MS, TARGET_SAMPLE_RATE};
pub use resampler::FrameResampler;
pub use wav::{encode_wav, EncodedAudio};

/// A contiguous block of mono PCM samples at a known sample rate, spanning
/// one segmentation interval.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
