use crate::audio_toolkit::audio::AudioChunk;
use log::debug;

/// Accumulates capture frames and cuts them into chunks on demand.
///
/// The flush cadence is owned by the caller (a wall-clock timer); this type
/// only guarantees that every sample lands in exactly one chunk and that
/// chunks preserve arrival order.
pub struct ChunkSegmenter {
    buffer: Vec<f32>,
    sample_rate: u32,
}

impl ChunkSegmenter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            buffer: Vec::new(),
            sample_rate,
        }
    }

    pub fn push_frame(&mut self, frame: &[f32]) {
        self.buffer.extend_from_slice(frame);
    }

    /// Atomically swaps the accumulated buffer for an empty one. Returns
    /// `None` when nothing has accumulated, so no empty chunks travel
    /// downstream.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.buffer.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.buffer);
        let chunk = AudioChunk::new(samples, self.sample_rate);
        debug!("Cut chunk of {:.2}s", chunk.duration_secs());
        Some(chunk)
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_flush_emits_nothing() {
        let mut segmenter = ChunkSegmenter::new(16_000);
        assert!(segmenter.flush().is_none());
    }

    #[test]
    fn test_flush_drains_and_resets() {
        let mut segmenter = ChunkSegmenter::new(16_000);
        segmenter.push_frame(&[0.1; 480]);
        segmenter.push_frame(&[0.2; 480]);
        assert_eq!(segmenter.buffered_samples(), 960);

        let chunk = segmenter.flush().unwrap();
        assert_eq!(chunk.samples.len(), 960);
        assert_eq!(chunk.sample_rate, 16_000);
        assert_eq!(chunk.samples[0], 0.1);
        assert_eq!(chunk.samples[480], 0.2);

        // the same samples are never emitted twice
        assert_eq!(segmenter.buffered_samples(), 0);
        assert!(segmenter.flush().is_none());
    }

    #[test]
    fn test_final_partial_flush() {
        let mut segmenter = ChunkSegmenter::new(16_000);
        segmenter.push_frame(&[0.3; 100]);

        let chunk = segmenter.flush().unwrap();
        assert_eq!(chunk.samples.len(), 100);
    }
}
