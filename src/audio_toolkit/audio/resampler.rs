use anyhow::{anyhow, Result};
use rubato::{FftFixedIn, Resampler};

const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Converts an incoming mono stream at an arbitrary device rate to the
/// target rate, regrouping the output into fixed-size frames.
///
/// When the input and output rates already match, samples pass straight
/// through the frame regrouping with no resampling stage.
pub struct FrameResampler {
    resampler: Option<FftFixedIn<f32>>,
    chunk_in: usize,
    in_buf: Vec<f32>,
    frame_samples: usize,
    pending: Vec<f32>,
}

impl FrameResampler {
    pub fn new(in_hz: usize, out_hz: usize, frame_samples: usize) -> Result<Self> {
        if frame_samples == 0 {
            return Err(anyhow!("frame size must be non-zero"));
        }

        let chunk_in = RESAMPLER_CHUNK_SIZE;
        let resampler = if in_hz != out_hz {
            Some(
                FftFixedIn::<f32>::new(in_hz, out_hz, chunk_in, 1, 1)
                    .map_err(|e| anyhow!("failed to create resampler: {}", e))?,
            )
        } else {
            None
        };

        Ok(Self {
            resampler,
            chunk_in,
            in_buf: Vec::with_capacity(chunk_in),
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        })
    }

    /// Feeds device samples in; `emit` is called once per completed frame.
    pub fn push(&mut self, mut src: &[f32], emit: &mut impl FnMut(&[f32])) {
        if self.resampler.is_none() {
            self.emit_frames(src, emit);
            return;
        }

        while !src.is_empty() {
            let space = self.chunk_in - self.in_buf.len();
            let take = space.min(src.len());
            self.in_buf.extend_from_slice(&src[..take]);
            src = &src[take..];

            if self.in_buf.len() == self.chunk_in {
                if let Some(resampler) = self.resampler.as_mut() {
                    if let Ok(out) = resampler.process(&[&self.in_buf[..]], None) {
                        // borrow of self ends before emit_frames needs it
                        let resampled = out.into_iter().next().unwrap_or_default();
                        self.emit_frames(&resampled, emit);
                    }
                }
                self.in_buf.clear();
            }
        }
    }

    /// Drains buffered input and emits any final partial frame unpadded, so
    /// the tail of the stream is not lost at shutdown.
    pub fn finish(&mut self, emit: &mut impl FnMut(&[f32])) {
        if let Some(resampler) = self.resampler.as_mut() {
            if !self.in_buf.is_empty() {
                self.in_buf.resize(self.chunk_in, 0.0);
                if let Ok(out) = resampler.process(&[&self.in_buf[..]], None) {
                    let resampled = out.into_iter().next().unwrap_or_default();
                    self.emit_frames(&resampled, emit);
                }
                self.in_buf.clear();
            }
        }

        if !self.pending.is_empty() {
            let last = std::mem::take(&mut self.pending);
            emit(&last);
        }
    }

    fn emit_frames(&mut self, mut data: &[f32], emit: &mut impl FnMut(&[f32])) {
        while !data.is_empty() {
            let space = self.frame_samples - self.pending.len();
            let take = space.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == self.frame_samples {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }
}
