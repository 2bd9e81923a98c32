use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

/// A serialized audio chunk ready to travel as one multipart upload.
#[derive(Debug, Clone)]
pub struct EncodedAudio {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    /// Virtual filename whose extension carries the format hint.
    pub file_name: &'static str,
}

/// Converts one float sample to 16-bit PCM. Positive samples scale by
/// 32767 and negative by 32768, matching the asymmetric signed range.
pub fn pcm16_from_f32(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped >= 0.0 {
        (clamped * 32767.0) as i16
    } else {
        (clamped * 32768.0) as i16
    }
}

/// Serializes mono samples into an in-memory WAV container: 1 channel,
/// 16-bit signed little-endian, header lengths matching the payload
/// exactly. Deterministic for identical input.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<EncodedAudio> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut cursor, spec).context("failed to create WAV writer")?;

        for &sample in samples {
            writer
                .write_sample(pcm16_from_f32(sample))
                .context("failed to write WAV sample")?;
        }

        writer.finalize().context("failed to finalize WAV data")?;
    }

    Ok(EncodedAudio {
        bytes: cursor.into_inner(),
        mime_type: "audio/wav",
        file_name: "chunk.wav",
    })
}
