use super::resampler::FrameResampler;
use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Rate every downstream consumer sees, regardless of the device rate.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;
/// Duration of one emitted frame.
pub const FRAME_DURATION_MS: u32 = 30;

type FrameCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Exclusive handle on one audio input device.
///
/// The cpal stream lives on a dedicated thread because streams are not
/// `Send`. Frames are pushed to the supplied callback as fixed 30 ms mono
/// frames at 16 kHz while the recorder is started; echo cancellation and
/// noise suppression are left to whatever the platform applies by default,
/// as cpal exposes no control over them.
pub struct AudioRecorder {
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AudioRecorder {
    /// Opens the device (default input when `device` is `None`) and spins
    /// up the stream thread. Fails as a whole when the device cannot be
    /// acquired; there is no partially-started state.
    pub fn open<F>(device: Option<cpal::Device>, on_frame: F) -> Result<Self>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread_shutdown = shutdown.clone();
        let thread_active = active.clone();
        let on_frame: FrameCallback = Box::new(on_frame);

        let thread = thread::spawn(move || {
            let stream = match build_capture_stream(device, thread_active, on_frame) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(anyhow!("failed to start input stream: {}", e)));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while !thread_shutdown.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
            debug!("Capture stream released");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shutdown,
                active,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(anyhow!("capture thread exited before reporting readiness"))
            }
        }
    }

    /// Begins delivering frames to the callback.
    pub fn start(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Stops frame delivery. Frames arriving while stopped are dropped in
    /// the audio callback, never buffered.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Releases the stream and the device. Safe to call repeatedly;
    /// dropping the recorder performs the same release.
    pub fn close(&mut self) {
        self.active.store(false, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

/// State shared by every typed stream callback: sample conversion, channel
/// downmix, and frame regrouping. Runs on the audio scheduler thread, so
/// each call does a bounded amount of copying and nothing else.
struct CapturePipeline {
    active: Arc<AtomicBool>,
    channels: usize,
    resampler: FrameResampler,
    conv: Vec<f32>,
    mono: Vec<f32>,
    on_frame: FrameCallback,
}

impl CapturePipeline {
    fn feed<T>(&mut self, data: &[T])
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        if !self.active.load(Ordering::Acquire) {
            return;
        }

        let CapturePipeline {
            channels,
            resampler,
            conv,
            mono,
            on_frame,
            ..
        } = self;

        conv.clear();
        conv.extend(data.iter().map(|s| f32::from_sample(*s)));

        let input: &[f32] = if *channels <= 1 {
            conv
        } else {
            mono.clear();
            for frame in conv.chunks_exact(*channels) {
                mono.push(frame.iter().sum::<f32>() / *channels as f32);
            }
            mono
        };

        resampler.push(input, &mut |frame| (on_frame)(frame));
    }
}

fn build_capture_stream(
    device: Option<cpal::Device>,
    active: Arc<AtomicBool>,
    on_frame: FrameCallback,
) -> Result<cpal::Stream> {
    let device = match device {
        Some(device) => device,
        None => cpal::default_host()
            .default_input_device()
            .ok_or_else(|| anyhow!("no audio input device available"))?,
    };
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = preferred_input_config(&device)?;
    let sample_format = supported.sample_format();
    let config = supported.config();
    let channels = config.channels as usize;
    let in_hz = config.sample_rate.0 as usize;
    let frame_samples = (TARGET_SAMPLE_RATE * FRAME_DURATION_MS / 1000) as usize;

    info!(
        "Opening capture stream on '{}' ({} Hz, {} channel(s), {:?})",
        name, in_hz, channels, sample_format
    );

    let pipeline = CapturePipeline {
        active,
        channels,
        resampler: FrameResampler::new(in_hz, TARGET_SAMPLE_RATE as usize, frame_samples)?,
        conv: Vec::new(),
        mono: Vec::new(),
        on_frame,
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream_for::<f32>(&device, &config, pipeline)?,
        cpal::SampleFormat::I16 => build_stream_for::<i16>(&device, &config, pipeline)?,
        cpal::SampleFormat::U16 => build_stream_for::<u16>(&device, &config, pipeline)?,
        other => return Err(anyhow!("unsupported input sample format: {:?}", other)),
    };

    Ok(stream)
}

fn build_stream_for<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut pipeline: CapturePipeline,
) -> Result<cpal::Stream>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| pipeline.feed(data),
        move |err| error!("Audio input stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

/// Picks the input configuration with the fewest channels, preferring one
/// that supports 16 kHz natively so the resampler can pass through.
fn preferred_input_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig> {
    let target = cpal::SampleRate(TARGET_SAMPLE_RATE);
    let mut ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| anyhow!("failed to query input configurations: {}", e))?
        .collect();

    ranges.sort_by_key(|r| {
        let native = r.min_sample_rate() <= target && target <= r.max_sample_rate();
        (r.channels(), if native { 0u8 } else { 1u8 })
    });

    match ranges.into_iter().next() {
        Some(range) => {
            let config = if range.min_sample_rate() <= target && target <= range.max_sample_rate()
            {
                range.with_sample_rate(target)
            } else {
                range.with_max_sample_rate()
            };
            Ok(config)
        }
        None => device
            .default_input_config()
            .map_err(|e| anyhow!("no usable input configuration: {}", e)),
    }
}
