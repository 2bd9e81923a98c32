//! Streaming transcription session.
//!
//! One actor task owns the transcript and every bit of mutable session
//! state. Capture callbacks and the flush timer only enqueue messages;
//! oracle calls run as spawned tasks that report back through the same
//! mailbox. Merges therefore apply in completion order, and the dedup
//! heuristic in the reconciler is what keeps the transcript coherent when
//! completions race.

use crate::audio_toolkit::audio::{
    find_input_device, AudioChunk, AudioRecorder, TARGET_SAMPLE_RATE,
};
use crate::audio_toolkit::vad::EnergyGate;
use crate::cloud_transcription::{
    SpeakerSegment, TranscribeOptions, TranscribeOracle, TranscriptionError,
};
use crate::llm_client::TextOracle;
use crate::settings::AppSettings;
use crate::streaming::chunker::ChunkSegmenter;
use crate::streaming::reconciler::{
    ClarifyBatch, MergeOutcome, ReconcilerConfig, TranscriptReconciler,
};
use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// How long a stopping session waits for in-flight oracle calls before
/// dropping them.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Events emitted to the session's consumer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    /// The session actor is live.
    Started,
    /// Recording began for a new cycle.
    RecordingStarted,
    /// The silence classification flipped (or was first established).
    SilenceStateChanged { is_silent: bool },
    /// The transcript changed; carries the full current text.
    TranscriptUpdated { text: String },
    /// Diarized recognition produced speaker spans for one chunk.
    SpeakerSegments { segments: Vec<SpeakerSegment> },
    /// The translated transcript changed; carries the full translated text.
    TranslationUpdated { text: String },
    /// A per-chunk failure that the pipeline swallowed.
    TransientError { message: String },
    /// Recording ended; carries the transcript as of the stop.
    RecordingStopped { final_text: String },
}

pub(crate) enum OracleReply {
    Text(String),
    Segments(Vec<SpeakerSegment>),
}

pub(crate) enum PipelineMsg {
    Frame(Vec<f32>),
    FlushTick,
    StartCycle,
    StopCycle,
    Transcribed(Result<OracleReply, TranscriptionError>),
    Clarified {
        batch: ClarifyBatch,
        result: Result<String>,
    },
    Translated(Result<String>),
    ClearTranscript,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    Idle,
    Recording,
    Draining,
}

/// A live transcription session.
///
/// The transcript persists across `start_recording` / `stop_recording`
/// cycles and is reset only by `clear_transcript`. Dropping the session or
/// calling `shutdown` ends the actor.
pub struct StreamingSession {
    settings: AppSettings,
    msg_tx: UnboundedSender<PipelineMsg>,
    actor: Option<JoinHandle<String>>,
    recording: Option<RecordingCycle>,
}

struct RecordingCycle {
    recorder: AudioRecorder,
    timer: JoinHandle<()>,
}

impl StreamingSession {
    /// Creates the session and spawns its actor. Returns the event stream
    /// alongside the session handle. Settings are normalized on the way in.
    pub fn new(
        mut settings: AppSettings,
        transcriber: Arc<dyn TranscribeOracle>,
        text_service: Arc<dyn TextOracle>,
    ) -> (Self, UnboundedReceiver<SessionEvent>) {
        settings.normalize();

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let core = SessionCore::new(
            settings.clone(),
            transcriber,
            text_service,
            event_tx,
            msg_tx.clone(),
        );
        let actor = tokio::spawn(run_session(core, msg_rx));

        (
            Self {
                settings,
                msg_tx,
                actor: Some(actor),
                recording: None,
            },
            event_rx,
        )
    }

    /// Opens the microphone and begins a recording cycle. Device
    /// unavailability or denied permission surfaces here as a single fatal
    /// error; nothing is partially started.
    pub fn start_recording(&mut self) -> Result<()> {
        if self.recording.is_some() {
            debug!("Recording already active");
            return Ok(());
        }

        let device = self
            .settings
            .selected_microphone
            .as_deref()
            .and_then(find_input_device);

        let frame_tx = self.msg_tx.clone();
        let recorder = AudioRecorder::open(device, move |frame| {
            // copy-and-enqueue only; the actor does the real work
            let _ = frame_tx.send(PipelineMsg::Frame(frame.to_vec()));
        })?;
        recorder.start();

        let tick_tx = self.msg_tx.clone();
        let period = Duration::from_millis(self.settings.chunk_duration_ms);
        let timer = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if tick_tx.send(PipelineMsg::FlushTick).is_err() {
                    break;
                }
            }
        });

        let _ = self.msg_tx.send(PipelineMsg::StartCycle);
        self.recording = Some(RecordingCycle { recorder, timer });
        info!("Recording started");
        Ok(())
    }

    /// Ends the current recording cycle. The device is released
    /// immediately; the actor performs one final flush and then drains
    /// in-flight calls before emitting `RecordingStopped`.
    pub fn stop_recording(&mut self) {
        let Some(mut cycle) = self.recording.take() else {
            return;
        };
        cycle.recorder.stop();
        cycle.recorder.close();
        cycle.timer.abort();
        let _ = self.msg_tx.send(PipelineMsg::StopCycle);
        info!("Recording stopped");
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Resets the transcript and the clarify cursor to empty.
    pub fn clear_transcript(&self) {
        let _ = self.msg_tx.send(PipelineMsg::ClearTranscript);
    }

    /// Ends the session and returns the final transcript.
    pub async fn shutdown(mut self) -> Result<String> {
        self.stop_recording();
        let _ = self.msg_tx.send(PipelineMsg::Shutdown);
        let actor = self
            .actor
            .take()
            .ok_or_else(|| anyhow!("session already shut down"))?;
        actor
            .await
            .map_err(|e| anyhow!("session actor panicked: {}", e))
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.stop_recording();
        let _ = self.msg_tx.send(PipelineMsg::Shutdown);
        if let Some(actor) = self.actor.take() {
            actor.abort();
        }
    }
}

/// All mutable session state, owned by the actor task. No mutation here
/// ever awaits, so every step is atomic relative to the mailbox.
struct SessionCore {
    settings: AppSettings,
    gate: EnergyGate,
    segmenter: ChunkSegmenter,
    reconciler: TranscriptReconciler,
    transcriber: Arc<dyn TranscribeOracle>,
    text_service: Arc<dyn TextOracle>,
    events: UnboundedSender<SessionEvent>,
    msg_tx: UnboundedSender<PipelineMsg>,
    translated: String,
    state: CycleState,
    in_flight: usize,
    clarify_in_flight: bool,
}

impl SessionCore {
    fn new(
        settings: AppSettings,
        transcriber: Arc<dyn TranscribeOracle>,
        text_service: Arc<dyn TextOracle>,
        events: UnboundedSender<SessionEvent>,
        msg_tx: UnboundedSender<PipelineMsg>,
    ) -> Self {
        let gate = EnergyGate::new(settings.silence_threshold);
        Self {
            settings,
            gate,
            segmenter: ChunkSegmenter::new(TARGET_SAMPLE_RATE),
            reconciler: TranscriptReconciler::new(ReconcilerConfig::default()),
            transcriber,
            text_service,
            events,
            msg_tx,
            translated: String::new(),
            state: CycleState::Idle,
            in_flight: 0,
            clarify_in_flight: false,
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn on_start_cycle(&mut self) {
        self.state = CycleState::Recording;
        self.segmenter.clear();
        self.gate.reset();
        self.emit(SessionEvent::RecordingStarted);
    }

    fn on_frame(&mut self, frame: Vec<f32>) {
        if self.state != CycleState::Recording {
            return;
        }
        self.segmenter.push_frame(&frame);
    }

    fn on_flush(&mut self) {
        if self.state != CycleState::Recording {
            return;
        }
        self.flush_once();
    }

    /// Cuts a chunk, gates it, and submits it when active. Shared by the
    /// periodic flush and the final flush at stop.
    fn flush_once(&mut self) {
        let Some(chunk) = self.segmenter.flush() else {
            return;
        };

        let verdict = self.gate.assess(&chunk.samples);
        if verdict.changed {
            self.emit(SessionEvent::SilenceStateChanged {
                is_silent: verdict.is_silent,
            });
        }
        if verdict.is_silent {
            debug!("Dropping silent chunk ({:.2}s)", chunk.duration_secs());
            return;
        }

        self.submit_chunk(chunk);
    }

    fn submit_chunk(&mut self, chunk: AudioChunk) {
        let context = self.reconciler.tail_chars(self.settings.context_chars);
        let opts = TranscribeOptions {
            prompt: (!context.is_empty()).then(|| context.to_string()),
            language: Some(self.settings.language.clone()),
            temperature: self.settings.temperature,
            model: self.settings.transcription_model.clone(),
            api_key_override: None,
        };

        self.in_flight += 1;
        let reply_tx = self.msg_tx.clone();

        if self.settings.diarization_enabled {
            let fut = self.transcriber.transcribe_diarized(chunk, opts);
            tokio::spawn(async move {
                let result = fut.await.map(OracleReply::Segments);
                let _ = reply_tx.send(PipelineMsg::Transcribed(result));
            });
        } else {
            let fut = self.transcriber.transcribe(chunk, opts);
            tokio::spawn(async move {
                let result = fut.await.map(OracleReply::Text);
                let _ = reply_tx.send(PipelineMsg::Transcribed(result));
            });
        }
    }

    fn on_transcribed(&mut self, result: Result<OracleReply, TranscriptionError>) {
        self.in_flight = self.in_flight.saturating_sub(1);

        if self.state == CycleState::Idle {
            debug!("Dropping transcription result that arrived after stop");
            return;
        }

        match result {
            Ok(OracleReply::Text(text)) => self.merge_fragment(&text),
            Ok(OracleReply::Segments(segments)) => {
                if !segments.is_empty() {
                    self.emit(SessionEvent::SpeakerSegments {
                        segments: segments.clone(),
                    });
                }
                let joined = segments
                    .iter()
                    .map(|s| s.text.trim())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.merge_fragment(&joined);
            }
            Err(TranscriptionError::CapabilityUnavailable(message)) => {
                warn!("Provider capability missing: {}", message);
                self.emit(SessionEvent::TransientError {
                    message: format!(
                        "{} (consider disabling diarization or changing the model)",
                        message
                    ),
                });
            }
            Err(e) => {
                // the chunk's contribution is lost; the transcript
                // continues from the next chunk
                error!("Chunk transcription failed: {}", e);
                self.emit(SessionEvent::TransientError {
                    message: e.to_string(),
                });
            }
        }
    }

    fn merge_fragment(&mut self, fragment: &str) {
        if fragment.trim().is_empty() {
            return;
        }
        if self.reconciler.merge(fragment) == MergeOutcome::Appended {
            self.emit(SessionEvent::TranscriptUpdated {
                text: self.reconciler.text().to_string(),
            });
            self.maybe_clarify();
        }
    }

    fn maybe_clarify(&mut self) {
        if !self.settings.clarify_enabled
            || self.clarify_in_flight
            || self.state != CycleState::Recording
        {
            return;
        }
        let Some(batch) = self
            .reconciler
            .next_clarify_batch(self.settings.clarify_batch_sentences)
        else {
            return;
        };

        debug!(
            "Sending {} chars for clarification",
            batch.text.len()
        );
        self.clarify_in_flight = true;
        self.in_flight += 1;

        let fut = self
            .text_service
            .clarify(batch.text.clone(), self.settings.language.clone());
        let reply_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let result = fut.await;
            let _ = reply_tx.send(PipelineMsg::Clarified { batch, result });
        });
    }

    fn on_clarified(&mut self, batch: ClarifyBatch, result: Result<String>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.clarify_in_flight = false;

        if self.state == CycleState::Idle {
            debug!("Dropping clarify result that arrived after stop");
            return;
        }

        match result {
            Ok(corrected) => {
                if self.reconciler.apply_clarified(&batch, &corrected) {
                    self.emit(SessionEvent::TranscriptUpdated {
                        text: self.reconciler.text().to_string(),
                    });
                    self.maybe_translate(corrected);
                } else {
                    debug!("Discarding clarify result; region changed while in flight");
                }
            }
            Err(e) => {
                // original text stays in place
                warn!("Clarify failed, keeping original text: {}", e);
            }
        }

        // another batch may already be complete behind this one
        self.maybe_clarify();
    }

    fn maybe_translate(&mut self, clarified: String) {
        if !self.settings.translation_enabled || self.state != CycleState::Recording {
            return;
        }
        let Some(target) = self.settings.translation_target_language.clone() else {
            warn!("Translation enabled without a target language; skipping");
            return;
        };

        let source = (self.settings.language != "auto").then(|| self.settings.language.clone());
        self.in_flight += 1;

        let fut = self.text_service.translate(clarified, target, source);
        let reply_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let result = fut.await;
            let _ = reply_tx.send(PipelineMsg::Translated(result));
        });
    }

    fn on_translated(&mut self, result: Result<String>) {
        self.in_flight = self.in_flight.saturating_sub(1);

        match result {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return;
                }
                if !self.translated.is_empty() {
                    self.translated.push(' ');
                }
                self.translated.push_str(text);
                self.emit(SessionEvent::TranslationUpdated {
                    text: self.translated.clone(),
                });
            }
            Err(e) => warn!("Translation failed for batch: {}", e),
        }
    }

    fn on_clear(&mut self) {
        self.reconciler.clear();
        self.translated.clear();
        self.emit(SessionEvent::TranscriptUpdated {
            text: String::new(),
        });
    }

    /// Begins the stop sequence: one final flush so the last fragment of
    /// speech is not lost, then a drain phase for whatever is in flight.
    fn on_stop_cycle(&mut self) {
        if self.state != CycleState::Recording {
            return;
        }
        self.flush_once();
        if self.in_flight > 0 {
            self.state = CycleState::Draining;
        } else {
            self.finish_cycle();
        }
    }

    fn finish_cycle(&mut self) {
        self.state = CycleState::Idle;
        self.emit(SessionEvent::RecordingStopped {
            final_text: self.reconciler.text().to_string(),
        });
    }
}

async fn run_session(mut core: SessionCore, mut rx: UnboundedReceiver<PipelineMsg>) -> String {
    core.emit(SessionEvent::Started);
    let mut shutting_down = false;

    loop {
        let msg = if core.state == CycleState::Draining {
            // bounded wait for in-flight completions; late results past the
            // grace window are dropped rather than resurrecting text
            match tokio::time::timeout(DRAIN_GRACE, rx.recv()).await {
                Ok(msg) => msg,
                Err(_) => {
                    warn!(
                        "Dropping {} in-flight call(s) still pending at stop",
                        core.in_flight
                    );
                    core.in_flight = 0;
                    core.clarify_in_flight = false;
                    core.finish_cycle();
                    if shutting_down {
                        break;
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        let Some(msg) = msg else {
            break;
        };

        match msg {
            PipelineMsg::Frame(frame) => core.on_frame(frame),
            PipelineMsg::FlushTick => core.on_flush(),
            PipelineMsg::StartCycle => core.on_start_cycle(),
            PipelineMsg::StopCycle => core.on_stop_cycle(),
            PipelineMsg::Transcribed(result) => core.on_transcribed(result),
            PipelineMsg::Clarified { batch, result } => core.on_clarified(batch, result),
            PipelineMsg::Translated(result) => core.on_translated(result),
            PipelineMsg::ClearTranscript => core.on_clear(),
            PipelineMsg::Shutdown => {
                // a recording cycle still winding down finishes its final
                // flush and drain before the actor exits
                if core.state == CycleState::Recording {
                    core.on_stop_cycle();
                }
                if core.state == CycleState::Draining {
                    shutting_down = true;
                } else {
                    break;
                }
            }
        }

        if core.state == CycleState::Draining && core.in_flight == 0 {
            core.finish_cycle();
            if shutting_down {
                break;
            }
        }
    }

    core.reconciler.text().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Oracle that returns scripted fragments and counts submissions.
    struct ScriptedOracle {
        calls: AtomicUsize,
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TranscribeOracle for ScriptedOracle {
        fn transcribe(
            &self,
            _chunk: AudioChunk,
            _opts: TranscribeOptions,
        ) -> BoxFuture<'static, Result<String, TranscriptionError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().unwrap().pop().unwrap_or_default();
            Box::pin(async move { Ok(reply) })
        }

        fn transcribe_diarized(
            &self,
            _chunk: AudioChunk,
            _opts: TranscribeOptions,
        ) -> BoxFuture<'static, Result<Vec<SpeakerSegment>, TranscriptionError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(Vec::new()) })
        }
    }

    /// Text service that uppercases clarified text and counts calls.
    struct UppercasingService {
        clarify_calls: AtomicUsize,
    }

    impl UppercasingService {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                clarify_calls: AtomicUsize::new(0),
            })
        }
    }

    impl TextOracle for UppercasingService {
        fn clarify(&self, text: String, _language: String) -> BoxFuture<'static, Result<String>> {
            self.clarify_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(text.to_uppercase()) })
        }

        fn translate(
            &self,
            text: String,
            _target_language: String,
            _source_language: Option<String>,
        ) -> BoxFuture<'static, Result<String>> {
            Box::pin(async move { Ok(format!("[de] {}", text)) })
        }
    }

    fn test_core(
        settings: AppSettings,
        oracle: Arc<ScriptedOracle>,
        service: Arc<UppercasingService>,
    ) -> (
        SessionCore,
        UnboundedReceiver<PipelineMsg>,
        UnboundedReceiver<SessionEvent>,
    ) {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let core = SessionCore::new(settings, oracle, service, event_tx, msg_tx);
        (core, msg_rx, event_rx)
    }

    fn push_chunk(core: &mut SessionCore, sample: f32, seconds: usize) {
        for _ in 0..(seconds * 100) {
            core.on_frame(vec![sample; 160]);
        }
    }

    #[tokio::test]
    async fn test_silent_chunk_never_reaches_the_oracle() {
        let oracle = ScriptedOracle::new(&[]);
        let service = UppercasingService::new();
        let (mut core, _msg_rx, mut event_rx) =
            test_core(AppSettings::default(), oracle.clone(), service);

        core.on_start_cycle();
        push_chunk(&mut core, 0.0001, 1);
        core.on_flush();

        assert_eq!(oracle.call_count(), 0);
        assert_eq!(core.reconciler.text(), "");

        // the silence notification fired exactly once
        let mut silence_events = 0;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, SessionEvent::SilenceStateChanged { is_silent: true }) {
                silence_events += 1;
            }
        }
        assert_eq!(silence_events, 1);
    }

    #[tokio::test]
    async fn test_active_chunks_merge_in_completion_order() {
        let oracle = ScriptedOracle::new(&["Hello", "Hello there", "there friend"]);
        let service = UppercasingService::new();
        let (mut core, mut msg_rx, _event_rx) =
            test_core(AppSettings::default(), oracle.clone(), service);

        core.on_start_cycle();
        for _ in 0..3 {
            push_chunk(&mut core, 0.4, 1);
            core.on_flush();
            // pump the completion the spawned task reported back
            match msg_rx.recv().await {
                Some(PipelineMsg::Transcribed(result)) => core.on_transcribed(result),
                other => panic!("expected transcription result, got {}", kind_of(&other)),
            }
        }

        assert_eq!(oracle.call_count(), 3);
        assert_eq!(core.reconciler.text(), "Hello there friend");
    }

    #[tokio::test]
    async fn test_clarify_batch_flow() {
        let mut settings = AppSettings::default();
        settings.clarify_enabled = true;
        settings.clarify_batch_sentences = 1;

        let oracle = ScriptedOracle::new(&["it works."]);
        let service = UppercasingService::new();
        let (mut core, mut msg_rx, _event_rx) = test_core(settings, oracle, service.clone());

        core.on_start_cycle();
        push_chunk(&mut core, 0.4, 1);
        core.on_flush();

        match msg_rx.recv().await {
            Some(PipelineMsg::Transcribed(result)) => core.on_transcribed(result),
            other => panic!("expected transcription result, got {}", kind_of(&other)),
        }
        assert!(core.clarify_in_flight);

        match msg_rx.recv().await {
            Some(PipelineMsg::Clarified { batch, result }) => core.on_clarified(batch, result),
            other => panic!("expected clarify result, got {}", kind_of(&other)),
        }

        assert_eq!(service.clarify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(core.reconciler.text(), "IT WORKS.");
        assert!(!core.clarify_in_flight);
    }

    #[tokio::test]
    async fn test_stale_clarify_result_is_discarded() {
        let mut settings = AppSettings::default();
        settings.clarify_enabled = true;
        settings.clarify_batch_sentences = 1;

        let oracle = ScriptedOracle::new(&["first take."]);
        let service = UppercasingService::new();
        let (mut core, mut msg_rx, _event_rx) = test_core(settings, oracle, service);

        core.on_start_cycle();
        push_chunk(&mut core, 0.4, 1);
        core.on_flush();
        match msg_rx.recv().await {
            Some(PipelineMsg::Transcribed(result)) => core.on_transcribed(result),
            other => panic!("expected transcription result, got {}", kind_of(&other)),
        }

        // the region is rewritten while the clarify call is in flight
        core.on_clear();
        core.merge_fragment("something else entirely.");
        let before = core.reconciler.text().to_string();

        match msg_rx.recv().await {
            Some(PipelineMsg::Clarified { batch, result }) => core.on_clarified(batch, result),
            other => panic!("expected clarify result, got {}", kind_of(&other)),
        }

        // transcript reflects only the concurrent merge
        assert_eq!(core.reconciler.text(), before);
    }

    #[tokio::test]
    async fn test_transient_failure_is_swallowed() {
        struct FailingOracle;
        impl TranscribeOracle for FailingOracle {
            fn transcribe(
                &self,
                _chunk: AudioChunk,
                _opts: TranscribeOptions,
            ) -> BoxFuture<'static, Result<String, TranscriptionError>> {
                Box::pin(async { Err(TranscriptionError::Transient("boom".to_string())) })
            }
            fn transcribe_diarized(
                &self,
                _chunk: AudioChunk,
                _opts: TranscribeOptions,
            ) -> BoxFuture<'static, Result<Vec<SpeakerSegment>, TranscriptionError>> {
                Box::pin(async { Err(TranscriptionError::Transient("boom".to_string())) })
            }
        }

        let service = UppercasingService::new();
        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut core = SessionCore::new(
            AppSettings::default(),
            Arc::new(FailingOracle),
            service,
            event_tx,
            msg_tx,
        );

        core.on_start_cycle();
        push_chunk(&mut core, 0.4, 1);
        core.on_flush();
        match msg_rx.recv().await {
            Some(PipelineMsg::Transcribed(result)) => core.on_transcribed(result),
            other => panic!("expected transcription result, got {}", kind_of(&other)),
        }

        assert_eq!(core.reconciler.text(), "");
        let saw_error = std::iter::from_fn(|| event_rx.try_recv().ok())
            .any(|e| matches!(e, SessionEvent::TransientError { .. }));
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_stop_cycle_flushes_final_partial_chunk() {
        let oracle = ScriptedOracle::new(&["last words"]);
        let service = UppercasingService::new();
        let (mut core, mut msg_rx, _event_rx) =
            test_core(AppSettings::default(), oracle.clone(), service);

        core.on_start_cycle();
        push_chunk(&mut core, 0.4, 1);
        core.on_stop_cycle();

        assert_eq!(oracle.call_count(), 1);
        assert_eq!(core.state, CycleState::Draining);

        match msg_rx.recv().await {
            Some(PipelineMsg::Transcribed(result)) => core.on_transcribed(result),
            other => panic!("expected transcription result, got {}", kind_of(&other)),
        }
        assert_eq!(core.reconciler.text(), "last words");
        assert_eq!(core.in_flight, 0);
    }

    #[tokio::test]
    async fn test_results_after_stop_are_dropped() {
        let oracle = ScriptedOracle::new(&["ghost text"]);
        let service = UppercasingService::new();
        let (mut core, mut msg_rx, _event_rx) =
            test_core(AppSettings::default(), oracle.clone(), service);

        core.on_start_cycle();
        push_chunk(&mut core, 0.4, 1);
        core.on_flush();
        // the cycle fully ends before the completion is processed
        core.state = CycleState::Idle;

        match msg_rx.recv().await {
            Some(PipelineMsg::Transcribed(result)) => core.on_transcribed(result),
            other => panic!("expected transcription result, got {}", kind_of(&other)),
        }
        assert_eq!(core.reconciler.text(), "");
    }

    fn kind_of(msg: &Option<PipelineMsg>) -> &'static str {
        match msg {
            None => "closed channel",
            Some(PipelineMsg::Frame(_)) => "frame",
            Some(PipelineMsg::FlushTick) => "flush tick",
            Some(PipelineMsg::StartCycle) => "start cycle",
            Some(PipelineMsg::StopCycle) => "stop cycle",
            Some(PipelineMsg::Transcribed(_)) => "transcribed",
            Some(PipelineMsg::Clarified { .. }) => "clarified",
            Some(PipelineMsg::Translated(_)) => "translated",
            Some(PipelineMsg::ClearTranscript) => "clear",
            Some(PipelineMsg::Shutdown) => "shutdown",
        }
    }
}
