// ABOUTME: Voice capture pipeline: microphone permission, recording, transcription and speech output.
// ABOUTME: Async steps run as spawned tasks that post generation-tagged events back to the owner.

use crate::capabilities::{AudioCapturer, AudioClip, AudioStream, SpeechSynthesizer, SpeechToText};
use crate::notice::Notice;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    RequestingPermission,
    Recording,
    Processing,
    /// Transient; the pipeline passes through it back to Idle
    Error,
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::RequestingPermission => write!(f, "requesting-permission"),
            Self::Recording => write!(f, "recording"),
            Self::Processing => write!(f, "processing"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Voice preferences, loaded from the [voice] config section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub input_enabled: bool,
    #[serde(default)]
    pub output_enabled: bool,
    /// Synthesizer voice name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default = "default_transcription_timeout_secs")]
    pub transcription_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_transcription_timeout_secs() -> u64 {
    30
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            input_enabled: true,
            output_enabled: false,
            voice: None,
            transcription_timeout_secs: default_transcription_timeout_secs(),
        }
    }
}

impl VoiceSettings {
    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_secs(self.transcription_timeout_secs)
    }
}

/// Result of an async voice step, delivered back to the pipeline owner
#[derive(Debug)]
pub enum VoiceEvent {
    PermissionGranted { generation: u64, stream: AudioStream },
    PermissionDenied { generation: u64, reason: String },
    Transcribed { generation: u64, result: Result<String, String> },
}

impl VoiceEvent {
    fn generation(&self) -> u64 {
        match self {
            Self::PermissionGranted { generation, .. }
            | Self::PermissionDenied { generation, .. }
            | Self::Transcribed { generation, .. } => *generation,
        }
    }
}

/// What the owner should do after a voice event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceUpdate {
    /// Place this text in the composer
    Transcript(String),
    Failed(Notice),
}

/// Callback that delivers voice events to the pipeline owner
pub type VoicePoster = Arc<dyn Fn(VoiceEvent) + Send + Sync>;

/// Receives the raw audio of every finished recording
pub type VoiceInputCallback = Arc<dyn Fn(&AudioClip) + Send + Sync>;

pub struct VoicePipeline {
    state: VoiceState,
    settings: VoiceSettings,
    audio: Arc<dyn AudioCapturer>,
    speech_to_text: Arc<dyn SpeechToText>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    post: VoicePoster,
    on_voice_input: Option<VoiceInputCallback>,
    /// Bumped per recording and on shutdown; stale events are discarded
    generation: u64,
    stream: Option<AudioStream>,
    cancel: CancellationToken,
    last_error: Option<String>,
}

impl VoicePipeline {
    pub fn new(
        settings: VoiceSettings,
        audio: Arc<dyn AudioCapturer>,
        speech_to_text: Arc<dyn SpeechToText>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        post: VoicePoster,
    ) -> Self {
        Self {
            state: VoiceState::Idle,
            settings,
            audio,
            speech_to_text,
            synthesizer,
            post,
            on_voice_input: None,
            generation: 0,
            stream: None,
            cancel: CancellationToken::new(),
            last_error: None,
        }
    }

    pub fn set_on_voice_input(&mut self, callback: Option<VoiceInputCallback>) {
        self.on_voice_input = callback;
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    pub fn toggle_voice_input(&mut self) -> bool {
        self.settings.input_enabled = !self.settings.input_enabled;
        self.settings.input_enabled
    }

    pub fn toggle_voice_output(&mut self) -> bool {
        self.settings.output_enabled = !self.settings.output_enabled;
        self.settings.output_enabled
    }

    pub fn set_voice(&mut self, voice: Option<String>) {
        self.settings.voice = voice;
    }

    /// Start or stop a recording depending on the current state
    pub fn toggle(&mut self) -> VoiceState {
        match self.state {
            VoiceState::Idle | VoiceState::Error => self.start_recording(),
            VoiceState::Recording => self.stop_recording(),
            VoiceState::RequestingPermission | VoiceState::Processing => {
                tracing::debug!(state = %self.state, "Voice toggle ignored while busy");
            }
        }
        self.state
    }

    /// Apply the result of an async step
    pub fn handle(&mut self, event: VoiceEvent) -> Option<VoiceUpdate> {
        if event.generation() != self.generation || self.cancel.is_cancelled() {
            tracing::debug!("Discarding stale voice event");
            return None;
        }

        match event {
            VoiceEvent::PermissionGranted { stream, .. } => {
                if self.state != VoiceState::RequestingPermission {
                    return None;
                }
                self.stream = Some(stream);
                self.set_state(VoiceState::Recording);
                None
            }
            VoiceEvent::PermissionDenied { reason, .. } => {
                Some(self.fail(Notice::PermissionDenied { reason }))
            }
            VoiceEvent::Transcribed { result, .. } => {
                if self.state != VoiceState::Processing {
                    return None;
                }
                match result {
                    Ok(text) => {
                        self.set_state(VoiceState::Idle);
                        metrics::counter!("tutorchat_transcriptions_total").increment(1);
                        Some(VoiceUpdate::Transcript(text.trim().to_string()))
                    }
                    Err(reason) => Some(self.fail(Notice::TranscriptionFailed { reason })),
                }
            }
        }
    }

    /// Hand a reply to the synthesizer when speech output is on
    pub fn speak(&self, text: &str) {
        if !self.settings.enabled || !self.settings.output_enabled || text.trim().is_empty() {
            return;
        }
        let synthesizer = Arc::clone(&self.synthesizer);
        let voice = self.settings.voice.clone();
        let text = text.to_string();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = synthesizer.speak(&text, voice.as_deref()) => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Speech output failed");
                    }
                }
            }
        });
    }

    /// Stop any recording, release the microphone and abandon in-flight work
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        self.generation += 1;
        if let Some(stream) = self.stream.take() {
            stream.release();
            tracing::info!("Microphone released on teardown");
        }
        self.state = VoiceState::Idle;
    }

    /// Re-arm after a shutdown so the pipeline can serve a new session
    pub fn activate(&mut self) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
    }

    fn start_recording(&mut self) {
        if !self.settings.enabled || !self.settings.input_enabled {
            tracing::debug!("Voice input disabled");
            return;
        }
        self.generation += 1;
        self.last_error = None;
        self.set_state(VoiceState::RequestingPermission);

        let generation = self.generation;
        let audio = Arc::clone(&self.audio);
        let post = Arc::clone(&self.post);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = audio.start() => outcome,
            };
            let event = match outcome {
                Ok(stream) => VoiceEvent::PermissionGranted { generation, stream },
                Err(e) => VoiceEvent::PermissionDenied {
                    generation,
                    reason: format!("{:#}", e),
                },
            };
            post(event);
        });
    }

    fn stop_recording(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            self.set_state(VoiceState::Idle);
            return;
        };
        let chunks = stream.drain_ready();
        let clip = AudioClip::from_chunks(stream.mime_type(), chunks);
        stream.release();
        self.set_state(VoiceState::Processing);
        tracing::debug!(bytes = clip.len(), "Recording stopped");

        if let Some(callback) = &self.on_voice_input {
            callback(&clip);
        }

        let generation = self.generation;
        if clip.is_empty() {
            (self.post)(VoiceEvent::Transcribed {
                generation,
                result: Err("No audio was captured".to_string()),
            });
            return;
        }

        let speech_to_text = Arc::clone(&self.speech_to_text);
        let post = Arc::clone(&self.post);
        let cancel = self.cancel.clone();
        let timeout = self.settings.transcription_timeout();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = tokio::time::timeout(timeout, speech_to_text.transcribe(&clip)) => {
                    match outcome {
                        Ok(Ok(text)) => Ok(text),
                        Ok(Err(e)) => Err(format!("{:#}", e)),
                        Err(_) => Err(format!("Transcription timed out after {:?}", timeout)),
                    }
                }
            };
            post(VoiceEvent::Transcribed { generation, result });
        });
    }

    fn fail(&mut self, notice: Notice) -> VoiceUpdate {
        self.stream = None;
        self.set_state(VoiceState::Error);
        tracing::warn!(%notice, "Voice pipeline error");
        self.last_error = Some(notice.reason().to_string());
        self.set_state(VoiceState::Idle);
        VoiceUpdate::Failed(notice)
    }

    fn set_state(&mut self, next: VoiceState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "Voice state changed");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMicrophone, FakeSpeechToText, RecordingSynthesizer};
    use tokio::sync::mpsc;

    fn pipeline(
        mic: &FakeMicrophone,
        stt: FakeSpeechToText,
    ) -> (VoicePipeline, mpsc::UnboundedReceiver<VoiceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = VoicePipeline::new(
            VoiceSettings::default(),
            Arc::new(mic.clone()),
            Arc::new(stt),
            Arc::new(RecordingSynthesizer::default()),
            Arc::new(move |event| {
                let _ = tx.send(event);
            }),
        );
        (pipeline, rx)
    }

    #[tokio::test]
    async fn test_record_and_transcribe() {
        let mic = FakeMicrophone::with_chunks(vec![vec![1, 2], vec![3]]);
        let (mut voice, mut events) = pipeline(&mic, FakeSpeechToText::returning(" hello world "));

        assert_eq!(voice.toggle(), VoiceState::RequestingPermission);
        let granted = events.recv().await.unwrap();
        assert!(voice.handle(granted).is_none());
        assert_eq!(voice.state(), VoiceState::Recording);
        assert!(mic.is_active());

        assert_eq!(voice.toggle(), VoiceState::Processing);
        assert!(!mic.is_active());
        let update = voice.handle(events.recv().await.unwrap());
        assert_eq!(update, Some(VoiceUpdate::Transcript("hello world".to_string())));
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn test_permission_denied_returns_to_idle() {
        let mic = FakeMicrophone::denied();
        let (mut voice, mut events) = pipeline(&mic, FakeSpeechToText::returning("x"));

        voice.toggle();
        let update = voice.handle(events.recv().await.unwrap());
        assert!(matches!(
            update,
            Some(VoiceUpdate::Failed(Notice::PermissionDenied { .. }))
        ));
        assert_eq!(voice.state(), VoiceState::Idle);
        assert!(voice.last_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcription_timeout() {
        let mic = FakeMicrophone::with_chunks(vec![vec![1]]);
        let stt = FakeSpeechToText::returning("late").with_delay(Duration::from_secs(120));
        let (mut voice, mut events) = pipeline(&mic, stt);

        voice.toggle();
        voice.handle(events.recv().await.unwrap());
        voice.toggle();
        let update = voice.handle(events.recv().await.unwrap());
        match update {
            Some(VoiceUpdate::Failed(Notice::TranscriptionFailed { reason })) => {
                assert!(reason.contains("timed out"))
            }
            other => panic!("unexpected update {:?}", other),
        }
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_while_recording_releases_microphone() {
        let mic = FakeMicrophone::with_chunks(vec![vec![1]]);
        let (mut voice, mut events) = pipeline(&mic, FakeSpeechToText::returning("x"));

        voice.toggle();
        voice.handle(events.recv().await.unwrap());
        assert!(mic.is_active());

        voice.shutdown();
        assert!(!mic.is_active());
        assert_eq!(voice.state(), VoiceState::Idle);
        assert!(!voice.is_capturing());
    }

    #[tokio::test]
    async fn test_grant_after_shutdown_is_discarded() {
        let mic = FakeMicrophone::with_chunks(vec![vec![1]]);
        let (mut voice, mut events) = pipeline(&mic, FakeSpeechToText::returning("x"));

        voice.toggle();
        let granted = events.recv().await.unwrap();
        voice.shutdown();
        assert!(voice.handle(granted).is_none());
        // The discarded stream was dropped, releasing the device
        assert!(!mic.is_active());
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn test_disabled_input_does_not_record() {
        let mic = FakeMicrophone::with_chunks(vec![vec![1]]);
        let (mut voice, _events) = pipeline(&mic, FakeSpeechToText::returning("x"));
        assert!(!voice.toggle_voice_input());
        assert_eq!(voice.toggle(), VoiceState::Idle);
        assert_eq!(mic.start_count(), 0);
    }

    #[tokio::test]
    async fn test_raw_audio_handed_to_callback() {
        let mic = FakeMicrophone::with_chunks(vec![vec![7, 8]]);
        let (mut voice, mut events) = pipeline(&mic, FakeSpeechToText::returning("x"));
        let (clip_tx, mut clip_rx) = mpsc::unbounded_channel();
        voice.set_on_voice_input(Some(Arc::new(move |clip: &AudioClip| {
            let _ = clip_tx.send(clip.clone());
        })));

        voice.toggle();
        voice.handle(events.recv().await.unwrap());
        voice.toggle();
        assert_eq!(clip_rx.recv().await.unwrap().data, vec![7, 8]);
    }
}
