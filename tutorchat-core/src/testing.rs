// ABOUTME: In-process fakes for the engine's capabilities, used by unit and integration tests.
// ABOUTME: Each fake records what it was asked to do so tests can assert on it.

use crate::capabilities::{
    AudioCapturer, AudioClip, AudioStream, FileUploadObserver, LocalFile, PreviewResolver,
    SpeechSynthesizer, SpeechToText,
};
use crate::export::{ArtifactSink, ExportDocument};
use crate::message::Attachment;
use crate::rewards::{RewardEvent, RewardSink};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tutorchat_transport::SessionContext;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Audio
// =============================================================================

struct MicrophoneState {
    chunks: Vec<Vec<u8>>,
    deny: bool,
    active: AtomicBool,
    starts: AtomicUsize,
}

/// Microphone that yields canned chunks, or refuses permission
#[derive(Clone)]
pub struct FakeMicrophone {
    state: Arc<MicrophoneState>,
}

impl FakeMicrophone {
    pub fn with_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            state: Arc::new(MicrophoneState {
                chunks,
                deny: false,
                active: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
            }),
        }
    }

    pub fn denied() -> Self {
        Self {
            state: Arc::new(MicrophoneState {
                chunks: Vec::new(),
                deny: true,
                active: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
            }),
        }
    }

    /// True while a stream holds the device
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioCapturer for FakeMicrophone {
    async fn start(&self) -> Result<AudioStream> {
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        if self.state.deny {
            anyhow::bail!("Permission denied by user");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for chunk in &self.state.chunks {
            let _ = tx.send(chunk.clone());
        }
        self.state.active.store(true, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        Ok(AudioStream::new(rx, "audio/webm", move || {
            state.active.store(false, Ordering::SeqCst);
        }))
    }
}

/// Speech-to-text with a fixed answer and optional latency
#[derive(Debug, Clone)]
pub struct FakeSpeechToText {
    result: Result<String, String>,
    delay: Option<Duration>,
}

impl FakeSpeechToText {
    pub fn returning(text: &str) -> Self {
        Self {
            result: Ok(text.to_string()),
            delay: None,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl SpeechToText for FakeSpeechToText {
    async fn transcribe(&self, _clip: &AudioClip) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone().map_err(|reason| anyhow::anyhow!(reason))
    }
}

/// Synthesizer that records what it was asked to say
#[derive(Clone, Default)]
pub struct RecordingSynthesizer {
    spoken: Arc<Mutex<Vec<(String, Option<String>)>>>,
    notify: Arc<Notify>,
}

impl RecordingSynthesizer {
    pub fn spoken(&self) -> Vec<(String, Option<String>)> {
        lock(&self.spoken).clone()
    }

    /// Wait until at least `count` utterances were recorded
    pub async fn wait_for(&self, count: usize) -> Vec<(String, Option<String>)> {
        loop {
            let notified = self.notify.notified();
            let spoken = self.spoken();
            if spoken.len() >= count {
                return spoken;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn speak(&self, text: &str, voice: Option<&str>) -> Result<()> {
        lock(&self.spoken).push((text.to_string(), voice.map(str::to_string)));
        self.notify.notify_waiters();
        Ok(())
    }
}

// =============================================================================
// Files
// =============================================================================

/// Resolves previews without touching the filesystem
#[derive(Debug, Clone, Default)]
pub struct FakePreviewResolver {
    fail: bool,
}

impl FakePreviewResolver {
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl PreviewResolver for FakePreviewResolver {
    async fn resolve(&self, file: &LocalFile) -> Result<String> {
        if self.fail {
            anyhow::bail!("Cannot read {}", file.name);
        }
        Ok(format!("blob:preview/{}", file.name))
    }
}

/// One upload notification as the observer saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub path: PathBuf,
    pub attachment_id: String,
    pub session_id: String,
}

#[derive(Clone, Default)]
pub struct RecordingUploadObserver {
    uploaded: Arc<Mutex<Vec<UploadRecord>>>,
}

impl RecordingUploadObserver {
    pub fn uploaded(&self) -> Vec<UploadRecord> {
        lock(&self.uploaded).clone()
    }
}

impl FileUploadObserver for RecordingUploadObserver {
    fn file_uploaded(&self, file: &LocalFile, attachment: &Attachment, context: &SessionContext) {
        lock(&self.uploaded).push(UploadRecord {
            path: file.path.clone(),
            attachment_id: attachment.id.clone(),
            session_id: context.session_id.clone(),
        });
    }
}

// =============================================================================
// Collaborators
// =============================================================================

/// Reward sink that records every award, optionally failing each call
#[derive(Clone, Default)]
pub struct RecordingRewardSink {
    awarded: Arc<Mutex<Vec<RewardEvent>>>,
    notify: Arc<Notify>,
    fail: bool,
}

impl RecordingRewardSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn awarded(&self) -> Vec<RewardEvent> {
        lock(&self.awarded).clone()
    }

    /// Wait until at least `count` awards were recorded
    pub async fn wait_for(&self, count: usize) -> Vec<RewardEvent> {
        loop {
            let notified = self.notify.notified();
            let awarded = self.awarded();
            if awarded.len() >= count {
                return awarded;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl RewardSink for RecordingRewardSink {
    async fn award(&self, event: RewardEvent) -> Result<()> {
        lock(&self.awarded).push(event);
        self.notify.notify_waiters();
        if self.fail {
            anyhow::bail!("Reward service unavailable");
        }
        Ok(())
    }
}

/// Artifact sink keeping exports in memory
#[derive(Clone, Default)]
pub struct MemoryArtifactSink {
    artifacts: Arc<Mutex<Vec<(String, ExportDocument)>>>,
}

impl MemoryArtifactSink {
    pub fn artifacts(&self) -> Vec<(String, ExportDocument)> {
        lock(&self.artifacts).clone()
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactSink {
    async fn deliver(&self, name: &str, document: &ExportDocument) -> Result<String> {
        lock(&self.artifacts).push((name.to_string(), document.clone()));
        Ok(format!("memory://{}", name))
    }
}
