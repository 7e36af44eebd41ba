// ABOUTME: Device and platform capabilities injected into the engine as trait objects.
// ABOUTME: Microphone, speech-to-text, speech output, clipboard, file previews and upload notices.

use crate::message::Attachment;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tutorchat_transport::SessionContext;

// =============================================================================
// Audio capture
// =============================================================================

/// Live microphone capture. Chunks queue up until drained; dropping the
/// stream releases the device.
pub struct AudioStream {
    chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    mime_type: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl AudioStream {
    pub fn new(
        chunks: mpsc::UnboundedReceiver<Vec<u8>>,
        mime_type: impl Into<String>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            chunks,
            mime_type: mime_type.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Next captured chunk, or None once the device stops producing
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.chunks.recv().await
    }

    /// Drain whatever has been buffered without waiting
    pub fn drain_ready(&mut self) -> Vec<Vec<u8>> {
        let mut ready = Vec::new();
        while let Ok(chunk) = self.chunks.try_recv() {
            ready.push(chunk);
        }
        ready
    }

    /// Stop capture and release the device
    pub fn release(mut self) {
        self.release_device();
    }

    fn release_device(&mut self) {
        self.chunks.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.release_device();
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("mime_type", &self.mime_type)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// One recording assembled from captured chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl AudioClip {
    pub fn from_chunks(mime_type: impl Into<String>, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: chunks.concat(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
pub trait AudioCapturer: Send + Sync {
    /// Ask for the microphone. An error means permission was refused or no
    /// device exists.
    async fn start(&self) -> Result<AudioStream>;
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str, voice: Option<&str>) -> Result<()>;
}

pub trait ClipboardWriter: Send + Sync {
    fn write_text(&self, text: &str) -> Result<()>;
}

// =============================================================================
// Files
// =============================================================================

/// A file chosen by the user, not yet turned into an attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// MIME type reported by the picker, if any
    pub declared_type: Option<String>,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            path,
            size,
            declared_type: None,
        }
    }

    pub fn with_type(mut self, mime_type: impl Into<String>) -> Self {
        self.declared_type = Some(mime_type.into());
        self
    }

    /// Stat a file on disk
    pub async fn from_path(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?;
        if !metadata.is_file() {
            anyhow::bail!("{} is not a file", path.display());
        }
        Ok(Self::new(path, metadata.len()))
    }
}

#[async_trait]
pub trait PreviewResolver: Send + Sync {
    /// A URL the UI can load to preview the file
    async fn resolve(&self, file: &LocalFile) -> Result<String>;
}

/// Told about each file that became a pending attachment, with the
/// session it was attached in
pub trait FileUploadObserver: Send + Sync {
    fn file_uploaded(&self, file: &LocalFile, attachment: &Attachment, context: &SessionContext);
}

// =============================================================================
// Headless implementations
// =============================================================================

/// Capturer for environments without a microphone; every request is refused
#[derive(Debug, Default)]
pub struct NoMicrophone;

#[async_trait]
impl AudioCapturer for NoMicrophone {
    async fn start(&self) -> Result<AudioStream> {
        anyhow::bail!("No audio input device available")
    }
}

#[derive(Debug, Default)]
pub struct NoSpeechToText;

#[async_trait]
impl SpeechToText for NoSpeechToText {
    async fn transcribe(&self, _clip: &AudioClip) -> Result<String> {
        anyhow::bail!("Speech-to-text is not configured")
    }
}

#[derive(Debug, Default)]
pub struct SilentSynthesizer;

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn speak(&self, text: &str, voice: Option<&str>) -> Result<()> {
        tracing::debug!(chars = text.len(), voice, "Speech output skipped, no synthesizer");
        Ok(())
    }
}

/// Clipboard kept in process memory
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ClipboardWriter for MemoryClipboard {
    fn write_text(&self, text: &str) -> Result<()> {
        *self.contents.lock().unwrap_or_else(|e| e.into_inner()) = Some(text.to_string());
        Ok(())
    }
}

/// Previews local files through `file://` URLs
#[derive(Debug, Default)]
pub struct LocalPreviewResolver;

#[async_trait]
impl PreviewResolver for LocalPreviewResolver {
    async fn resolve(&self, file: &LocalFile) -> Result<String> {
        let absolute = tokio::fs::canonicalize(&file.path)
            .await
            .with_context(|| format!("Cannot resolve {}", file.path.display()))?;
        let url = url::Url::from_file_path(&absolute)
            .map_err(|_| anyhow::anyhow!("No file URL for {}", absolute.display()))?;
        Ok(url.to_string())
    }
}

#[derive(Debug, Default)]
pub struct LoggingUploadObserver;

impl FileUploadObserver for LoggingUploadObserver {
    fn file_uploaded(&self, file: &LocalFile, attachment: &Attachment, context: &SessionContext) {
        tracing::info!(
            session_id = %context.session_id,
            path = %file.path.display(),
            id = %attachment.id,
            filename = %attachment.filename,
            mime_type = %attachment.mime_type,
            size = attachment.size,
            "File attached"
        );
    }
}

/// The full set of capabilities an engine runs with
#[derive(Clone)]
pub struct Capabilities {
    pub audio: Arc<dyn AudioCapturer>,
    pub speech_to_text: Arc<dyn SpeechToText>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub clipboard: Arc<dyn ClipboardWriter>,
    pub previews: Arc<dyn PreviewResolver>,
    pub uploads: Arc<dyn FileUploadObserver>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::headless()
    }
}

impl Capabilities {
    /// No microphone or speech services; files preview from disk
    pub fn headless() -> Self {
        Self {
            audio: Arc::new(NoMicrophone),
            speech_to_text: Arc::new(NoSpeechToText),
            synthesizer: Arc::new(SilentSynthesizer),
            clipboard: Arc::new(MemoryClipboard::new()),
            previews: Arc::new(LocalPreviewResolver),
            uploads: Arc::new(LoggingUploadObserver),
        }
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioCapturer>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_speech_to_text(mut self, stt: Arc<dyn SpeechToText>) -> Self {
        self.speech_to_text = stt;
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn ClipboardWriter>) -> Self {
        self.clipboard = clipboard;
        self
    }

    pub fn with_previews(mut self, previews: Arc<dyn PreviewResolver>) -> Self {
        self.previews = previews;
        self
    }

    pub fn with_uploads(mut self, uploads: Arc<dyn FileUploadObserver>) -> Self {
        self.uploads = uploads;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_stream_releases_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        let flag = Arc::clone(&released);
        let mut stream = AudioStream::new(rx, "audio/webm", move || {
            flag.store(true, Ordering::SeqCst)
        });

        tx.send(vec![1, 2]).unwrap();
        tx.send(vec![3]).unwrap();
        assert_eq!(stream.drain_ready(), vec![vec![1, 2], vec![3]]);
        drop(stream);
        assert!(released.load(Ordering::SeqCst));
        // Device side sees the stream closed
        assert!(tx.send(vec![4]).is_err());
    }

    #[test]
    fn test_clip_concatenates_chunks() {
        let clip = AudioClip::from_chunks("audio/webm", vec![vec![1], vec![2, 3]]);
        assert_eq!(clip.data, vec![1, 2, 3]);
        assert_eq!(clip.len(), 3);
    }

    #[tokio::test]
    async fn test_local_preview_is_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let file = LocalFile::from_path(&path).await.unwrap();
        assert_eq!(file.name, "notes.txt");
        assert_eq!(file.size, 5);
        let url = LocalPreviewResolver.resolve(&file).await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("notes.txt"));
    }

    #[tokio::test]
    async fn test_headless_refuses_microphone() {
        let caps = Capabilities::headless();
        assert!(caps.audio.start().await.is_err());
        caps.clipboard.write_text("x").unwrap();
    }
}
