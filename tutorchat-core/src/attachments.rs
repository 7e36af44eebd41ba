// ABOUTME: File attachment pipeline turning picked or dropped files into pending attachments.
// ABOUTME: Preview resolution runs off the owner's loop; results come back generation-tagged.

use crate::capabilities::{FileUploadObserver, LocalFile, PreviewResolver};
use crate::message::Attachment;
use crate::notice::Notice;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tutorchat_transport::SessionContext;

const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentEvent {
    Resolved {
        generation: u64,
        file: LocalFile,
        attachment: Attachment,
    },
    Failed {
        generation: u64,
        filename: String,
        reason: String,
    },
}

pub type AttachmentPoster = Arc<dyn Fn(AttachmentEvent) + Send + Sync>;

/// MIME type for a file: the declared one, else a guess from the extension
pub fn mime_for(file: &LocalFile) -> String {
    match file.declared_type.as_deref().map(str::trim) {
        Some(declared) if !declared.is_empty() => declared.to_string(),
        _ => mime_guess::from_path(&file.name)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| FALLBACK_MIME.to_string()),
    }
}

pub fn build_attachment(file: &LocalFile, preview_url: String) -> Attachment {
    let mime_type = mime_for(file);
    let thumbnail_url = mime_type
        .starts_with("image/")
        .then(|| preview_url.clone());
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    Attachment {
        id: format!("file-{}", &uuid[..12]),
        filename: file.name.clone(),
        mime_type,
        size: file.size,
        url: preview_url,
        thumbnail_url,
    }
}

pub struct AttachmentPipeline {
    pending: Vec<Attachment>,
    drag_active: bool,
    previews: Arc<dyn PreviewResolver>,
    uploads: Arc<dyn FileUploadObserver>,
    post: AttachmentPoster,
    context: Option<SessionContext>,
    generation: u64,
    in_progress: usize,
    cancel: CancellationToken,
}

impl AttachmentPipeline {
    pub fn new(
        previews: Arc<dyn PreviewResolver>,
        uploads: Arc<dyn FileUploadObserver>,
        post: AttachmentPoster,
    ) -> Self {
        Self {
            pending: Vec::new(),
            drag_active: false,
            previews,
            uploads,
            post,
            context: None,
            generation: 0,
            in_progress: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn pending(&self) -> &[Attachment] {
        &self.pending
    }

    pub fn is_drag_active(&self) -> bool {
        self.drag_active
    }

    /// Files still waiting on a preview
    pub fn in_progress(&self) -> usize {
        self.in_progress
    }

    /// Queue files for attachment. Returns how many were accepted.
    pub fn attach(&mut self, files: Vec<LocalFile>) -> usize {
        let count = files.len();
        for file in files {
            self.in_progress += 1;
            let generation = self.generation;
            let previews = Arc::clone(&self.previews);
            let post = Arc::clone(&self.post);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let resolved = tokio::select! {
                    _ = cancel.cancelled() => return,
                    resolved = previews.resolve(&file) => resolved,
                };
                let event = match resolved {
                    Ok(url) => AttachmentEvent::Resolved {
                        generation,
                        attachment: build_attachment(&file, url),
                        file,
                    },
                    Err(e) => AttachmentEvent::Failed {
                        generation,
                        filename: file.name.clone(),
                        reason: format!("{:#}", e),
                    },
                };
                post(event);
            });
        }
        count
    }

    pub fn drag_over(&mut self) {
        self.drag_active = true;
    }

    pub fn drag_leave(&mut self) {
        self.drag_active = false;
    }

    /// Drop funnels into the same path as the file picker
    pub fn drop_files(&mut self, files: Vec<LocalFile>) -> usize {
        self.drag_active = false;
        self.attach(files)
    }

    /// Apply a resolved preview. Returns a notice when a file could not be read.
    pub fn handle(&mut self, event: AttachmentEvent) -> Option<Notice> {
        let generation = match &event {
            AttachmentEvent::Resolved { generation, .. }
            | AttachmentEvent::Failed { generation, .. } => *generation,
        };
        if generation != self.generation || self.cancel.is_cancelled() {
            return None;
        }
        self.in_progress = self.in_progress.saturating_sub(1);

        match event {
            AttachmentEvent::Resolved {
                file, attachment, ..
            } => {
                if let Some(context) = &self.context {
                    self.uploads.file_uploaded(&file, &attachment, context);
                }
                self.pending.push(attachment);
                None
            }
            AttachmentEvent::Failed {
                filename, reason, ..
            } => {
                tracing::warn!(%filename, %reason, "Attachment failed");
                Some(Notice::AttachmentFailed {
                    reason: format!("{}: {}", filename, reason),
                })
            }
        }
    }

    pub fn remove_pending(&mut self, id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|a| a.id != id);
        self.pending.len() != before
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Hand every pending attachment to an outgoing message
    pub fn take_pending(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.pending)
    }

    /// Abandon preview work and forget pending files
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        self.generation += 1;
        self.in_progress = 0;
        self.pending.clear();
        self.drag_active = false;
        self.context = None;
    }

    /// Start accepting files for a newly mounted session
    pub fn activate(&mut self, context: SessionContext) {
        self.context = Some(context);
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePreviewResolver, RecordingUploadObserver};
    use tokio::sync::mpsc;

    fn pipeline(
        previews: FakePreviewResolver,
        uploads: &RecordingUploadObserver,
    ) -> (AttachmentPipeline, mpsc::UnboundedReceiver<AttachmentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pipeline = AttachmentPipeline::new(
            Arc::new(previews),
            Arc::new(uploads.clone()),
            Arc::new(move |event| {
                let _ = tx.send(event);
            }),
        );
        pipeline.activate(SessionContext::new("python-tutor", "s-files"));
        (pipeline, rx)
    }

    #[test]
    fn test_mime_detection() {
        assert_eq!(mime_for(&LocalFile::new("diagram.png", 10)), "image/png");
        assert_eq!(
            mime_for(&LocalFile::new("data.bin", 10).with_type("text/csv")),
            "text/csv"
        );
        assert_eq!(mime_for(&LocalFile::new("README", 10)), FALLBACK_MIME);
    }

    #[test]
    fn test_image_gets_thumbnail() {
        let image = build_attachment(&LocalFile::new("cat.jpg", 3), "blob:x".to_string());
        assert_eq!(image.thumbnail_url.as_deref(), Some("blob:x"));
        let doc = build_attachment(&LocalFile::new("notes.pdf", 3), "blob:y".to_string());
        assert_eq!(doc.thumbnail_url, None);
        assert_ne!(image.id, doc.id);
    }

    #[tokio::test]
    async fn test_attach_fills_pending_and_notifies() {
        let uploads = RecordingUploadObserver::default();
        let (mut attachments, mut events) = pipeline(FakePreviewResolver::default(), &uploads);

        assert_eq!(attachments.attach(vec![LocalFile::new("a.txt", 1)]), 1);
        assert_eq!(attachments.in_progress(), 1);
        assert!(attachments.handle(events.recv().await.unwrap()).is_none());

        assert_eq!(attachments.pending().len(), 1);
        assert_eq!(attachments.pending()[0].url, "blob:preview/a.txt");
        assert_eq!(attachments.in_progress(), 0);

        let uploaded = uploads.uploaded();
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].path, std::path::PathBuf::from("a.txt"));
        assert_eq!(uploaded[0].attachment_id, attachments.pending()[0].id);
        assert_eq!(uploaded[0].session_id, "s-files");
    }

    #[tokio::test]
    async fn test_failed_preview_surfaces_notice() {
        let uploads = RecordingUploadObserver::default();
        let (mut attachments, mut events) = pipeline(FakePreviewResolver::failing(), &uploads);
        attachments.attach(vec![LocalFile::new("gone.txt", 1)]);
        let notice = attachments.handle(events.recv().await.unwrap());
        assert!(matches!(notice, Some(Notice::AttachmentFailed { .. })));
        assert!(attachments.pending().is_empty());
    }

    #[tokio::test]
    async fn test_drag_affordance_and_drop() {
        let uploads = RecordingUploadObserver::default();
        let (mut attachments, mut events) = pipeline(FakePreviewResolver::default(), &uploads);
        attachments.drag_over();
        assert!(attachments.is_drag_active());
        attachments.drag_leave();
        assert!(!attachments.is_drag_active());

        attachments.drag_over();
        attachments.drop_files(vec![LocalFile::new("x.png", 1)]);
        assert!(!attachments.is_drag_active());
        attachments.handle(events.recv().await.unwrap());
        assert_eq!(attachments.pending()[0].mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_remove_and_clear_pending() {
        let uploads = RecordingUploadObserver::default();
        let (mut attachments, mut events) = pipeline(FakePreviewResolver::default(), &uploads);
        attachments.attach(vec![LocalFile::new("a.txt", 1), LocalFile::new("b.txt", 1)]);
        attachments.handle(events.recv().await.unwrap());
        attachments.handle(events.recv().await.unwrap());

        let id = attachments.pending()[0].id.clone();
        assert!(attachments.remove_pending(&id));
        assert!(!attachments.remove_pending(&id));
        assert_eq!(attachments.pending().len(), 1);
        attachments.clear_pending();
        assert!(attachments.pending().is_empty());
    }

    #[tokio::test]
    async fn test_results_after_shutdown_are_discarded() {
        let uploads = RecordingUploadObserver::default();
        let (mut attachments, mut events) = pipeline(FakePreviewResolver::default(), &uploads);
        attachments.attach(vec![LocalFile::new("a.txt", 1)]);
        let late = events.recv().await.unwrap();
        attachments.shutdown();
        assert!(attachments.handle(late).is_none());
        assert!(attachments.pending().is_empty());
        assert!(uploads.uploaded().is_empty());
    }

    #[tokio::test]
    async fn test_files_before_activation_skip_the_observer() {
        let uploads = RecordingUploadObserver::default();
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut attachments = AttachmentPipeline::new(
            Arc::new(FakePreviewResolver::default()),
            Arc::new(uploads.clone()),
            Arc::new(move |event| {
                let _ = tx.send(event);
            }),
        );

        attachments.attach(vec![LocalFile::new("early.txt", 1)]);
        attachments.handle(events.recv().await.unwrap());
        assert_eq!(attachments.pending().len(), 1);
        assert!(uploads.uploaded().is_empty());
    }
}
