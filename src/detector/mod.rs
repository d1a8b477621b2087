//! Local clipboard change detection
//!
//! A cancellable polling task reads the clipboard at a fixed interval,
//! fingerprints what it finds and only reports content whose fingerprint
//! differs from the last one seen. The last-seen fingerprint lives in a
//! [`FingerprintCursor`] shared with the sync coordinator, which moves it
//! forward when it writes remote content so that the write is not reported
//! back as a local change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::classify;
use crate::clipboard::{ClipboardContent, ClipboardError, ClipboardItem, ClipboardProvider};

/// Fingerprint of clipboard content: MD5 over its canonical string form.
/// Used for change detection only.
pub fn fingerprint(content: &ClipboardContent) -> String {
    format!("{:x}", md5::compute(content.canonical().as_bytes()))
}

/// Polling configuration
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Interval between clipboard reads
    pub poll_interval: Duration,

    /// Wait applied once after a failed read
    pub error_backoff: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_millis(1000),
        }
    }
}

/// Last-seen fingerprint, shared between the poll tick and remote apply
#[derive(Debug, Clone, Default)]
pub struct FingerprintCursor {
    inner: Arc<Mutex<Option<String>>>,
}

impl FingerprintCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the cursor. The poll tick holds it for the whole
    /// read-compare-update step.
    pub async fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.inner.lock().await
    }

    pub async fn current(&self) -> Option<String> {
        self.inner.lock().await.clone()
    }
}

struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Clipboard change detector
pub struct ChangeDetector {
    clipboard: Arc<dyn ClipboardProvider>,
    cursor: FingerprintCursor,
    config: DetectorConfig,
    events: mpsc::UnboundedSender<ClipboardItem>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl ChangeDetector {
    /// Create a detector and the receiver its change events are delivered on
    pub fn new(
        clipboard: Arc<dyn ClipboardProvider>,
        config: DetectorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ClipboardItem>) {
        let (events, event_rx) = mpsc::unbounded_channel();

        let detector = Self {
            clipboard,
            cursor: FingerprintCursor::new(),
            config,
            events,
            monitor: Mutex::new(None),
        };

        (detector, event_rx)
    }

    /// Cursor shared with whoever writes remote content to the clipboard
    pub fn cursor(&self) -> FingerprintCursor {
        self.cursor.clone()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run a single tick: read, fingerprint, and emit the new item if the
    /// content changed.
    pub async fn poll_once(&self) -> Result<Option<ClipboardItem>, ClipboardError> {
        let mut last_seen = self.cursor.lock().await;

        let Some(content) = self.clipboard.get_content().await? else {
            return Ok(None);
        };

        let hash = fingerprint(&content);
        if last_seen.as_deref() == Some(hash.as_str()) {
            return Ok(None);
        }
        *last_seen = Some(hash);
        drop(last_seen);

        let item = classify::build_item(content);
        debug!(
            "Clipboard content changed locally ({}, {} bytes)",
            item.content_type, item.size
        );

        if self.events.send(item.clone()).is_err() {
            debug!("No subscriber for clipboard change events");
        }

        Ok(Some(item))
    }

    /// Start the polling task. No-op when it is already running.
    pub async fn start(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().await;
        if monitor.as_ref().is_some_and(|m| !m.task.is_finished()) {
            debug!("Clipboard monitor already running");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(self).run(shutdown_rx));
        *monitor = Some(MonitorHandle { shutdown, task });

        info!(
            "Clipboard monitor started (interval {:?})",
            self.config.poll_interval
        );
    }

    /// Stop the polling task and wait for it to finish. No-op when it is
    /// not running.
    pub async fn stop(&self) {
        let Some(monitor) = self.monitor.lock().await.take() else {
            return;
        };

        let _ = monitor.shutdown.send(true);
        if let Err(e) = monitor.task.await {
            warn!("Clipboard monitor ended abnormally: {}", e);
        }
        info!("Clipboard monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|m| !m.task.is_finished())
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let delay = match self.poll_once().await {
                Ok(_) => self.config.poll_interval,
                Err(e) => {
                    warn!("Failed to read clipboard, backing off: {}", e);
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
    }
}
