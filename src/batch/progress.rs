//! Progress Reporter
//!
//! Turns chunk completion into a monotonically non-decreasing percentage and
//! pushes status text to a [`NotificationSink`] (in production, the chat-bot
//! message editor). Notification is best-effort: a failing sink is logged
//! and never interrupts the batch.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// External message editor
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn edit(&self, message_id: &str, text: &str) -> anyhow::Result<()>;
}

/// Sink that writes status updates to the log
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn edit(&self, message_id: &str, text: &str) -> anyhow::Result<()> {
        info!(message_id = %message_id, "{}", text);
        Ok(())
    }
}

/// Pure function from percentage and message to display text
pub type Renderer = fn(u8, &str) -> String;

const BAR_WIDTH: usize = 20;

/// Default renderer: `[██████░░░░░░░░░░░░░░]  30% message`
pub fn render_progress_bar(percent: u8, message: &str) -> String {
    let percent = percent.min(100);
    let filled = usize::from(percent) * BAR_WIDTH / 100;
    format!(
        "[{}{}] {:>3}% {}",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled),
        percent,
        message
    )
}

pub struct ProgressReporter {
    sink: Arc<dyn NotificationSink>,
    message_id: String,
    renderer: Renderer,
    last_percent: u8,
    finished: bool,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn NotificationSink>, message_id: impl Into<String>) -> Self {
        Self {
            sink,
            message_id: message_id.into(),
            renderer: render_progress_bar,
            last_percent: 0,
            finished: false,
        }
    }

    /// Swap the text renderer
    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    /// Whether a terminal update (complete or fail) has been sent
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Report progress. Values above 100 are clamped to 100 and values below
    /// the last report are raised to it. Returns the percentage shown.
    pub async fn report(&mut self, percent: u8, message: &str) -> u8 {
        let shown = percent.min(100).max(self.last_percent);
        self.last_percent = shown;
        let text = (self.renderer)(shown, message);
        self.push(&text).await;
        shown
    }

    /// Terminal success update at 100%
    pub async fn complete(&mut self, message: &str) {
        self.report(100, message).await;
        self.finished = true;
    }

    /// Terminal failure update at the current percentage
    pub async fn fail(&mut self, message: &str) {
        let text = format!("Failed: {}", message);
        self.push(&text).await;
        self.finished = true;
    }

    async fn push(&self, text: &str) {
        if let Err(e) = self.sink.edit(&self.message_id, text).await {
            warn!(message_id = %self.message_id, error = %e, "Failed to push progress update");
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("message_id", &self.message_id)
            .field("last_percent", &self.last_percent)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Sink that remembers every update, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub updates: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationSink for RecordingSink {
    async fn edit(&self, _message_id: &str, text: &str) -> anyhow::Result<()> {
        self.updates.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Renderer producing `percent|message`, for tests
#[cfg(test)]
pub(crate) fn render_plain(percent: u8, message: &str) -> String {
    format!("{}|{}", percent, message)
}
