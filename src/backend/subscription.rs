use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ChangeEvent;

const GRACEFUL_LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

/// A live change-feed. Owns the background tasks that feed it; they are
/// aborted when the subscription is dropped.
pub struct Subscription {
    channel: String,
    events: mpsc::Receiver<ChangeEvent>,
    tasks: Vec<JoinHandle<()>>,
    shutdown: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, events: mpsc::Receiver<ChangeEvent>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            channel: channel.into(),
            events,
            tasks,
            shutdown: None,
        }
    }

    /// `writer` is awaited after `signal` fires so it can say goodbye to the
    /// server before the remaining tasks are aborted.
    pub fn with_graceful_shutdown(mut self, signal: oneshot::Sender<()>, writer: JoinHandle<()>) -> Self {
        self.shutdown = Some((signal, writer));
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next change, or `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    pub async fn unsubscribe(mut self) {
        info!(channel = %self.channel, "Cleaning up realtime subscription.");
        if let Some((signal, writer)) = self.shutdown.take() {
            let _ = signal.send(());
            match tokio::time::timeout(GRACEFUL_LEAVE_TIMEOUT, writer).await {
                Ok(Ok(())) => debug!(channel = %self.channel, "Left channel."),
                Ok(Err(join_error)) => warn!(channel = %self.channel, error = ?join_error, "Writer task failed while leaving."),
                Err(_) => warn!(channel = %self.channel, "Timed out leaving channel."),
            }
        }
        // Drop aborts whatever is still running.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some((_, writer)) = self.shutdown.take() {
            writer.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
