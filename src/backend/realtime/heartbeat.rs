use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::protocol::PhoenixMessage;

/// Keeps the socket alive. Ends when the writer side has gone away.
pub async fn heartbeat_loop(
    tx_to_server: mpsc::Sender<PhoenixMessage>,
    interval: Duration,
    id_provider: impl Fn() -> String + Send + Sync + 'static,
) {
    loop {
        debug!(interval_seconds = interval.as_secs(), "Heartbeat task tick.");
        tokio::time::sleep(interval).await;

        if let Err(e) = tx_to_server.send(PhoenixMessage::heartbeat(id_provider())).await {
            error!(error = %e, "Failed to send heartbeat. Exiting heartbeat task.");
            break;
        }
    }
}
