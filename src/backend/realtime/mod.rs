use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ChangeEvent, ChangeFeed, Subscription};
use crate::config::ClientConfig;
use crate::error::AppError;

pub mod heartbeat;
pub mod protocol;

use self::heartbeat::heartbeat_loop;
use self::protocol::{ChangeFilter, Incoming, PhoenixMessage, SubscriptionStatus, classify};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const OUTGOING_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

/// Change-feed over the backend's Phoenix-channel websocket.
#[derive(Clone)]
pub struct RealtimeClient {
    config: ClientConfig,
    access_token: String,
    message_ref_counter: Arc<AtomicU64>,
}

impl RealtimeClient {
    pub fn new(config: &ClientConfig, access_token: impl Into<String>) -> Self {
        Self {
            config: config.clone(),
            access_token: access_token.into(),
            message_ref_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn get_ref_provider_closure(counter: Arc<AtomicU64>) -> impl Fn() -> String + Send + Sync + Clone + 'static {
        move || counter.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn topic(&self) -> String {
        format!("realtime:{}", self.config.realtime_channel)
    }

    async fn connect_and_join(&self, user_id: Uuid) -> Result<Subscription, AppError> {
        let url = self.config.realtime_url();
        let topic = self.topic();
        info!(channel = %self.config.realtime_channel, user_id = %user_id, "Setting up realtime subscription.");

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!("Connected to realtime endpoint.");
        let (mut ws_sink, mut ws_reader) = ws_stream.split();

        let next_ref = Self::get_ref_provider_closure(self.message_ref_counter.clone());
        let join_ref = next_ref();
        let filter = ChangeFilter {
            schema: self.config.db_schema.clone(),
            table: self.config.bookmarks_table.clone(),
            user_id,
        };
        let join = PhoenixMessage::join(&topic, &filter, &self.access_token, join_ref.clone());
        ws_sink.send(WsMessage::Text(join.to_text()?.into())).await?;
        debug!(join_ref = %join_ref, "Join sent. Waiting for reply...");

        match tokio::time::timeout(JOIN_TIMEOUT, await_join_reply(&mut ws_reader, &join_ref)).await {
            Ok(Ok(())) => {
                info!(status = %SubscriptionStatus::Subscribed, channel = %topic, "Realtime subscription status.");
            }
            Ok(Err(e)) => {
                error!(status = %SubscriptionStatus::ChannelError, channel = %topic, error = %e, "Realtime subscription status.");
                return Err(e);
            }
            Err(_) => {
                error!(status = %SubscriptionStatus::TimedOut, channel = %topic, "Realtime subscription status.");
                return Err(AppError::Realtime(format!("timed out joining {topic}")));
            }
        }

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<PhoenixMessage>(OUTGOING_BUFFER);
        let (event_tx, event_rx) = mpsc::channel::<ChangeEvent>(EVENT_BUFFER);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        // Writer: owns the sink; says goodbye on shutdown.
        let writer_topic = topic.clone();
        let leave_ref = next_ref.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        let leave = PhoenixMessage::leave(&writer_topic, leave_ref(), Some(join_ref.clone()));
                        if let Ok(text) = leave.to_text() {
                            if let Err(e) = ws_sink.send(WsMessage::Text(text.into())).await {
                                warn!(error = %e, "Failed to send leave frame.");
                            }
                        }
                        let _ = ws_sink.close().await;
                        info!(status = %SubscriptionStatus::Closed, channel = %writer_topic, "Realtime subscription status.");
                        break;
                    }
                    outgoing = outgoing_rx.recv() => {
                        let Some(message) = outgoing else { break };
                        let text = match message.to_text() {
                            Ok(text) => text,
                            Err(e) => {
                                error!(error = %e, "Failed to encode outgoing frame.");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(WsMessage::Text(text.into())).await {
                            error!(error = %e, "Failed to send frame to realtime server.");
                            break;
                        }
                    }
                }
            }
        });

        let reader_topic = topic.clone();
        let reader = tokio::spawn(async move {
            server_message_loop(ws_reader, event_tx, reader_topic).await;
        });

        let heartbeat = tokio::spawn(heartbeat_loop(
            outgoing_tx,
            self.config.heartbeat_interval(),
            next_ref,
        ));

        Ok(Subscription::new(self.config.realtime_channel.clone(), event_rx, vec![reader, heartbeat])
            .with_graceful_shutdown(shutdown_tx, writer))
    }
}

#[async_trait]
impl ChangeFeed for RealtimeClient {
    async fn subscribe(&self, user_id: Uuid) -> Result<Subscription, AppError> {
        self.connect_and_join(user_id).await
    }
}

async fn await_join_reply<S>(ws_reader: &mut S, join_ref: &str) -> Result<(), AppError>
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = ws_reader.next().await {
        let text = match frame? {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let message = PhoenixMessage::from_text(text.as_str())?;
        match classify(message)? {
            Incoming::Reply { msg_ref, status, response } if msg_ref.as_deref() == Some(join_ref) => {
                return if status == "ok" {
                    Ok(())
                } else {
                    Err(AppError::Realtime(format!("join rejected ({status}): {response}")))
                };
            }
            Incoming::Error(detail) => {
                return Err(AppError::Realtime(format!("channel error during join: {detail}")));
            }
            other => debug!(frame = ?other, "Ignoring frame while joining."),
        }
    }
    Err(AppError::Realtime("Server closed stream during join".to_string()))
}

/// Decodes frames into change events until the socket or channel closes.
async fn server_message_loop<S>(mut ws_reader: S, event_tx: mpsc::Sender<ChangeEvent>, topic: String)
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = ws_reader.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => {
                info!(status = %SubscriptionStatus::Closed, channel = %topic, "Realtime subscription status.");
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "Realtime receive error.");
                break;
            }
        };

        let incoming = match PhoenixMessage::from_text(text.as_str()).and_then(classify) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable realtime frame.");
                continue;
            }
        };

        match incoming {
            Incoming::Change(event) => {
                info!(event = event.kind(), bookmark_id = %event.bookmark_id(), "Realtime event received.");
                if event_tx.send(event).await.is_err() {
                    debug!("Subscriber gone. Stopping realtime reader.");
                    return;
                }
            }
            Incoming::System { status, message } => {
                info!(status = %status, message = %message, channel = %topic, "Realtime system message.");
            }
            Incoming::Reply { status, .. } if status != "ok" => {
                warn!(status = %status, "Realtime server replied with an error.");
            }
            Incoming::Reply { .. } | Incoming::Other(_) => {}
            Incoming::Close => {
                info!(status = %SubscriptionStatus::Closed, channel = %topic, "Realtime subscription status.");
                return;
            }
            Incoming::Error(detail) => {
                error!(status = %SubscriptionStatus::ChannelError, channel = %topic, detail = %detail, "Realtime subscription status.");
                return;
            }
        }
    }
    warn!(status = %SubscriptionStatus::Closed, channel = %topic, "Realtime stream ended.");
}
