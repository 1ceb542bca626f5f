//! TCP session with the lobby server
//!
//! `LobbyClient` is the outbound seam used by the rest of the crate; the
//! typed helpers build the JSON payloads for every command the matchbot
//! sends. `LobbyConnection` is the socket-backed implementation.

use crate::error::{MatchbotError, Result};
use crate::protocol::codec::{decode, Message};
use crate::protocol::messages::{
    self, CloseQueue, ConnectUser, JoinQueueAccept, JoinQueueDeny, ReadyCheck, ReadyCheckResult,
};
use crate::types::{QueueDefinition, SessionId};
use crate::utils::{generate_session_id, hash_password};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Framed};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest inbound line accepted before the line is discarded
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Inbound messages buffered between the read task and the dispatcher
const EVENT_BUFFER: usize = 256;

/// Lines are framed as raw bytes; the lobby does not guarantee UTF-8
type LobbyFramed = Framed<TcpStream, AnyDelimiterCodec>;

fn line_codec() -> AnyDelimiterCodec {
    AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), MAX_LINE_LENGTH)
}

/// Text of one inbound line, without its `\r`. Invalid UTF-8 is replaced.
fn line_text(frame: &[u8]) -> String {
    let frame = frame.strip_suffix(b"\r").unwrap_or(frame);
    match String::from_utf8_lossy(frame) {
        Cow::Borrowed(text) => text.to_string(),
        Cow::Owned(text) => {
            warn!("Lobby line is not valid UTF-8: {}", text);
            text
        }
    }
}

fn json_message<T: Serialize>(command: &str, payload: &T) -> Result<Message> {
    let json = messages::serialize_payload(payload)?;
    Ok(Message::prepare(command, &[json]))
}

/// Outbound side of the lobby protocol
#[async_trait]
pub trait LobbyClient: Send + Sync {
    /// Send one prepared message
    async fn send(&self, message: Message) -> Result<()>;

    async fn login(&self, username: &str, password: &str) -> Result<()> {
        let agent = format!("Matchbot v{}", crate::VERSION);
        let params = [
            username.to_string(),
            hash_password(password),
            "3200".to_string(),
            "*".to_string(),
            agent,
            "0".to_string(),
            "sp cl p".to_string(),
        ];
        self.send(Message::prepare(messages::LOGIN, &params)).await
    }

    async fn open_queue(&self, definition: &QueueDefinition) -> Result<()> {
        self.send(json_message(messages::OPEN_QUEUE, definition)?)
            .await
    }

    async fn close_queue(&self, queue: &str) -> Result<()> {
        let payload = CloseQueue {
            name: queue.to_string(),
        };
        self.send(json_message(messages::CLOSE_QUEUE, &payload)?)
            .await
    }

    async fn join_queue_accept(&self, queue: &str, users: &[String]) -> Result<()> {
        let payload = JoinQueueAccept {
            name: queue.to_string(),
            user_names: users.to_vec(),
        };
        self.send(json_message(messages::JOIN_QUEUE_ACCEPT, &payload)?)
            .await
    }

    async fn join_queue_deny(&self, queue: &str, users: &[String], reason: &str) -> Result<()> {
        let payload = JoinQueueDeny {
            name: queue.to_string(),
            user_names: users.to_vec(),
            reason: reason.to_string(),
        };
        self.send(json_message(messages::JOIN_QUEUE_DENY, &payload)?)
            .await
    }

    async fn ready_check(&self, queue: &str, users: &[String], response_time: u64) -> Result<()> {
        let payload = ReadyCheck {
            name: queue.to_string(),
            user_names: users.to_vec(),
            response_time,
        };
        self.send(json_message(messages::READY_CHECK, &payload)?)
            .await
    }

    async fn ready_check_result(&self, queue: &str, users: &[String], result: &str) -> Result<()> {
        let payload = ReadyCheckResult {
            name: queue.to_string(),
            user_names: users.to_vec(),
            result: result.to_string(),
        };
        self.send(json_message(messages::READY_CHECK_RESULT, &payload)?)
            .await
    }

    async fn connect_user(&self, connect: &ConnectUser) -> Result<()> {
        self.send(json_message(messages::CONNECT_USER, connect)?)
            .await
    }

    async fn ping(&self) -> Result<()> {
        self.send(Message::new(messages::PING, "")).await
    }

    async fn exit(&self) -> Result<()> {
        self.send(Message::new(messages::EXIT, "")).await
    }
}

/// Events and end-of-session signal for one established connection
pub struct LobbySession {
    pub events: mpsc::Receiver<Message>,
    pub closed: CancellationToken,
}

struct Writer {
    sink: SplitSink<LobbyFramed, String>,
    session: SessionId,
    closed: CancellationToken,
}

/// Socket-backed lobby client; reusable across reconnects
pub struct LobbyConnection {
    writer: Arc<Mutex<Option<Writer>>>,
    ping_interval: Duration,
}

impl LobbyConnection {
    pub fn new(ping_interval: Duration) -> Self {
        Self {
            writer: Arc::new(Mutex::new(None)),
            ping_interval,
        }
    }

    /// Open a session, replacing any previous one
    pub async fn connect(&self, server: &str) -> Result<LobbySession> {
        let stream = TcpStream::connect(server).await.map_err(|e| {
            MatchbotError::LobbyConnectionFailed {
                message: format!("Failed to connect to {}: {}", server, e),
            }
        })?;

        let framed = Framed::new(stream, line_codec());
        let (sink, stream) = framed.split();
        let closed = CancellationToken::new();
        let session = generate_session_id();

        {
            let mut writer = self.writer.lock().await;
            if let Some(previous) = writer.take() {
                previous.closed.cancel();
            }
            *writer = Some(Writer {
                sink,
                session,
                closed: closed.clone(),
            });
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(read_loop(
            stream,
            events_tx,
            self.writer.clone(),
            session,
            closed.clone(),
        ));

        info!("Connected to lobby server {}", server);
        Ok(LobbySession {
            events: events_rx,
            closed,
        })
    }

    /// Ping the server until the session closes
    pub fn spawn_keepalive(self: &Arc<Self>, closed: CancellationToken) -> JoinHandle<()> {
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = closed.cancelled() => return,
                    _ = tokio::time::sleep(connection.ping_interval) => {
                        if let Err(e) = connection.ping().await {
                            debug!("Keep-alive ping failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Say goodbye and close the socket. A no-op when already disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.is_connected().await {
            return Ok(());
        }

        if let Err(e) = self.exit().await {
            warn!("Failed to send EXIT to lobby server: {}", e);
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.closed.cancel();
            if let Err(e) = writer.sink.close().await {
                debug!("Error while closing lobby socket: {}", e);
            }
        }

        info!("Disconnected from lobby server");
        Ok(())
    }
}

#[async_trait]
impl LobbyClient for LobbyConnection {
    async fn send(&self, message: Message) -> Result<()> {
        let line = message.to_line();
        debug!("OUT {}", line);

        let mut writer = self.writer.lock().await;
        let active = writer.as_mut().ok_or(MatchbotError::NotConnected)?;

        if let Err(e) = active.sink.send(line).await {
            active.closed.cancel();
            writer.take();
            return Err(MatchbotError::LobbyConnectionFailed {
                message: format!("Failed to send {}: {}", message.command, e),
            }
            .into());
        }

        Ok(())
    }
}

async fn read_loop(
    mut stream: SplitStream<LobbyFramed>,
    events: mpsc::Sender<Message>,
    writer: Arc<Mutex<Option<Writer>>>,
    session: SessionId,
    closed: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = closed.cancelled() => break,
            line = stream.next() => line,
        };

        match line {
            Some(Ok(frame)) => {
                let message = decode(&line_text(&frame));
                debug!("IN {} {}", message.command, message.data);
                if events.send(message).await.is_err() {
                    break;
                }
            }
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                warn!(
                    "Discarding lobby line longer than {} bytes",
                    MAX_LINE_LENGTH
                );
            }
            Some(Err(AnyDelimiterCodecError::Io(e))) => {
                warn!("Lobby read failed: {}", e);
                break;
            }
            None => break,
        }
    }

    {
        let mut writer = writer.lock().await;
        let ours = writer
            .as_ref()
            .map(|w| w.session == session)
            .unwrap_or(false);
        if ours {
            writer.take();
        }
    }
    closed.cancel();
    info!("Lobby session ended");
}
