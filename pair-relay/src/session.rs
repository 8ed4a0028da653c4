//! Per-connection session management.
//!
//! Each WebSocket connection gets a Session. The socket is split: a writer
//! task drains the connection's event queue into the socket while the
//! session reads frames and hands the decoded commands to the relay one at
//! a time, so a connection's commands are processed in the order sent.

use crate::coordinator::EventSink;
use crate::error::{ProtocolError, ProtocolResult};
use crate::server::PairRelay;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use pair_types::{Command, ConnectionId, Event, WireError};
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Message of the `error` event sent for rate limited commands.
const RATE_LIMITED: &str = "rate limit exceeded";

/// How long the writer may keep flushing after the session ends.
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Outbound frame encoding, chosen per connection at upgrade time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// JSON text frames.
    #[default]
    Json,
    /// MessagePack binary frames.
    Msgpack,
}

impl WireFormat {
    /// Encode an event as a WebSocket frame.
    pub fn encode(self, event: &Event) -> Result<Message, WireError> {
        match self {
            Self::Json => event.to_json().map(Message::Text),
            Self::Msgpack => event.to_msgpack().map(Message::Binary),
        }
    }
}

/// A per-connection session.
pub struct Session {
    relay: Arc<PairRelay>,
    id: ConnectionId,
    format: WireFormat,
}

impl Session {
    /// Create a new session for a registered connection.
    pub fn new(relay: Arc<PairRelay>, id: ConnectionId, format: WireFormat) -> Self {
        Self { relay, id, format }
    }

    /// Run the session until the socket closes.
    ///
    /// `events` is the queue returned when the connection was registered.
    pub async fn run(self, socket: WebSocket, events: mpsc::Receiver<Event>) {
        let (sink, mut stream) = socket.split();
        let mut writer = tokio::spawn(write_events(sink, events, self.format, self.id));
        let mut writer_done = false;

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(message)) => {
                        if !self.handle_frame(message).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!("Connection {} read error: {}", self.id, e);
                        break;
                    }
                    None => break,
                },
                _ = &mut writer => {
                    tracing::debug!("Writer for {} ended", self.id);
                    writer_done = true;
                    break;
                }
            }
        }

        // Dropping the registry entry closes the event queue, which lets the
        // writer flush what is left and close the socket.
        self.relay.disconnect(self.id).await;

        if !writer_done {
            let abort = writer.abort_handle();
            if tokio::time::timeout(WRITER_GRACE, writer).await.is_err() {
                tracing::debug!("Writer for {} did not finish, aborting", self.id);
                abort.abort();
            }
        }
    }

    /// Handle one inbound frame.
    ///
    /// Returns `false` when the session should end.
    async fn handle_frame(&self, message: Message) -> bool {
        let command = match self.decode(message) {
            Ok(Frame::Command(command)) => command,
            Ok(Frame::Control) => return true,
            Ok(Frame::Close) => return false,
            Err(e) => {
                tracing::warn!("Bad frame from {}: {}", self.id, e);
                self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                self.relay.registry().send(self.id, Event::error(e.to_string()));
                return true;
            }
        };

        if let Err(e) = self.check_rate_limit() {
            tracing::warn!("Dropping {} from {}: {}", command.name(), self.id, e);
            self.relay.registry().send(self.id, Event::error(RATE_LIMITED));
            return true;
        }

        self.relay.handle_command(self.id, command).await;
        true
    }

    /// Decode a frame into a command.
    fn decode(&self, message: Message) -> ProtocolResult<Frame> {
        let limit = self.relay.config().limits.max_message_size;
        let check_size = |size: usize| {
            if size > limit {
                Err(ProtocolError::MessageTooLarge { size, limit })
            } else {
                Ok(())
            }
        };

        match message {
            Message::Text(text) => {
                check_size(text.len())?;
                Ok(Frame::Command(Command::from_json(&text)?))
            }
            Message::Binary(bytes) => {
                check_size(bytes.len())?;
                Ok(Frame::Command(Command::from_msgpack(&bytes)?))
            }
            Message::Ping(_) | Message::Pong(_) => Ok(Frame::Control),
            Message::Close(frame) => {
                tracing::debug!("Close frame from {}: {:?}", self.id, frame);
                Ok(Frame::Close)
            }
        }
    }

    fn check_rate_limit(&self) -> ProtocolResult<()> {
        self.relay
            .rate_limits()
            .check_command(&self.id)
            .map_err(|e| {
                self.relay
                    .metrics()
                    .rate_limit_hits
                    .fetch_add(1, Ordering::Relaxed);
                ProtocolError::RateLimited {
                    reason: e.to_string(),
                }
            })
    }
}

/// A decoded inbound frame.
enum Frame {
    Command(Command),
    /// Ping or pong, answered by the transport.
    Control,
    Close,
}

/// Drain `events` into the socket until the queue closes or a write fails.
async fn write_events(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<Event>,
    format: WireFormat,
    id: ConnectionId,
) {
    while let Some(event) = events.recv().await {
        let frame = match format.encode(&event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode {} for {}: {}", event.name(), id, e);
                continue;
            }
        };
        if let Err(e) = sink.send(frame).await {
            tracing::debug!("Write to {} failed: {}", id, e);
            return;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pair_types::PairingCode;

    #[test]
    fn wire_format_defaults_to_json() {
        assert_eq!(WireFormat::default(), WireFormat::Json);
    }

    #[test]
    fn wire_format_from_query_value() {
        #[derive(Deserialize)]
        struct Params {
            format: WireFormat,
        }
        let params: Params = serde_json::from_str(r#"{"format":"msgpack"}"#).unwrap();
        assert_eq!(params.format, WireFormat::Msgpack);
        assert!(serde_json::from_str::<Params>(r#"{"format":"xml"}"#).is_err());
    }

    #[test]
    fn json_events_are_text_frames() {
        let event = Event::PairingCode(PairingCode::parse("123456").unwrap());
        match WireFormat::Json.encode(&event).unwrap() {
            Message::Text(text) => {
                assert_eq!(text, r#"{"event":"pairing_code","data":"123456"}"#)
            }
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn msgpack_events_are_binary_frames() {
        let event = Event::PartnerUnpaired;
        match WireFormat::Msgpack.encode(&event).unwrap() {
            Message::Binary(bytes) => {
                assert_eq!(Event::from_msgpack(&bytes).unwrap(), event)
            }
            other => panic!("Expected binary frame, got {:?}", other),
        }
    }
}
