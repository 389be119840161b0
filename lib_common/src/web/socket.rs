//! # Client Transport
//!
//! WebSocket endpoints carrying STOMP frames, one task per connection.
//!
//! - `<prefix>/{server}/{session}/websocket`: SockJS framing, session id
//!   taken from the URL.
//! - `<prefix>/websocket`: raw WebSocket, one STOMP frame per message,
//!   session id generated.
//!
//! The task multiplexes four things: inbound client messages, the session's
//! outbound queue (fed by the broadcaster), the SockJS heartbeat and the
//! session's cancellation token (eviction or shutdown). Every send is
//! bounded by the heartbeat period; a client that stops reading ends its
//! session instead of parking the task.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::sockjs;
use super::AppState;

/// Messages drained from the outbound queue into one SockJS `a[...]` frame.
const MAX_BATCH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    SockJs,
    Raw,
}

/// Upgrade handler for the SockJS WebSocket transport.
pub async fn sockjs_ws_handler(
    ws: WebSocketUpgrade,
    Path((_server, session)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_session(socket, state, session, Transport::SockJs))
}

/// Upgrade handler for the raw WebSocket endpoint.
pub async fn raw_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let session = Uuid::new_v4().to_string();
    ws.on_upgrade(move |socket| serve_session(socket, state, session, Transport::Raw))
}

/// Sends one text message, giving up after `limit`. The error is the reason
/// the session ends.
async fn send_text<S>(sink: &mut S, text: String, limit: Duration) -> Result<(), &'static str>
where
    S: Sink<Message> + Unpin,
{
    send_bounded(sink, Message::Text(text.into()), limit).await
}

async fn send_bounded<S>(sink: &mut S, message: Message, limit: Duration) -> Result<(), &'static str>
where
    S: Sink<Message> + Unpin,
{
    match timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err("send failed"),
        Err(_) => Err("send timed out"),
    }
}

/// Runs one client session until the client leaves, the socket fails or the
/// session is closed from outside.
async fn serve_session(socket: WebSocket, state: Arc<AppState>, id: String, transport: Transport) {
    let (mut session, mut outbound) = state.sessions.open(id);
    let handle = session.handle().clone();
    let cancel = handle.cancellation().clone();
    let (mut sink, mut stream) = socket.split();
    let period = state.settings.heartbeat;

    // --- Phase 1: Open ---
    if transport == Transport::SockJs {
        if let Err(reason) = send_text(&mut sink, sockjs::OPEN_FRAME.to_string(), period).await {
            state.sessions.release(&handle);
            debug!(session_id = %handle.id(), reason = reason, "Open frame not delivered");
            return;
        }
    }

    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // --- Phase 2: Session loop ---
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break "closed by relay",

            incoming = stream.next() => {
                let payloads = match incoming {
                    Some(Ok(Message::Text(text))) => match transport {
                        Transport::Raw => vec![text.as_str().as_bytes().to_vec()],
                        Transport::SockJs => match sockjs::decode_messages(text.as_str()) {
                            Ok(messages) => messages.into_iter().map(String::into_bytes).collect(),
                            Err(err) => {
                                warn!(session_id = %handle.id(), error = %err, "Discarding message");
                                continue;
                            }
                        },
                    },
                    Some(Ok(Message::Binary(bytes))) if transport == Transport::Raw => vec![bytes.to_vec()],
                    Some(Ok(Message::Close(_))) | None => break "client closed",
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        debug!(session_id = %handle.id(), error = %err, "Socket error");
                        break "socket error";
                    }
                };

                let replies: Vec<String> = payloads
                    .iter()
                    .flat_map(|payload| session.receive(payload).replies)
                    .collect();
                if replies.is_empty() {
                    continue;
                }
                let delivered = match transport {
                    Transport::SockJs => send_text(&mut sink, sockjs::encode_messages(&replies), period).await,
                    Transport::Raw => {
                        let mut result = Ok(());
                        for reply in replies {
                            result = send_text(&mut sink, reply, period).await;
                            if result.is_err() {
                                break;
                            }
                        }
                        result
                    }
                };
                if let Err(reason) = delivered {
                    break reason;
                }
            }

            Some(first) = outbound.recv() => {
                let delivered = match transport {
                    Transport::SockJs => {
                        let mut batch = vec![first];
                        while batch.len() < MAX_BATCH {
                            match outbound.try_recv() {
                                Ok(next) => batch.push(next),
                                Err(_) => break,
                            }
                        }
                        send_text(&mut sink, sockjs::encode_messages(&batch), period).await
                    }
                    Transport::Raw => send_text(&mut sink, first, period).await,
                };
                if let Err(reason) = delivered {
                    break reason;
                }
            }

            _ = heartbeat.tick(), if transport == Transport::SockJs => {
                if let Err(reason) = send_text(&mut sink, sockjs::HEARTBEAT_FRAME.to_string(), period).await {
                    break reason;
                }
            }
        }
    };

    // --- Phase 3: Teardown ---
    let evicted = cancel.is_cancelled();
    state.sessions.release(&handle);
    if evicted && transport == Transport::SockJs {
        let (code, text) = sockjs::GO_AWAY;
        let _ = send_text(&mut sink, sockjs::encode_close(code, text), period).await;
    }
    let _ = send_bounded(&mut sink, Message::Close(None), period).await;
    info!(session_id = %handle.id(), reason = reason, "Session ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A client that never reads: the sink is never ready.
    struct Stalled;

    impl Sink<Message> for Stalled {
        type Error = ();

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    /// A client whose connection already dropped.
    struct Broken;

    impl Sink<Message> for Broken {
        type Error = ();

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Err(()))
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Err(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_client_send_times_out() {
        let started = Instant::now();
        let result = send_text(&mut Stalled, "a[\"x\"]".to_string(), Duration::from_secs(25)).await;

        assert_eq!(result, Err("send timed out"));
        assert!(started.elapsed() >= Duration::from_secs(25));
    }

    #[tokio::test]
    async fn broken_client_send_fails() {
        let result = send_text(&mut Broken, "h".to_string(), Duration::from_secs(25)).await;
        assert_eq!(result, Err("send failed"));
    }

    #[tokio::test]
    async fn ready_client_send_succeeds() {
        let mut sink = futures_util::sink::drain::<Message>();
        let result = send_text(&mut sink, "o".to_string(), Duration::from_secs(1)).await;
        assert_eq!(result, Ok(()));
    }
}
