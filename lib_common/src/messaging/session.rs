//! # Sessions
//!
//! One [`SessionHandle`] per connected client, shared between the client's
//! transport task (the only writer of its state) and the broadcaster (a
//! reader). The [`SessionManager`] owns the set of live handles.
//!
//! ## State machine
//! ```text
//! OpenNoHandshake --CONNECT--> Active { subscriptions }
//!        |                         |
//!        +-------- close ----------+--> Closed
//! ```
//! Subscriptions only exist in `Active`; closing discards them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{DeliveryError, ProtocolError};
use super::frame::{Command, Frame};
use super::parser::FrameParser;
use crate::discovery::{TOPIC_ADD, TOPIC_REMOVE};

/// Outbound queue length per session unless configured otherwise.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Transport is open, no `CONNECT` yet.
    OpenNoHandshake,
    /// Handshake done. Maps destination topic to the client's subscription id.
    Active {
        /// `topic → subscription id`
        subscriptions: HashMap<String, String>,
    },
    /// Transport closed or session evicted.
    Closed,
}

/// # Session Handle
///
/// The shared part of a session.
#[derive(Debug)]
pub struct SessionHandle {
    id: String,
    state: RwLock<SessionState>,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// The transport-assigned session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A copy of the current state.
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// `true` once `CONNECT` was processed and until close.
    pub fn is_active(&self) -> bool {
        matches!(*self.state.read(), SessionState::Active { .. })
    }

    /// `true` after [`SessionHandle::close`].
    pub fn is_closed(&self) -> bool {
        matches!(*self.state.read(), SessionState::Closed)
    }

    /// The subscription id this session registered for `topic`, if it is
    /// active and subscribed.
    pub fn subscription_for(&self, topic: &str) -> Option<String> {
        match &*self.state.read() {
            SessionState::Active { subscriptions } => subscriptions.get(topic).cloned(),
            _ => None,
        }
    }

    /// Applies one inbound frame to the session state. Returns the frame to
    /// send back, if any.
    ///
    /// On error the state is left exactly as it was.
    pub fn handle_frame(&self, frame: &Frame) -> Result<Option<Frame>, ProtocolError> {
        let mut state = self.state.write();

        if matches!(*state, SessionState::Closed) {
            return Err(ProtocolError::SessionClosed);
        }

        match frame.command {
            Command::Connect | Command::Stomp => {
                *state = SessionState::Active {
                    subscriptions: HashMap::new(),
                };
                Ok(Some(Frame::connected(&self.id)))
            }
            Command::Subscribe => {
                let SessionState::Active { subscriptions } = &mut *state else {
                    return Err(ProtocolError::NotConnected(frame.command.as_str()));
                };
                let id = frame.require("id")?;
                let destination = known_topic(frame.require("destination")?)?;
                subscriptions.insert(destination.to_string(), id.to_string());
                Ok(None)
            }
            Command::Unsubscribe => {
                let SessionState::Active { subscriptions } = &mut *state else {
                    return Err(ProtocolError::NotConnected(frame.command.as_str()));
                };
                let destination = known_topic(frame.require("destination")?)?;
                subscriptions
                    .remove(destination)
                    .map(|_| None)
                    .ok_or_else(|| ProtocolError::NotSubscribed(destination.to_string()))
            }
            Command::Connected | Command::Message => Err(ProtocolError::UnsupportedCommand(
                frame.command.as_str().to_string(),
            )),
        }
    }

    /// Queues an encoded frame for the transport task without waiting.
    pub fn deliver(&self, text: String) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Moves the session to `Closed` and tells its transport task to stop.
    /// Idempotent.
    pub fn close(&self) {
        *self.state.write() = SessionState::Closed;
        self.cancel.cancel();
    }

    /// Token cancelled when the session is closed from outside its task.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

fn known_topic(destination: &str) -> Result<&str, ProtocolError> {
    if destination == TOPIC_ADD || destination == TOPIC_REMOVE {
        Ok(destination)
    } else {
        Err(ProtocolError::UnknownTopic(destination.to_string()))
    }
}

/// What one chunk of inbound data produced.
#[derive(Debug, Default)]
pub struct Inbound {
    /// Encoded frames to send back, in order.
    pub replies: Vec<String>,
    /// Frames that were discarded, and why.
    pub errors: Vec<ProtocolError>,
}

/// # Session
///
/// The transport task's side of a session: the shared handle plus the
/// private frame parser.
#[derive(Debug)]
pub struct Session {
    handle: Arc<SessionHandle>,
    parser: FrameParser,
}

impl Session {
    /// The shared handle.
    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    /// The session id.
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// Feeds received data through the parser and applies every frame that
    /// completes. Protocol errors discard the offending frame only; they are
    /// logged and reported, the session stays open.
    pub fn receive(&mut self, data: &[u8]) -> Inbound {
        self.parser.push(data);
        let mut inbound = Inbound::default();

        loop {
            let result = self
                .parser
                .next_frame()
                .and_then(|frame| match frame {
                    Some(frame) => self.handle.handle_frame(&frame).map(|reply| Some((frame.command, reply))),
                    None => Ok(None),
                });

            match result {
                Ok(Some((command, reply))) => {
                    debug!(session_id = %self.handle.id, command = %command, "Frame handled");
                    if let Some(reply) = reply {
                        inbound.replies.push(reply.to_text());
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(session_id = %self.handle.id, error = %err, "Discarding frame");
                    inbound.errors.push(err);
                }
            }
        }

        inbound
    }
}

/// # Session Manager
///
/// The set of live sessions, keyed by id.
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    queue_capacity: usize,
    max_frame: usize,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, super::parser::DEFAULT_MAX_FRAME)
    }
}

impl SessionManager {
    /// `queue_capacity` bounds every session's outbound queue; `max_frame`
    /// bounds every inbound frame.
    pub fn new(queue_capacity: usize, max_frame: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
            max_frame,
        }
    }

    /// Registers a new session in `OpenNoHandshake` and returns it together
    /// with the receiving end of its outbound queue. A live session with the
    /// same id is closed and replaced.
    pub fn open(&self, id: impl Into<String>) -> (Session, mpsc::Receiver<String>) {
        let id = id.into();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let handle = Arc::new(SessionHandle {
            id: id.clone(),
            state: RwLock::new(SessionState::OpenNoHandshake),
            outbound: tx,
            cancel: CancellationToken::new(),
        });

        if let Some(previous) = self.sessions.write().insert(id.clone(), handle.clone()) {
            warn!(session_id = %id, "Session id reused, closing the previous session");
            previous.close();
        }
        info!(session_id = %id, "Session opened");

        let session = Session {
            handle,
            parser: FrameParser::with_max_frame(self.max_frame),
        };
        (session, rx)
    }

    /// Closes `handle` and forgets it. A newer session that took over the
    /// same id is left alone.
    pub fn release(&self, handle: &Arc<SessionHandle>) {
        handle.close();
        let mut sessions = self.sessions.write();
        if sessions
            .get(handle.id())
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            sessions.remove(handle.id());
            info!(session_id = %handle.id(), "Session closed");
        }
    }

    /// Looks up a live session.
    pub fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(id).cloned()
    }

    /// The live sessions at this instant. Iterating the returned vector needs
    /// no lock, so sessions may open or close meanwhile.
    pub fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// `true` when nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Closes every session, used on shutdown.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.sessions.write().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.close();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Closed all sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(manager: &SessionManager, id: &str) -> (Session, mpsc::Receiver<String>) {
        let (mut session, rx) = manager.open(id);
        let inbound = session.receive(b"CONNECT\naccept-version:1.1\n\n\0");
        assert!(inbound.errors.is_empty());
        (session, rx)
    }

    #[test]
    fn connect_replies_with_session_id_and_activates() {
        let manager = SessionManager::default();
        let (mut session, _rx) = manager.open("s-1");
        assert_eq!(session.handle().state(), SessionState::OpenNoHandshake);

        let inbound = session.receive(b"CONNECT\n\n\0");
        assert_eq!(inbound.replies, vec!["CONNECTED\nsession:s-1\n\n\0".to_string()]);
        assert_eq!(
            session.handle().state(),
            SessionState::Active {
                subscriptions: HashMap::new()
            }
        );
    }

    #[test]
    fn stomp_alias_also_connects() {
        let manager = SessionManager::default();
        let (mut session, _rx) = manager.open("s-1");
        let inbound = session.receive(b"STOMP\n\n\0");
        assert_eq!(inbound.replies.len(), 1);
        assert!(session.handle().is_active());
    }

    #[test]
    fn subscribe_before_connect_is_rejected_and_session_stays_open() {
        let manager = SessionManager::default();
        let (mut session, _rx) = manager.open("s-1");

        let inbound = session.receive(b"SUBSCRIBE\nid:0\ndestination:/topic/add\n\n\0");
        assert_eq!(inbound.errors, vec![ProtocolError::NotConnected("SUBSCRIBE")]);
        assert_eq!(session.handle().state(), SessionState::OpenNoHandshake);
        assert!(manager.get("s-1").is_some());
    }

    #[test]
    fn subscribe_and_unsubscribe_track_destinations() {
        let manager = SessionManager::default();
        let (mut session, _rx) = connected(&manager, "s-1");

        session.receive(b"SUBSCRIBE\nid:sub-a\ndestination:/topic/add\n\n\0");
        session.receive(b"SUBSCRIBE\nid:sub-r\ndestination:/topic/remove\n\n\0");
        assert_eq!(session.handle().subscription_for("/topic/add").as_deref(), Some("sub-a"));

        let inbound = session.receive(b"UNSUBSCRIBE\ndestination:/topic/add\n\n\0");
        assert!(inbound.errors.is_empty());
        assert!(session.handle().subscription_for("/topic/add").is_none());
        assert_eq!(session.handle().subscription_for("/topic/remove").as_deref(), Some("sub-r"));
    }

    #[test]
    fn unsubscribe_of_absent_topic_is_an_error_and_changes_nothing() {
        let manager = SessionManager::default();
        let (mut session, _rx) = connected(&manager, "s-1");
        session.receive(b"SUBSCRIBE\nid:0\ndestination:/topic/remove\n\n\0");
        let before = session.handle().state();

        let inbound = session.receive(b"UNSUBSCRIBE\ndestination:/topic/add\n\n\0");
        assert_eq!(
            inbound.errors,
            vec![ProtocolError::NotSubscribed("/topic/add".into())]
        );
        assert_eq!(session.handle().state(), before);
    }

    #[test]
    fn unknown_topics_are_rejected_and_change_nothing() {
        let manager = SessionManager::default();
        let (mut session, _rx) = connected(&manager, "s-1");
        session.receive(b"SUBSCRIBE\nid:0\ndestination:/topic/add\n\n\0");
        let before = session.handle().state();

        let inbound = session.receive(
            b"SUBSCRIBE\nid:x\ndestination:/topic/bogus\n\n\0UNSUBSCRIBE\ndestination:/topic/bogus\n\n\0",
        );
        assert_eq!(
            inbound.errors,
            vec![
                ProtocolError::UnknownTopic("/topic/bogus".into()),
                ProtocolError::UnknownTopic("/topic/bogus".into()),
            ]
        );
        assert!(session.handle().subscription_for("/topic/bogus").is_none());
        assert_eq!(session.handle().state(), before);
        assert!(session.handle().is_active());
    }

    #[test]
    fn missing_headers_are_reported() {
        let manager = SessionManager::default();
        let (mut session, _rx) = connected(&manager, "s-1");

        let inbound = session.receive(b"SUBSCRIBE\ndestination:/topic/add\n\n\0");
        assert_eq!(
            inbound.errors,
            vec![ProtocolError::MissingHeader {
                command: "SUBSCRIBE",
                header: "id"
            }]
        );
        assert!(session.handle().subscription_for("/topic/add").is_none());
    }

    #[test]
    fn reconnect_resets_subscriptions() {
        let manager = SessionManager::default();
        let (mut session, _rx) = connected(&manager, "s-1");
        session.receive(b"SUBSCRIBE\nid:0\ndestination:/topic/add\n\n\0");

        session.receive(b"CONNECT\n\n\0");
        assert!(session.handle().subscription_for("/topic/add").is_none());
    }

    #[test]
    fn fragmented_frames_are_applied_once_complete() {
        let manager = SessionManager::default();
        let (mut session, _rx) = connected(&manager, "s-1");

        session.receive(b"SUBSCRIBE\nid:0\ndesti");
        assert!(session.handle().subscription_for("/topic/add").is_none());
        session.receive(b"nation:/topic/add\n\n\0");
        assert_eq!(session.handle().subscription_for("/topic/add").as_deref(), Some("0"));
    }

    #[test]
    fn unsupported_and_server_commands_are_rejected() {
        let manager = SessionManager::default();
        let (mut session, _rx) = connected(&manager, "s-1");

        let inbound = session.receive(b"SEND\ndestination:/x\n\nhi\0MESSAGE\n\n\0");
        assert_eq!(
            inbound.errors,
            vec![
                ProtocolError::UnsupportedCommand("SEND".into()),
                ProtocolError::UnsupportedCommand("MESSAGE".into()),
            ]
        );
        assert!(session.handle().is_active());
    }

    #[test]
    fn close_discards_subscriptions_and_rejects_frames() {
        let manager = SessionManager::default();
        let (mut session, _rx) = connected(&manager, "s-1");
        session.receive(b"SUBSCRIBE\nid:0\ndestination:/topic/add\n\n\0");

        manager.release(session.handle());
        assert_eq!(session.handle().state(), SessionState::Closed);
        assert!(session.handle().cancellation().is_cancelled());
        assert!(session.handle().subscription_for("/topic/add").is_none());
        assert!(manager.is_empty());

        let inbound = session.receive(b"CONNECT\n\n\0");
        assert_eq!(inbound.errors, vec![ProtocolError::SessionClosed]);
    }

    #[test]
    fn reused_id_closes_the_previous_session_only() {
        let manager = SessionManager::default();
        let (first, _rx1) = manager.open("dup");
        let (second, _rx2) = manager.open("dup");

        assert!(first.handle().is_closed());
        manager.release(first.handle());
        assert!(Arc::ptr_eq(&manager.get("dup").unwrap(), second.handle()));
    }

    #[test]
    fn deliver_reports_backpressure_and_closed() {
        let manager = SessionManager::new(1, 1024);
        let (session, mut rx) = manager.open("s-1");

        session.handle().deliver("one".into()).unwrap();
        assert_eq!(
            session.handle().deliver("two".into()),
            Err(DeliveryError::Backpressure)
        );
        assert_eq!(rx.try_recv().unwrap(), "one");

        session.handle().close();
        assert_eq!(
            session.handle().deliver("three".into()),
            Err(DeliveryError::Closed)
        );
    }

    #[test]
    fn close_all_empties_the_manager() {
        let manager = SessionManager::default();
        let (a, _ra) = manager.open("a");
        let (b, _rb) = manager.open("b");
        manager.close_all();

        assert!(manager.is_empty());
        assert!(a.handle().is_closed() && b.handle().is_closed());
    }
}
