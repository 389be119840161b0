//! Errors of the messaging layer.
//!
//! Neither kind is ever fatal: a [`ProtocolError`] discards one inbound frame,
//! a [`DeliveryError`] concerns one session only.

/// A problem with one inbound frame (or SockJS envelope).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The bytes do not form a STOMP frame.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// A frame grew past the configured limit before its terminator arrived.
    #[error("frame exceeds the limit of {limit} bytes")]
    FrameTooLarge {
        /// Configured maximum frame size in bytes.
        limit: usize,
    },
    /// A required header is absent.
    #[error("{command} frame is missing the '{header}' header")]
    MissingHeader {
        /// Command of the offending frame.
        command: &'static str,
        /// Name of the missing header.
        header: &'static str,
    },
    /// `SUBSCRIBE`/`UNSUBSCRIBE` naming a destination other than the relay's
    /// two topics.
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
    /// `UNSUBSCRIBE` for a destination the session is not subscribed to.
    #[error("not subscribed to '{0}'")]
    NotSubscribed(String),
    /// A frame other than `CONNECT` arrived before the handshake.
    #[error("{0} received before CONNECT")]
    NotConnected(&'static str),
    /// A command this relay does not accept from clients.
    #[error("unsupported command '{0}'")]
    UnsupportedCommand(String),
    /// A frame arrived after the session was closed.
    #[error("session is closed")]
    SessionClosed,
    /// A SockJS transport message that is not a JSON string or string array.
    #[error("bad SockJS envelope: {0}")]
    BadEnvelope(String),
}

/// Why a message could not be queued for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The session is closed or its transport task is gone.
    #[error("session is closed")]
    Closed,
    /// The session's outbound queue is full; the client is not keeping up.
    #[error("outbound queue is full")]
    Backpressure,
}
