//! # STOMP Frames
//!
//! The frame model and the outbound encoder for the STOMP 1.1 subset the
//! relay speaks:
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...\n
//! \n
//! body^@
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use super::error::ProtocolError;

/// Content type of every `MESSAGE` body the relay sends.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Commands the relay knows about, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// STOMP 1.1 alias of `CONNECT`.
    Stomp,
    /// Server handshake reply.
    Connected,
    /// Client subscribes to a destination.
    Subscribe,
    /// Client drops a subscription.
    Unsubscribe,
    /// Server pushes a message.
    Message,
}

impl Command {
    /// Wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
        }
    }

    /// Parses a wire name; anything else is [`ProtocolError::UnsupportedCommand`].
    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        match name {
            "CONNECT" => Ok(Command::Connect),
            "STOMP" => Ok(Command::Stomp),
            "CONNECTED" => Ok(Command::Connected),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "UNSUBSCRIBE" => Ok(Command::Unsubscribe),
            "MESSAGE" => Ok(Command::Message),
            other => Err(ProtocolError::UnsupportedCommand(other.to_string())),
        }
    }

    /// STOMP 1.1 leaves header values of the handshake frames unescaped.
    pub(crate) fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Frame
///
/// One STOMP frame. Headers keep their wire order; when a name repeats, the
/// first occurrence is the one that counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame's command.
    pub command: Command,
    /// Headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Raw body, empty when the frame has none.
    pub body: Bytes,
}

impl Frame {
    /// A frame without headers or body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header called `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Like [`Frame::header`] but a missing header is a protocol error.
    pub fn require(&self, name: &'static str) -> Result<&str, ProtocolError> {
        self.header(name).ok_or(ProtocolError::MissingHeader {
            command: self.command.as_str(),
            header: name,
        })
    }

    /// The handshake reply identifying the session.
    pub fn connected(session_id: &str) -> Self {
        Frame::new(Command::Connected).with_header("session", session_id)
    }

    /// A `MESSAGE` for one receiving session. `subscription` is the id that
    /// session chose when it subscribed; every call gets a fresh `message-id`.
    pub fn message(subscription: &str, json_body: impl Into<Bytes>) -> Self {
        Frame::new(Command::Message)
            .with_header("subscription", subscription)
            .with_header("content-type", JSON_CONTENT_TYPE)
            .with_header("message-id", Uuid::new_v4().to_string())
            .with_body(json_body)
    }

    /// Serializes the frame, NUL terminator included.
    pub fn encode(&self) -> BytesMut {
        let escape = self.command.escapes_headers();
        let mut out = BytesMut::with_capacity(64 + self.body.len());

        out.put_slice(self.command.as_str().as_bytes());
        out.put_u8(b'\n');
        for (name, value) in &self.headers {
            if escape {
                put_escaped(&mut out, name);
                out.put_u8(b':');
                put_escaped(&mut out, value);
            } else {
                out.put_slice(name.as_bytes());
                out.put_u8(b':');
                out.put_slice(value.as_bytes());
            }
            out.put_u8(b'\n');
        }
        out.put_u8(b'\n');
        out.put_slice(&self.body);
        out.put_u8(0);
        out
    }

    /// The encoded frame as text, for text-only transports.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.encode()).into_owned()
    }
}

fn put_escaped(out: &mut BytesMut, raw: &str) {
    for b in raw.bytes() {
        match b {
            b'\\' => out.put_slice(b"\\\\"),
            b'\n' => out.put_slice(b"\\n"),
            b'\r' => out.put_slice(b"\\r"),
            b':' => out.put_slice(b"\\c"),
            other => out.put_u8(other),
        }
    }
}

/// Reverses the STOMP 1.1 header escaping. An unknown escape sequence is a
/// malformed frame.
pub(crate) fn unescape(raw: &str) -> Result<String, ProtocolError> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => {
                return Err(ProtocolError::Malformed(format!(
                    "invalid header escape '\\{}'",
                    other
                )))
            }
            None => return Err(ProtocolError::Malformed("dangling '\\' in header".into())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_carries_session_header() {
        let text = Frame::connected("abc123").to_text();
        assert_eq!(text, "CONNECTED\nsession:abc123\n\n\0");
    }

    #[test]
    fn message_has_required_headers_and_body() {
        let frame = Frame::message("sub-0", r#"{"id":"a1"}"#);
        assert_eq!(frame.header("subscription"), Some("sub-0"));
        assert_eq!(frame.header("content-type"), Some("application/json"));
        assert!(Uuid::parse_str(frame.header("message-id").unwrap()).is_ok());

        let text = frame.to_text();
        assert!(text.starts_with("MESSAGE\n"));
        assert!(text.ends_with("\n\n{\"id\":\"a1\"}\0"));
    }

    #[test]
    fn message_ids_are_fresh() {
        let a = Frame::message("s", "{}");
        let b = Frame::message("s", "{}");
        assert_ne!(a.header("message-id"), b.header("message-id"));
    }

    #[test]
    fn message_headers_are_escaped() {
        let text = Frame::message("odd:id\n", "{}").to_text();
        assert!(text.contains("subscription:odd\\cid\\n\n"));
    }

    #[test]
    fn unescape_reverses_escaping() {
        assert_eq!(unescape(r"a\cb\\c\nd").unwrap(), "a:b\\c\nd");
        assert!(matches!(unescape(r"bad\t"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(unescape("tail\\"), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn require_reports_missing_header() {
        let frame = Frame::new(Command::Subscribe).with_header("destination", "/topic/add");
        assert_eq!(
            frame.require("id").unwrap_err(),
            ProtocolError::MissingHeader {
                command: "SUBSCRIBE",
                header: "id"
            }
        );
    }

    #[test]
    fn first_repeated_header_wins() {
        let frame = Frame::new(Command::Subscribe)
            .with_header("id", "first")
            .with_header("id", "second");
        assert_eq!(frame.header("id"), Some("first"));
    }

    #[test]
    fn unknown_command_is_unsupported() {
        assert_eq!(
            Command::parse("SEND").unwrap_err(),
            ProtocolError::UnsupportedCommand("SEND".into())
        );
        assert_eq!(Command::parse("STOMP").unwrap(), Command::Stomp);
    }
}
