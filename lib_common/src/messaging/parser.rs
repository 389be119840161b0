//! # Incremental STOMP Parser
//!
//! Transports hand over data in whatever pieces they received it; the parser
//! buffers those pieces and yields frames as they complete.
//!
//! - `Ok(Some(frame))`: one complete frame, removed from the buffer.
//! - `Ok(None)`: no complete frame yet, push more data.
//! - `Err(_)`: the frame at the head of the buffer was bad and has been
//!   dropped. Parsing resumes after the next NUL, so one bad frame never
//!   poisons the ones behind it.
//!
//! Heart-beat EOLs between frames are skipped, `\r\n` line endings are
//! accepted, and `content-length` is honoured (the body may then contain
//! NUL bytes).

use bytes::{Buf, Bytes, BytesMut};

use super::error::ProtocolError;
use super::frame::{unescape, Command, Frame};

/// Upper bound on one buffered frame unless configured otherwise.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

enum Scan {
    Incomplete,
    Complete {
        len: usize,
        result: Result<Frame, ProtocolError>,
    },
    Invalid(ProtocolError),
    /// Bad frame whose first `skip` bytes are known to belong to it, so the
    /// resync must not look for a NUL inside them.
    Overrun {
        skip: usize,
        err: ProtocolError,
    },
}

/// # Frame Parser
///
/// One per session. Not shared, so no locking.
#[derive(Debug)]
pub struct FrameParser {
    buf: BytesMut,
    max_frame: usize,
    discarding: bool,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// A parser with the default frame size limit.
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    /// A parser rejecting frames longer than `max_frame` bytes.
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame,
            discarding: false,
        }
    }

    /// Appends received data.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Takes the next complete frame off the buffer, if there is one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.discarding && !self.discard_to_nul() {
            return Ok(None);
        }
        self.skip_heartbeats();
        if self.buf.is_empty() {
            return Ok(None);
        }

        match self.scan() {
            Scan::Incomplete if self.buf.len() > self.max_frame => {
                self.discarding = true;
                self.discard_to_nul();
                Err(ProtocolError::FrameTooLarge {
                    limit: self.max_frame,
                })
            }
            Scan::Incomplete => Ok(None),
            Scan::Complete { len, result } => {
                self.buf.advance(len);
                if len > self.max_frame {
                    return Err(ProtocolError::FrameTooLarge {
                        limit: self.max_frame,
                    });
                }
                result.map(Some)
            }
            Scan::Invalid(err) => {
                self.discarding = true;
                self.discard_to_nul();
                Err(err)
            }
            Scan::Overrun { skip, err } => {
                self.buf.advance(skip);
                self.discarding = true;
                self.discard_to_nul();
                Err(err)
            }
        }
    }

    fn skip_heartbeats(&mut self) {
        loop {
            if self.buf.starts_with(b"\n") {
                self.buf.advance(1);
            } else if self.buf.starts_with(b"\r\n") {
                self.buf.advance(2);
            } else {
                break;
            }
        }
    }

    /// Drops everything up to and including the next NUL. Returns `false`
    /// when no NUL is buffered yet (the buffer is then emptied and discarding
    /// continues with the next push).
    fn discard_to_nul(&mut self) -> bool {
        match self.buf.iter().position(|&b| b == 0) {
            Some(nul) => {
                self.buf.advance(nul + 1);
                self.discarding = false;
                true
            }
            None => {
                self.buf.clear();
                false
            }
        }
    }

    fn scan(&self) -> Scan {
        let buf = &self.buf[..];

        // --- Command and header lines, up to the blank line ---
        let mut pos = 0;
        let mut lines: Vec<&[u8]> = Vec::new();
        loop {
            let Some(nl) = buf[pos..].iter().position(|&b| b == b'\n') else {
                if buf[pos..].contains(&0) {
                    return Scan::Invalid(ProtocolError::Malformed(
                        "frame ended inside its headers".into(),
                    ));
                }
                return Scan::Incomplete;
            };
            let mut line = &buf[pos..pos + nl];
            pos += nl + 1;
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if line.contains(&0) {
                return Scan::Invalid(ProtocolError::Malformed(
                    "frame ended inside its headers".into(),
                ));
            }
            if line.is_empty() {
                break;
            }
            lines.push(line);
        }

        let Some((command_line, header_lines)) = lines.split_first() else {
            return Scan::Invalid(ProtocolError::Malformed("missing command".into()));
        };
        let name = match std::str::from_utf8(command_line) {
            Ok(name) => name,
            Err(_) => return Scan::Invalid(ProtocolError::Malformed("command is not UTF-8".into())),
        };
        let escape = Command::parse(name).map_or(true, |c| c.escapes_headers());
        let headers = match parse_headers(header_lines, escape) {
            Ok(headers) => headers,
            Err(err) => return Scan::Invalid(err),
        };

        // --- Body, by content-length or up to the NUL ---
        let body_start = pos;
        let content_length = match headers.iter().find(|(k, _)| k == "content-length") {
            Some((_, value)) => match value.trim().parse::<usize>() {
                Ok(n) => Some(n),
                Err(_) => {
                    return Scan::Invalid(ProtocolError::Malformed(format!(
                        "invalid content-length '{}'",
                        value
                    )))
                }
            },
            None => None,
        };

        let body_end = match content_length {
            Some(n) if n > self.max_frame => {
                return Scan::Invalid(ProtocolError::FrameTooLarge {
                    limit: self.max_frame,
                })
            }
            Some(n) => {
                if buf.len() <= body_start + n {
                    return Scan::Incomplete;
                }
                if buf[body_start + n] != 0 {
                    return Scan::Overrun {
                        skip: body_start + n,
                        err: ProtocolError::Malformed("body does not end at content-length".into()),
                    };
                }
                body_start + n
            }
            None => match buf[body_start..].iter().position(|&b| b == 0) {
                Some(i) => body_start + i,
                None => return Scan::Incomplete,
            },
        };

        let body = Bytes::copy_from_slice(&buf[body_start..body_end]);
        let result = Command::parse(name).map(|command| Frame {
            command,
            headers,
            body,
        });
        Scan::Complete {
            len: body_end + 1,
            result,
        }
    }
}

fn parse_headers(lines: &[&[u8]], escape: bool) -> Result<Vec<(String, String)>, ProtocolError> {
    lines
        .iter()
        .map(|line| {
            let line = std::str::from_utf8(line)
                .map_err(|_| ProtocolError::Malformed("header is not UTF-8".into()))?;
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::Malformed(format!("header without ':' in '{}'", line)))?;
            if escape {
                Ok((unescape(name)?, unescape(value)?))
            } else {
                Ok((name.to_string(), value.to_string()))
            }
        })
        .collect()
}
