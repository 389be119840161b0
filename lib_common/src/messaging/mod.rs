//! # Messaging
//!
//! The minimal STOMP layer between the relay and its clients. Clients may
//! only `CONNECT`, `SUBSCRIBE` and `UNSUBSCRIBE`; the relay only answers
//! `CONNECTED` and pushes `MESSAGE` frames on `/topic/add` and
//! `/topic/remove`. There is no client-to-client messaging.

pub mod broadcast;
pub mod error;
pub mod frame;
pub mod parser;
pub mod session;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use error::{DeliveryError, ProtocolError};
pub use frame::{Command, Frame};
pub use parser::{FrameParser, DEFAULT_MAX_FRAME};
pub use session::{Inbound, Session, SessionHandle, SessionManager, SessionState, DEFAULT_QUEUE_CAPACITY};
