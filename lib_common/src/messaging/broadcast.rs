//! # Broadcast Engine
//!
//! Fans one topic payload out to every session subscribed to that topic.
//!
//! - **Selective**: a session receives a `MESSAGE` only if it is `Active` and
//!   has a subscription for the topic; its own subscription id goes into the
//!   frame.
//! - **Non-blocking**: delivery is a `try_send` onto the session's bounded
//!   queue. A session whose queue is full is closed (its transport task is
//!   cancelled) and the fan-out carries on with the rest.
//! - **Snapshot iteration**: the live set is cloned up front, sessions
//!   closing concurrently are just skipped.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::DeliveryError;
use super::frame::Frame;
use super::session::SessionManager;
use crate::discovery::events::{EventSink, RegistryEvent};

/// Counters of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions a frame was queued for.
    pub delivered: usize,
    /// Sessions not subscribed to the topic, not yet connected, or closed.
    pub skipped: usize,
    /// Sessions that were subscribed but could not take the frame.
    pub failed: usize,
}

/// # Broadcaster
///
/// Reads the session set, never mutates a session's subscriptions.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sessions: Arc<SessionManager>,
}

impl Broadcaster {
    /// A broadcaster over `sessions`.
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Sends `payload` as a `MESSAGE` to every session subscribed to `topic`.
    pub fn broadcast(&self, topic: &str, payload: &Value) -> BroadcastReport {
        let body = Bytes::from(payload.to_string());
        let mut report = BroadcastReport::default();

        for handle in self.sessions.snapshot() {
            let Some(subscription) = handle.subscription_for(topic) else {
                report.skipped += 1;
                continue;
            };

            let text = Frame::message(&subscription, body.clone()).to_text();
            match handle.deliver(text) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Backpressure) => {
                    warn!(
                        session_id = %handle.id(),
                        topic = topic,
                        "Outbound queue full, closing session"
                    );
                    self.sessions.release(&handle);
                    report.failed += 1;
                }
                Err(DeliveryError::Closed) => {
                    debug!(session_id = %handle.id(), topic = topic, "Session closed during broadcast");
                    report.skipped += 1;
                }
            }
        }

        report
    }
}

impl EventSink for Broadcaster {
    fn publish(&self, event: &RegistryEvent) {
        let report = self.broadcast(event.topic(), &event.payload());
        debug!(
            topic = event.topic(),
            id = %event.descriptor().id,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "Registry event broadcast"
        );
    }
}
