//! # lib_common
//!
//! Shared library behind the `server_backends` relay. It discovers which
//! backend data services are reachable, keeps an atomically swapped registry
//! of them, and pushes `add`/`remove` notifications to connected UI clients
//! over STOMP frames carried on WebSocket or SockJS sessions.
//!
//! Modules are gated by folder-level features (`discovery`, `messaging`,
//! `retrieve`, `web`); `full` enables them all and is on by default.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// HTTP client used to talk to backend services.
#[cfg(feature = "retrieve")]
pub mod retrieve;

/// Backend discovery: resolver, registry snapshot, differ and polling loop.
#[cfg(feature = "discovery")]
pub mod discovery;

/// STOMP framing, per-connection sessions and selective broadcast.
#[cfg(feature = "messaging")]
pub mod messaging;

/// Axum router exposing the REST endpoints and the client transport.
#[cfg(feature = "web")]
pub mod web;
