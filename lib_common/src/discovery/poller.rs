//! # Discovery Loop
//!
//! A self-scheduling poller that keeps the [`Registry`] in step with the
//! backends that actually answer.
//!
//! ## One cycle
//! 1. Read the address list from the [`BackendSource`]. If that fails the
//!    cycle is abandoned and the current registry stays as it is.
//! 2. Resolve every address concurrently. One backend failing (or hanging
//!    until the client timeout) has no effect on the others.
//! 3. Build the complete new snapshot from the id-bearing descriptors.
//! 4. Diff it against the current snapshot (the result of the previous
//!    completed cycle).
//! 5. Swap the registry.
//! 6. Publish `removed` events, then `added` events.
//!
//! Steps 3 to 6 contain no await point, so cancelling the loop can never
//! leave a half-applied cycle behind.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::differ::{diff, RegistryDiff};
use super::events::{EventSink, RegistryEvent};
use super::registry::{Registry, RegistrySnapshot};
use super::resolver::{Resolve, ResolveError};
use super::source::BackendSource;
use super::DiscoveryError;

/// Period between two discovery cycles unless configured otherwise.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// Outcome of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Addresses that produced a descriptor.
    pub resolved: usize,
    /// Addresses that did not (unreachable, malformed, no id, ...).
    pub failed: usize,
    /// Membership changes published this cycle.
    pub diff: RegistryDiff,
}

/// # Discovery Loop
///
/// Owns the write side of the registry. Everything it depends on is behind a
/// trait object so tests can drive cycles without a network.
pub struct DiscoveryLoop {
    source: Arc<dyn BackendSource>,
    resolver: Arc<dyn Resolve>,
    registry: Registry,
    sink: Arc<dyn EventSink>,
    interval: Duration,
}

impl DiscoveryLoop {
    /// Wires a loop together. `registry` is usually a clone of the handle
    /// the HTTP layer reads from.
    pub fn new(
        source: Arc<dyn BackendSource>,
        resolver: Arc<dyn Resolve>,
        registry: Registry,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            source,
            resolver,
            registry,
            sink,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Overrides the period between cycles.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The configured period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs cycles until `shutdown` is cancelled. Cancellation is honoured
    /// while waiting between cycles and while backends are being resolved;
    /// in both cases the registry is left exactly as the last completed
    /// cycle published it.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Discovery loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.run_cycle() => match result {
                    Ok(report) => debug!(
                        resolved = report.resolved,
                        failed = report.failed,
                        added = report.diff.added.len(),
                        removed = report.diff.removed.len(),
                        "Discovery cycle complete"
                    ),
                    Err(e) => error!(
                        error = %e,
                        retry_secs = self.interval.as_secs(),
                        "Could not query backends, keeping current registry"
                    ),
                },
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Discovery loop stopped");
    }

    /// Runs a single cycle. Fails only when the address list itself cannot
    /// be read; individual backend failures are logged and counted.
    pub async fn run_cycle(&self) -> Result<CycleReport, DiscoveryError> {
        let addresses = self.source.addresses()?;

        let outcomes = join_all(addresses.iter().map(|address| async move {
            (address, self.resolver.resolve(address).await)
        }))
        .await;

        let mut descriptors = Vec::with_capacity(outcomes.len());
        let mut failed = 0;
        for (address, outcome) in outcomes {
            match outcome {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(source) => {
                    failed += 1;
                    log_resolve_failure(DiscoveryError::Resolve {
                        address: address.clone(),
                        source,
                    });
                }
            }
        }
        let resolved = descriptors.len();
        warn_duplicate_ids(&descriptors);

        let next: RegistrySnapshot = descriptors.into_iter().collect();
        let previous = self.registry.snapshot();
        let changes = diff(&previous, &next);

        let removed: Vec<RegistryEvent> = changes
            .removed
            .iter()
            .filter_map(|id| previous.get(id).cloned().map(RegistryEvent::Removed))
            .collect();
        let added: Vec<RegistryEvent> = changes
            .added
            .iter()
            .filter_map(|id| next.get(id).cloned().map(RegistryEvent::Added))
            .collect();

        self.registry.replace(next);

        for event in removed.iter().chain(added.iter()) {
            info!(
                id = %event.descriptor().id,
                name = %event.descriptor().name,
                topic = event.topic(),
                "Backend membership changed"
            );
            self.sink.publish(event);
        }

        Ok(CycleReport {
            resolved,
            failed,
            diff: changes,
        })
    }
}

fn log_resolve_failure(err: DiscoveryError) {
    let DiscoveryError::Resolve { address, source } = &err else {
        return;
    };
    match source {
        ResolveError::MissingId => {
            debug!(address = %address, "Backend reports no id, excluded from registry")
        }
        e if e.is_unreachable() => debug!(address = %address, error = %e, "Backend not available"),
        e => warn!(address = %address, error = %e, "Backend resolution failed"),
    }
}

fn warn_duplicate_ids(descriptors: &[super::descriptor::BackendDescriptor]) {
    for (i, d) in descriptors.iter().enumerate() {
        if let Some(later) = descriptors[i + 1..].iter().find(|o| o.id == d.id) {
            warn!(
                id = %d.id,
                shadowed = %d.name,
                kept = %later.name,
                "Two backends report the same id, keeping the later one"
            );
        }
    }
}
