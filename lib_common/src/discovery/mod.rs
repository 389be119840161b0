//! # Backend Discovery
//!
//! Periodic discovery of the backends a relay fronts.
//!
//! - [`source`]: where the configured `host:port` list comes from.
//! - [`resolver`]: one `/ws/info/` request per address.
//! - [`registry`]: the atomically swapped `id → descriptor` snapshot.
//! - [`differ`]: membership diff between two snapshots.
//! - [`events`]: `add`/`remove` events and the sink they go to.
//! - [`poller`]: the loop tying all of the above together.

pub mod descriptor;
pub mod differ;
pub mod events;
pub mod poller;
pub mod registry;
pub mod resolver;
pub mod source;

pub use descriptor::{BackendDescriptor, BackendInfo, InfoError};
pub use differ::{diff, RegistryDiff};
pub use events::{EventSink, RegistryEvent, TOPIC_ADD, TOPIC_REMOVE};
pub use poller::{CycleReport, DiscoveryLoop, DEFAULT_INTERVAL};
pub use registry::{Registry, RegistrySnapshot, UnknownServiceError};
pub use resolver::{HttpResolver, Resolve, ResolveError, DISCOVERY_PATH};
pub use source::{
    parse_address_list, BackendSource, EnvBackendSource, FileBackendSource, StaticBackendSource,
};

/// Failures of the discovery machinery itself.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The configured address list could not be obtained. The cycle is
    /// skipped and the registry left as it is.
    #[error("could not read backend address list: {0}")]
    AddressList(String),
    /// One backend could not be resolved.
    #[error("backend '{address}': {source}")]
    Resolve {
        /// The configured address.
        address: String,
        /// What went wrong.
        #[source]
        source: ResolveError,
    },
}
