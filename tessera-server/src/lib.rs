//! The agent lifecycle service of the tessera control plane.
//!
//! Admits nodes into the trust domain through multi-round attestation,
//! issues and renews their X.509 SVIDs, and manages their operational
//! status. Transport wiring is out of scope: the service surface is
//! [`service::AgentService`]'s methods, which speak `tonic` request and
//! status types and, for attestation, a bidirectional message stream.

mod attest;
mod audit;
mod convert;
mod validate;

pub mod catalog;
pub mod datastore;
pub mod ratelimit;
pub mod service;
pub mod store;

pub use attest::AttestAgentStream;
pub use catalog::{
    AttestationResult, Catalog, ChallengeTransport, NodeAttestor, NodeResolver, StaticCatalog,
    JOIN_TOKEN_ATTESTATION_TYPE,
};
pub use datastore::{
    AttestedNodeUpdate, DataStore, DatastoreError, ListAttestedNodesRequest,
    ListAttestedNodesResponse, SelectorMatchFilter,
};
pub use ratelimit::{GovernorRateLimiter, RateLimiter};
pub use service::{AgentService, CallerId, Config};
pub use store::SqliteDataStore;
