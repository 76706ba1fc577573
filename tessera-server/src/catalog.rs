//! Plugin capability contracts: node attestors, node resolvers, and the
//! catalog that looks them up by type tag.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tessera_core::{Selector, SpiffeId};
use tonic::Status;

/// Type tag of the built-in join-token attestor. It is dispatched directly
/// by the attestation orchestrator and never resolved through the catalog.
pub const JOIN_TOKEN_ATTESTATION_TYPE: &str = "join_token";

/// Terminal outcome of a successful attestation exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationResult {
    pub spiffe_id: SpiffeId,
    pub selectors: Vec<Selector>,
}

/// The channel an attestor uses to run challenge rounds against the agent
/// on the other end of the stream.
#[async_trait]
pub trait ChallengeTransport: Send {
    /// Send a challenge to the agent and await its response.
    async fn challenge(&mut self, challenge: Vec<u8>) -> Result<Vec<u8>, Status>;
}

/// Validates evidence from a prospective agent, producing its identity and
/// initial selectors after zero or more challenge rounds.
#[async_trait]
pub trait NodeAttestor: Send + Sync {
    async fn attest(
        &self,
        payload: Vec<u8>,
        transport: &mut dyn ChallengeTransport,
    ) -> Result<AttestationResult, Status>;
}

/// Adds selectors to an already-attested agent based on its identity.
#[async_trait]
pub trait NodeResolver: Send + Sync {
    async fn resolve(&self, agent_id: &SpiffeId) -> Result<Vec<Selector>, Status>;
}

/// Looks up attestors and resolvers by attestation type.
pub trait Catalog: Send + Sync {
    fn node_attestor(&self, attestation_type: &str) -> Option<Arc<dyn NodeAttestor>>;
    fn node_resolver(&self, attestation_type: &str) -> Option<Arc<dyn NodeResolver>>;
}

/// A catalog assembled at startup from a fixed plugin set.
#[derive(Default)]
pub struct StaticCatalog {
    attestors: HashMap<String, Arc<dyn NodeAttestor>>,
    resolvers: HashMap<String, Arc<dyn NodeResolver>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_node_attestor(
        &mut self,
        attestation_type: impl Into<String>,
        attestor: Arc<dyn NodeAttestor>,
    ) {
        self.attestors.insert(attestation_type.into(), attestor);
    }

    pub fn set_node_resolver(
        &mut self,
        attestation_type: impl Into<String>,
        resolver: Arc<dyn NodeResolver>,
    ) {
        self.resolvers.insert(attestation_type.into(), resolver);
    }
}

impl Catalog for StaticCatalog {
    fn node_attestor(&self, attestation_type: &str) -> Option<Arc<dyn NodeAttestor>> {
        self.attestors.get(attestation_type).cloned()
    }

    fn node_resolver(&self, attestation_type: &str) -> Option<Arc<dyn NodeResolver>> {
        self.resolvers.get(attestation_type).cloned()
    }
}
