//! The datastore capability the service persists through.
//!
//! The trait is a narrow contract: implementations are expected to be
//! internally thread-safe and to serialize concurrent writers. [`crate::store::SqliteDataStore`] is the in-tree
//! implementation.

use async_trait::async_trait;
use tessera_core::{AttestedNode, JoinToken, MatchBehavior, RegistrationEntry, Selector};

/// Errors surfaced by datastore operations. `NotFound` is load-bearing:
/// handlers map it to a NotFound status rather than an Internal one.
#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    #[error("record not found")]
    NotFound,

    #[error("{0}")]
    Internal(String),
}

/// Selector filter applied while listing attested nodes.
#[derive(Debug, Clone)]
pub struct SelectorMatchFilter {
    pub behavior: MatchBehavior,
    pub selectors: Vec<Selector>,
}

/// Filters and pagination for [`DataStore::list_attested_nodes`].
#[derive(Debug, Clone, Default)]
pub struct ListAttestedNodesRequest {
    pub by_attestation_type: Option<String>,
    pub by_banned: Option<bool>,
    pub by_selector_match: Option<SelectorMatchFilter>,
    /// Zero means no pagination.
    pub page_size: u32,
    /// Opaque token from a previous response.
    pub page_token: Option<String>,
}

/// One page of attested nodes, each with its current selector set.
#[derive(Debug, Clone, Default)]
pub struct ListAttestedNodesResponse {
    pub nodes: Vec<(AttestedNode, Vec<Selector>)>,
    pub next_page_token: Option<String>,
}

/// A partial update of an attested-node record. `None` fields are left
/// untouched; the update fails with `NotFound` when the record is absent.
#[derive(Debug, Clone, Default)]
pub struct AttestedNodeUpdate {
    pub spiffe_id: String,
    pub cert_serial_number: Option<String>,
    pub cert_not_after: Option<i64>,
    pub new_cert_serial_number: Option<String>,
    pub new_cert_not_after: Option<i64>,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn count_attested_nodes(&self) -> Result<i32, DatastoreError>;

    async fn list_attested_nodes(
        &self,
        request: &ListAttestedNodesRequest,
    ) -> Result<ListAttestedNodesResponse, DatastoreError>;

    async fn fetch_attested_node(
        &self,
        spiffe_id: &str,
    ) -> Result<Option<AttestedNode>, DatastoreError>;

    async fn create_attested_node(&self, node: AttestedNode)
        -> Result<AttestedNode, DatastoreError>;

    async fn update_attested_node(
        &self,
        update: AttestedNodeUpdate,
    ) -> Result<AttestedNode, DatastoreError>;

    async fn delete_attested_node(&self, spiffe_id: &str)
        -> Result<AttestedNode, DatastoreError>;

    /// Replace the node's selector set atomically. No partial updates.
    async fn set_node_selectors(
        &self,
        spiffe_id: &str,
        selectors: Vec<Selector>,
    ) -> Result<(), DatastoreError>;

    async fn get_node_selectors(&self, spiffe_id: &str) -> Result<Vec<Selector>, DatastoreError>;

    async fn create_join_token(&self, token: JoinToken) -> Result<(), DatastoreError>;

    async fn fetch_join_token(&self, token: &str) -> Result<Option<JoinToken>, DatastoreError>;

    /// Delete a join token. This is the linearization point that enforces
    /// single use: exactly one concurrent caller observes success, the rest
    /// get `NotFound`.
    async fn delete_join_token(&self, token: &str) -> Result<(), DatastoreError>;

    async fn create_registration_entry(
        &self,
        entry: RegistrationEntry,
    ) -> Result<(), DatastoreError>;

    async fn list_registration_entries(&self) -> Result<Vec<RegistrationEntry>, DatastoreError>;
}
