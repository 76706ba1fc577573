//! Records describing attested nodes, join tokens, and registration entries.

use serde::{Deserialize, Serialize};

use crate::selector::Selector;

/// The internal record of a node admitted into the trust domain.
///
/// Keyed by the canonical SPIFFE ID string. The `new_*` pair holds a rotation
/// pending agent-side confirmation; promotion of new→current happens on a
/// later round trip and is not the server's concern.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttestedNode {
    pub spiffe_id: String,
    /// Type tag of the node attestor that admitted this node.
    pub attestation_type: String,
    pub cert_serial_number: String,
    /// Expiry of the current SVID, Unix seconds.
    pub cert_not_after: i64,
    pub new_cert_serial_number: String,
    pub new_cert_not_after: i64,
}

impl AttestedNode {
    /// A node is banned iff its record exists with an empty current serial.
    pub fn is_banned(&self) -> bool {
        self.cert_serial_number.is_empty()
    }
}

/// A single-use admission credential for the built-in `join_token` attestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinToken {
    pub token: String,
    /// Expiry, Unix seconds.
    pub expires_at: i64,
}

/// A workload registration entry. Only the slice needed by join-token
/// issuance is modeled; full entry management lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationEntry {
    pub spiffe_id: String,
    pub parent_id: String,
    pub selectors: Vec<Selector>,
}
