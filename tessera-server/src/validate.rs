//! Request validators for identifiers and selector shapes.

use tessera_core::{IdError, Selector, SpiffeId, TrustDomain};
use tessera_proto as proto;

/// Ways an agent ID in a request can be rejected. The Display strings are
/// stable; they surface verbatim inside `invalid agent ID: ...` statuses.
#[derive(Debug, thiserror::Error)]
pub(crate) enum AgentIdError {
    #[error("request must specify SPIFFE ID")]
    Missing,

    #[error(transparent)]
    Parse(#[from] IdError),

    #[error("\"{id}\" is not a member of trust domain \"{trust_domain}\"")]
    NotMember { id: String, trust_domain: String },

    #[error("\"{id}\" is not an agent in trust domain \"{trust_domain}\"; path is empty")]
    PathEmpty { id: String, trust_domain: String },

    #[error("\"{id}\" is not an agent in trust domain \"{trust_domain}\"; path is not in the agent namespace")]
    NotInAgentNamespace { id: String, trust_domain: String },
}

/// Validate a wire ID as an agent of the server's trust domain: member of
/// the trust domain, non-empty path, path inside `/spire/agent/`.
pub(crate) fn agent_id_from_proto(
    trust_domain: &TrustDomain,
    id: Option<&proto::SpiffeId>,
) -> Result<SpiffeId, AgentIdError> {
    let id = member_id_from_proto(trust_domain, id)?;
    if id.path().is_empty() {
        return Err(AgentIdError::PathEmpty {
            id: id.to_string(),
            trust_domain: trust_domain.to_string(),
        });
    }
    if !id.is_agent() {
        return Err(AgentIdError::NotInAgentNamespace {
            id: id.to_string(),
            trust_domain: trust_domain.to_string(),
        });
    }
    Ok(id)
}

/// Validate a wire ID as a member of the server's trust domain. Used where
/// the agent namespace is not required, e.g. the workload identity bound to
/// a join token.
pub(crate) fn member_id_from_proto(
    trust_domain: &TrustDomain,
    id: Option<&proto::SpiffeId>,
) -> Result<SpiffeId, AgentIdError> {
    let id = id.ok_or(AgentIdError::Missing)?;
    let id = SpiffeId::from_parts(&id.trust_domain, &id.path)?;
    if !id.is_member_of(trust_domain) {
        return Err(AgentIdError::NotMember {
            id: id.to_string(),
            trust_domain: trust_domain.to_string(),
        });
    }
    Ok(id)
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum SelectorParseError {
    #[error("missing selector type")]
    MissingType,
}

/// Parse a selector filter. The filter must be non-empty and every entry
/// must carry a type.
pub(crate) fn selectors_from_proto(
    selectors: &[proto::Selector],
) -> Result<Vec<Selector>, SelectorParseError> {
    if selectors.is_empty() {
        return Err(SelectorParseError::MissingType);
    }
    selectors
        .iter()
        .map(|s| {
            if s.r#type.is_empty() {
                Err(SelectorParseError::MissingType)
            } else {
                Ok(Selector::new(s.r#type.clone(), s.value.clone()))
            }
        })
        .collect()
}
