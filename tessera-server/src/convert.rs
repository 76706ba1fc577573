//! Conversions between internal records and the external agent view.

use tessera_core::{AttestedNode, IdError, Selector, SpiffeId};
use tessera_proto as proto;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConvertError {
    #[error("node has malformed SPIFFE ID: {0}")]
    MalformedId(#[from] IdError),
}

pub(crate) fn proto_from_id(id: &SpiffeId) -> proto::SpiffeId {
    proto::SpiffeId {
        trust_domain: id.trust_domain().as_str().to_string(),
        path: id.path().to_string(),
    }
}

pub(crate) fn selectors_to_proto(selectors: &[Selector]) -> Vec<proto::Selector> {
    selectors
        .iter()
        .map(|s| proto::Selector {
            r#type: s.r#type.clone(),
            value: s.value.clone(),
        })
        .collect()
}

/// Project an attested-node record plus its selectors into the external
/// agent view.
pub(crate) fn attested_node_to_agent(
    node: &AttestedNode,
    selectors: &[Selector],
) -> Result<proto::Agent, ConvertError> {
    let id = SpiffeId::parse(&node.spiffe_id)?;
    Ok(proto::Agent {
        id: Some(proto_from_id(&id)),
        attestation_type: node.attestation_type.clone(),
        x509svid_serial_number: node.cert_serial_number.clone(),
        x509svid_expires_at: node.cert_not_after,
        selectors: selectors_to_proto(selectors),
        banned: node.is_banned(),
    })
}

/// Apply an output mask. An omitted mask keeps every field; an explicit
/// all-false mask leaves only the ID.
pub(crate) fn apply_agent_mask(agent: &mut proto::Agent, mask: Option<&proto::AgentMask>) {
    let Some(mask) = mask else {
        return;
    };
    if !mask.attestation_type {
        agent.attestation_type.clear();
    }
    if !mask.x509svid_serial_number {
        agent.x509svid_serial_number.clear();
    }
    if !mask.x509svid_expires_at {
        agent.x509svid_expires_at = 0;
    }
    if !mask.selectors {
        agent.selectors.clear();
    }
    if !mask.banned {
        agent.banned = false;
    }
}
