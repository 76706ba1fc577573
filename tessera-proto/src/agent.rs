//! Request and response messages for the eight agent lifecycle RPCs.

use crate::types::{AgentMask, AttestationData, SelectorMatch, SpiffeId, X509Svid};

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct CountAgentsRequest {}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct CountAgentsResponse {
    #[prost(int32, tag = "1")]
    pub count: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListAgentsRequest {
    #[prost(message, optional, tag = "1")]
    pub filter: ::core::option::Option<list_agents_request::Filter>,
    #[prost(message, optional, tag = "2")]
    pub output_mask: ::core::option::Option<AgentMask>,
    #[prost(int32, tag = "3")]
    pub page_size: i32,
    #[prost(string, tag = "4")]
    pub page_token: ::prost::alloc::string::String,
}

pub mod list_agents_request {
    use super::SelectorMatch;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Filter {
        #[prost(string, tag = "1")]
        pub by_attestation_type: ::prost::alloc::string::String,
        #[prost(bool, optional, tag = "2")]
        pub by_banned: ::core::option::Option<bool>,
        #[prost(message, optional, tag = "3")]
        pub by_selector_match: ::core::option::Option<SelectorMatch>,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListAgentsResponse {
    #[prost(message, repeated, tag = "1")]
    pub agents: ::prost::alloc::vec::Vec<crate::types::Agent>,
    #[prost(string, tag = "2")]
    pub next_page_token: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAgentRequest {
    #[prost(message, optional, tag = "1")]
    pub id: ::core::option::Option<SpiffeId>,
    #[prost(message, optional, tag = "2")]
    pub output_mask: ::core::option::Option<AgentMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BanAgentRequest {
    #[prost(message, optional, tag = "1")]
    pub id: ::core::option::Option<SpiffeId>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct BanAgentResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteAgentRequest {
    #[prost(message, optional, tag = "1")]
    pub id: ::core::option::Option<SpiffeId>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct DeleteAgentResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateJoinTokenRequest {
    /// Token lifetime in seconds; must be strictly positive.
    #[prost(int32, tag = "1")]
    pub ttl: i32,
    /// Caller-supplied token value; generated when empty.
    #[prost(string, tag = "2")]
    pub token: ::prost::alloc::string::String,
    /// Workload identity to bind to the token via a registration entry.
    #[prost(message, optional, tag = "3")]
    pub agent_id: ::core::option::Option<SpiffeId>,
}

/// Parameters for an X509-SVID request carried by attest and renew calls.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct AgentX509SvidParams {
    #[prost(bytes = "vec", tag = "1")]
    pub csr: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct RenewAgentRequest {
    #[prost(message, optional, tag = "1")]
    pub params: ::core::option::Option<AgentX509SvidParams>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenewAgentResponse {
    #[prost(message, optional, tag = "1")]
    pub svid: ::core::option::Option<X509Svid>,
}

/// One client message on the attestation stream: the opening parameters or
/// an answer to a server challenge.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttestAgentRequest {
    #[prost(oneof = "attest_agent_request::Step", tags = "1, 2")]
    pub step: ::core::option::Option<attest_agent_request::Step>,
}

pub mod attest_agent_request {
    use super::{AgentX509SvidParams, AttestationData};

    #[derive(Clone, PartialEq, Eq, ::prost::Message)]
    pub struct Params {
        #[prost(message, optional, tag = "1")]
        pub data: ::core::option::Option<AttestationData>,
        #[prost(message, optional, tag = "2")]
        pub params: ::core::option::Option<AgentX509SvidParams>,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Step {
        #[prost(message, tag = "1")]
        Params(Params),
        #[prost(bytes = "vec", tag = "2")]
        ChallengeResponse(::prost::alloc::vec::Vec<u8>),
    }
}

/// One server message on the attestation stream: a challenge to answer or
/// the terminal result.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttestAgentResponse {
    #[prost(oneof = "attest_agent_response::Step", tags = "1, 2")]
    pub step: ::core::option::Option<attest_agent_response::Step>,
}

pub mod attest_agent_response {
    use super::AttestAgentResult;

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Step {
        #[prost(bytes = "vec", tag = "1")]
        Challenge(::prost::alloc::vec::Vec<u8>),
        #[prost(message, tag = "2")]
        Result(AttestAgentResult),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttestAgentResult {
    #[prost(message, optional, tag = "1")]
    pub svid: ::core::option::Option<X509Svid>,
}

impl AttestAgentRequest {
    /// Convenience constructor for the opening message.
    pub fn params(data: AttestationData, params: AgentX509SvidParams) -> Self {
        Self {
            step: Some(attest_agent_request::Step::Params(
                attest_agent_request::Params {
                    data: Some(data),
                    params: Some(params),
                },
            )),
        }
    }

    /// Convenience constructor for a challenge answer.
    pub fn challenge_response(response: Vec<u8>) -> Self {
        Self {
            step: Some(attest_agent_request::Step::ChallengeResponse(response)),
        }
    }
}
