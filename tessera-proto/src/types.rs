//! Shared message types: identities, selectors, agents, and masks.

/// A SPIFFE ID split into its two components. The canonical string form is
/// `spiffe://<trust_domain><path>` with `path` beginning `/` when non-empty.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct SpiffeId {
    #[prost(string, tag = "1")]
    pub trust_domain: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub path: ::prost::alloc::string::String,
}

/// A `(type, value)` selector.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Selector {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
}

/// A selector filter with its match mode.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SelectorMatch {
    #[prost(enumeration = "MatchBehavior", tag = "1")]
    pub r#match: i32,
    #[prost(message, repeated, tag = "2")]
    pub selectors: ::prost::alloc::vec::Vec<Selector>,
}

/// Selector filter match modes. An unset mode means `MATCH_EXACT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MatchBehavior {
    MatchExact = 0,
    MatchSubset = 1,
    MatchSuperset = 2,
    MatchAny = 3,
}

impl MatchBehavior {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            MatchBehavior::MatchExact => "MATCH_EXACT",
            MatchBehavior::MatchSubset => "MATCH_SUBSET",
            MatchBehavior::MatchSuperset => "MATCH_SUPERSET",
            MatchBehavior::MatchAny => "MATCH_ANY",
        }
    }
}

/// The externally visible projection of an attested node.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Agent {
    #[prost(message, optional, tag = "1")]
    pub id: ::core::option::Option<SpiffeId>,
    #[prost(string, tag = "2")]
    pub attestation_type: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub x509svid_serial_number: ::prost::alloc::string::String,
    #[prost(int64, tag = "4")]
    pub x509svid_expires_at: i64,
    #[prost(message, repeated, tag = "5")]
    pub selectors: ::prost::alloc::vec::Vec<Selector>,
    #[prost(bool, tag = "6")]
    pub banned: bool,
}

/// Output mask over [`Agent`] fields. An omitted mask means all fields; an
/// explicit all-false mask elides everything but the ID.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct AgentMask {
    #[prost(bool, tag = "1")]
    pub attestation_type: bool,
    #[prost(bool, tag = "2")]
    pub x509svid_serial_number: bool,
    #[prost(bool, tag = "3")]
    pub x509svid_expires_at: bool,
    #[prost(bool, tag = "4")]
    pub selectors: bool,
    #[prost(bool, tag = "5")]
    pub banned: bool,
}

impl AgentMask {
    /// A mask selecting every field.
    pub fn all() -> Self {
        Self {
            attestation_type: true,
            x509svid_serial_number: true,
            x509svid_expires_at: true,
            selectors: true,
            banned: true,
        }
    }
}

/// Evidence handed to a node attestor.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct AttestationData {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}

/// A join token issued to admit one node.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct JoinToken {
    #[prost(string, tag = "1")]
    pub value: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub expires_at: i64,
}

/// An issued X.509 SVID: identity, DER certificate chain (leaf first), and
/// the leaf's expiry in Unix seconds.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct X509Svid {
    #[prost(message, optional, tag = "1")]
    pub id: ::core::option::Option<SpiffeId>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub cert_chain: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
    #[prost(int64, tag = "3")]
    pub expires_at: i64,
}
