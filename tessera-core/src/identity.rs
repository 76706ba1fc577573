//! SPIFFE identity types: trust domains and SPIFFE IDs.
//!
//! A SPIFFE ID is a URI of the form `spiffe://<trust-domain><path>`. Agents
//! live under the reserved `/spire/agent/` namespace of their trust domain.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Path prefix reserved for agent identities within a trust domain.
pub const AGENT_PATH_PREFIX: &str = "/spire/agent/";

/// Path prefix for identities minted by the built-in join-token attestor.
const JOIN_TOKEN_PATH_PREFIX: &str = "/spire/agent/join_token/";

/// Errors produced while parsing trust domains and SPIFFE IDs.
///
/// The message strings are load-bearing: they surface verbatim in
/// InvalidArgument statuses and clients match on them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("trust domain is empty")]
    EmptyTrustDomain,

    #[error("trust domain characters are limited to lowercase letters, digits, dots, dashes, and underscores")]
    BadTrustDomainChar,

    #[error("scheme is missing or invalid")]
    WrongScheme,

    #[error("path cannot contain empty segments")]
    EmptySegment,

    #[error("path cannot contain dot segments")]
    DotSegment,

    #[error("path segment characters are limited to letters, digits, dots, dashes, and underscores")]
    BadPathChar,
}

/// A validated trust domain name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustDomain(String);

impl TrustDomain {
    /// Parse and validate a trust domain name.
    pub fn new(name: impl AsRef<str>) -> Result<Self, IdError> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(IdError::EmptyTrustDomain);
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'))
        {
            return Err(IdError::BadTrustDomainChar);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated SPIFFE ID.
///
/// The canonical string form is `spiffe://<trust-domain><path>` where the
/// path, when non-empty, begins with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpiffeId {
    trust_domain: TrustDomain,
    path: String,
}

impl SpiffeId {
    /// Build a SPIFFE ID from a trust domain name and a path.
    ///
    /// The path is normalized to start with `/` when non-empty, so wire
    /// shapes that omit the leading slash still produce the canonical form.
    pub fn from_parts(trust_domain: &str, path: &str) -> Result<Self, IdError> {
        let trust_domain = TrustDomain::new(trust_domain)?;
        let path = normalize_path(path)?;
        Ok(Self { trust_domain, path })
    }

    /// Parse a SPIFFE ID from its canonical URI string.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let rest = s.strip_prefix("spiffe://").ok_or(IdError::WrongScheme)?;
        match rest.find('/') {
            Some(idx) => Self::from_parts(&rest[..idx], &rest[idx..]),
            None => Self::from_parts(rest, ""),
        }
    }

    /// The ID of the agent admitted by consuming the given join token.
    ///
    /// Token values are opaque, so the path is built verbatim rather than
    /// revalidated.
    pub fn join_token_agent(trust_domain: &TrustDomain, token: &str) -> Self {
        Self {
            trust_domain: trust_domain.clone(),
            path: format!("{JOIN_TOKEN_PATH_PREFIX}{token}"),
        }
    }

    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// The path component, beginning with `/` when non-empty.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_member_of(&self, trust_domain: &TrustDomain) -> bool {
        self.trust_domain == *trust_domain
    }

    /// Whether the path lies in the reserved agent namespace.
    pub fn is_agent(&self) -> bool {
        self.path.starts_with(AGENT_PATH_PREFIX)
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spiffe://{}{}", self.trust_domain, self.path)
    }
}

fn normalize_path(path: &str) -> Result<String, IdError> {
    if path.is_empty() {
        return Ok(String::new());
    }
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    for segment in path[1..].split('/') {
        match segment {
            "" => return Err(IdError::EmptySegment),
            "." | ".." => return Err(IdError::DotSegment),
            _ => {}
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return Err(IdError::BadPathChar);
        }
    }
    Ok(path)
}
