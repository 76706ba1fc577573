//! Core domain types for the tessera workload-identity control plane.
//!
//! Everything here is plain data shared between the server, the credential
//! plumbing, and the wire layer: SPIFFE identities, selectors, the
//! attested-node record, join tokens, the clock abstraction, and the audit
//! event types.

pub mod agent;
pub mod audit;
pub mod clock;
pub mod identity;
pub mod selector;

pub use agent::{AttestedNode, JoinToken, RegistrationEntry};
pub use clock::{Clock, FixedClock, SystemClock};
pub use identity::{IdError, SpiffeId, TrustDomain, AGENT_PATH_PREFIX};
pub use selector::{MatchBehavior, Selector};
