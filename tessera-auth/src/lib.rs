//! Credential plumbing for the tessera control plane.
//!
//! Covers the pieces the agent lifecycle service composes but does not own:
//! CSR parsing, X.509 SVID issuance through the [`ca::ServerCa`] capability,
//! and join-token value generation.

pub mod ca;
pub mod csr;
pub mod token;

pub use ca::{CaError, IssuedSvid, ServerCa, SignX509SvidRequest, X509Ca, X509CaConfig};
pub use csr::{parse_csr, Csr, CsrError};
pub use token::generate_join_token;
