//! Certificate signing request parsing.
//!
//! The service validates CSR bytes before asking the CA to sign; only the
//! public key is honored, every other field of the issued certificate is
//! dictated by the server.

use rcgen::CertificateSigningRequestParams;
use rustls_pki_types::CertificateSigningRequestDer;
use thiserror::Error;

/// Maximum CSR size (16KB is generous for a single request).
pub const MAX_CSR_SIZE: usize = 16 * 1024;

/// Errors that can occur while parsing a CSR.
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("CSR too large: {0} bytes (max {MAX_CSR_SIZE})")]
    TooLarge(usize),

    #[error("{0}")]
    Malformed(String),
}

/// A syntactically valid DER-encoded CSR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Csr {
    der: Vec<u8>,
}

impl Csr {
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

/// Parse and validate DER-encoded CSR bytes.
///
/// # Errors
///
/// Returns `CsrError::TooLarge` if the input exceeds 16KB.
/// Returns `CsrError::Malformed` if the bytes are not a valid CSR.
pub fn parse_csr(der: &[u8]) -> Result<Csr, CsrError> {
    if der.len() > MAX_CSR_SIZE {
        return Err(CsrError::TooLarge(der.len()));
    }

    CertificateSigningRequestParams::from_der(&CertificateSigningRequestDer::from(der.to_vec()))
        .map_err(|e| CsrError::Malformed(e.to_string()))?;

    Ok(Csr { der: der.to_vec() })
}
