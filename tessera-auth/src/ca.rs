//! X.509 SVID issuance.
//!
//! [`ServerCa`] is the narrow capability the lifecycle service signs through;
//! [`X509Ca`] is the in-process implementation on rcgen. The issued leaf
//! carries the agent's SPIFFE ID as its only URI SAN, a serial number from a
//! monotonic counter, and a TTL chosen by the caller or the CA default.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, SanType, SerialNumber,
};
use rustls_pki_types::CertificateSigningRequestDer;
use tessera_core::{Clock, SpiffeId};
use thiserror::Error;

use crate::csr::Csr;

/// Errors produced while issuing an SVID.
#[derive(Debug, Error)]
pub enum CaError {
    #[error("X509 CA is not available for signing")]
    NotAvailable,

    #[error("malformed CSR: {0}")]
    MalformedCsr(String),

    #[error("{0}")]
    Signing(String),
}

/// A freshly signed X.509 SVID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSvid {
    /// DER certificate chain, leaf first.
    pub cert_chain: Vec<Vec<u8>>,
    /// Leaf serial number as a decimal string.
    pub serial_number: String,
    /// Leaf expiry, Unix seconds.
    pub expires_at: i64,
}

/// A request to sign one agent SVID.
#[derive(Debug, Clone)]
pub struct SignX509SvidRequest {
    pub spiffe_id: SpiffeId,
    pub csr: Csr,
    /// TTL override; the CA default applies when unset.
    pub ttl: Option<Duration>,
}

/// The signing capability the lifecycle service depends on.
#[async_trait]
pub trait ServerCa: Send + Sync {
    async fn sign_x509_svid(&self, request: &SignX509SvidRequest) -> Result<IssuedSvid, CaError>;

    /// The TTL applied when a request carries no override.
    fn x509_svid_ttl(&self) -> Duration;
}

/// Configuration for [`X509Ca`].
pub struct X509CaConfig {
    /// Common name on the self-signed issuing certificate.
    pub common_name: String,
    pub default_x509_svid_ttl: Duration,
    pub clock: Arc<dyn Clock>,
}

/// An in-process CA holding a self-signed issuing certificate.
pub struct X509Ca {
    issuer_cert: Certificate,
    issuer_key: KeyPair,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    next_serial: AtomicU64,
}

impl X509Ca {
    /// Generate a fresh issuing certificate and key.
    pub fn new(config: X509CaConfig) -> Result<Self, CaError> {
        let issuer_key = KeyPair::generate().map_err(|e| CaError::Signing(e.to_string()))?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, &config.common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

        let now = config.clock.now();
        params.not_before = to_offset(now)?;
        params.not_after = to_offset(now + Duration::days(5 * 365))?;

        let issuer_cert = params
            .self_signed(&issuer_key)
            .map_err(|e| CaError::Signing(e.to_string()))?;

        // Serials start from fresh entropy so restarts do not reissue
        // previously used values.
        let seed = {
            use rand::RngCore;
            rand::rngs::OsRng.next_u64() >> 1
        };

        Ok(Self {
            issuer_cert,
            issuer_key,
            default_ttl: config.default_x509_svid_ttl,
            clock: config.clock,
            next_serial: AtomicU64::new(seed),
        })
    }

    /// The issuing certificate in DER form.
    pub fn issuer_cert_der(&self) -> Vec<u8> {
        self.issuer_cert.der().to_vec()
    }

    fn sign(&self, request: &SignX509SvidRequest) -> Result<IssuedSvid, CaError> {
        let mut csr = CertificateSigningRequestParams::from_der(
            &CertificateSigningRequestDer::from(request.csr.der().to_vec()),
        )
        .map_err(|e| CaError::MalformedCsr(e.to_string()))?;

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let ttl = request.ttl.unwrap_or(self.default_ttl);
        let now = self.clock.now();
        let not_after = now + ttl;

        csr.params.serial_number = Some(SerialNumber::from(serial));
        csr.params.not_before = to_offset(now)?;
        csr.params.not_after = to_offset(not_after)?;
        csr.params.distinguished_name = DistinguishedName::new();
        csr.params.subject_alt_names = vec![SanType::URI(
            request
                .spiffe_id
                .to_string()
                .try_into()
                .map_err(|e: rcgen::Error| CaError::Signing(e.to_string()))?,
        )];
        csr.params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];

        let leaf = csr
            .signed_by(&self.issuer_cert, &self.issuer_key)
            .map_err(|e| CaError::Signing(e.to_string()))?;

        Ok(IssuedSvid {
            cert_chain: vec![leaf.der().to_vec(), self.issuer_cert.der().to_vec()],
            serial_number: serial.to_string(),
            expires_at: not_after.timestamp(),
        })
    }
}

#[async_trait]
impl ServerCa for X509Ca {
    async fn sign_x509_svid(&self, request: &SignX509SvidRequest) -> Result<IssuedSvid, CaError> {
        self.sign(request)
    }

    fn x509_svid_ttl(&self) -> Duration {
        self.default_ttl
    }
}

fn to_offset(at: DateTime<Utc>) -> Result<time::OffsetDateTime, CaError> {
    time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| CaError::Signing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tessera_core::FixedClock;
    use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

    fn test_csr() -> Csr {
        let key_pair = KeyPair::generate().unwrap();
        let der = CertificateParams::default()
            .serialize_request(&key_pair)
            .unwrap()
            .der()
            .to_vec();
        crate::csr::parse_csr(&der).unwrap()
    }

    fn test_ca(clock: Arc<dyn Clock>) -> X509Ca {
        X509Ca::new(X509CaConfig {
            common_name: "tessera-test-ca".to_string(),
            default_x509_svid_ttl: Duration::hours(1),
            clock,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn signs_with_uri_san_and_tracked_serial() {
        let clock = Arc::new(FixedClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let ca = test_ca(clock.clone());

        let id = SpiffeId::parse("spiffe://example.org/spire/agent/join_token/t").unwrap();
        let svid = ca
            .sign_x509_svid(&SignX509SvidRequest {
                spiffe_id: id.clone(),
                csr: test_csr(),
                ttl: None,
            })
            .await
            .unwrap();

        assert_eq!(svid.cert_chain.len(), 2);
        assert_eq!(svid.expires_at, 1_700_000_000 + 3600);

        let (_, leaf) = X509Certificate::from_der(&svid.cert_chain[0]).unwrap();
        assert_eq!(leaf.validity().not_after.timestamp(), svid.expires_at);

        let san = leaf.subject_alternative_name().unwrap().unwrap();
        let uris: Vec<String> = san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::URI(uri) => Some(uri.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(uris, vec![id.to_string()]);

        assert_eq!(leaf.serial.to_string(), svid.serial_number);
    }

    #[tokio::test]
    async fn serial_numbers_increment() {
        let clock = Arc::new(FixedClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let ca = test_ca(clock);
        let id = SpiffeId::parse("spiffe://example.org/spire/agent/x").unwrap();

        let first = ca
            .sign_x509_svid(&SignX509SvidRequest {
                spiffe_id: id.clone(),
                csr: test_csr(),
                ttl: None,
            })
            .await
            .unwrap();
        let second = ca
            .sign_x509_svid(&SignX509SvidRequest {
                spiffe_id: id,
                csr: test_csr(),
                ttl: None,
            })
            .await
            .unwrap();

        let a: u64 = first.serial_number.parse().unwrap();
        let b: u64 = second.serial_number.parse().unwrap();
        assert_eq!(b, a + 1);
    }

    #[tokio::test]
    async fn ttl_override_wins() {
        let clock = Arc::new(FixedClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let ca = test_ca(clock);
        let id = SpiffeId::parse("spiffe://example.org/spire/agent/x").unwrap();

        let svid = ca
            .sign_x509_svid(&SignX509SvidRequest {
                spiffe_id: id,
                csr: test_csr(),
                ttl: Some(Duration::minutes(42)),
            })
            .await
            .unwrap();
        assert_eq!(svid.expires_at, 1_700_000_000 + 42 * 60);
    }
}
