//! Test harness for agent lifecycle service tests.
//!
//! The service is exercised directly (no network), with a SQLite datastore
//! wrapped for error injection, a real rcgen CA behind an availability
//! toggle, a recording audit sink, and fake attestor/resolver plugins.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use futures::StreamExt;
use tessera_auth::{CaError, IssuedSvid, ServerCa, SignX509SvidRequest, X509Ca, X509CaConfig};
use tessera_core::audit::{AuditEvent, AuditSink, AuditStatus};
use tessera_core::{
    AttestedNode, Clock, FixedClock, JoinToken, RegistrationEntry, Selector, SpiffeId, TrustDomain,
};
use tessera_proto::{self as proto, attest_agent_response};
use tessera_server::{
    AgentService, AttestationResult, AttestedNodeUpdate, CallerId, ChallengeTransport, Config,
    DataStore, DatastoreError, ListAttestedNodesRequest, ListAttestedNodesResponse, NodeAttestor,
    NodeResolver, RateLimiter, SqliteDataStore, StaticCatalog,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Status};

pub const TEST_TRUST_DOMAIN: &str = "example.org";
pub const TEST_NOW: i64 = 1_700_000_000;

pub struct TestHarness {
    pub service: AgentService,
    pub ds: Arc<FlakyDataStore>,
    pub ca: Arc<TestCa>,
    pub audit: Arc<RecordingAuditSink>,
    pub rate_limiter: Arc<FakeRateLimiter>,
    pub clock: Arc<FixedClock>,
}

pub async fn setup(agent_ttl: Option<Duration>) -> TestHarness {
    let clock: Arc<FixedClock> = Arc::new(FixedClock::new(
        Utc.timestamp_opt(TEST_NOW, 0).unwrap(),
    ));
    let ds = Arc::new(FlakyDataStore::new(
        SqliteDataStore::in_memory().await.expect("open datastore"),
    ));
    let ca = Arc::new(TestCa::new(clock.clone()));
    let audit = Arc::new(RecordingAuditSink::default());
    let rate_limiter = Arc::new(FakeRateLimiter::new(1));

    let mut catalog = StaticCatalog::new();
    catalog.set_node_attestor("test_type", Arc::new(FakeAttestor::test_type()));
    catalog.set_node_resolver("test_type", Arc::new(FakeResolver::test_type()));

    let service = AgentService::new(Config {
        trust_domain: TrustDomain::new(TEST_TRUST_DOMAIN).unwrap(),
        datastore: ds.clone(),
        server_ca: ca.clone(),
        catalog: Arc::new(catalog),
        clock: clock.clone(),
        rate_limiter: rate_limiter.clone(),
        audit: audit.clone(),
        agent_ttl,
    });

    TestHarness {
        service,
        ds,
        ca,
        audit,
        rate_limiter,
        clock,
    }
}

impl TestHarness {
    /// Seed the nodes and join tokens the attestation tests expect.
    pub async fn setup_attest_fixtures(&self) {
        for (spiffe_id, attestation_type, serial) in [
            (
                "spiffe://example.org/spire/agent/test_type/id_attested_before",
                "test_type",
                "test_serial_number",
            ),
            (
                "spiffe://example.org/spire/agent/test_type/id_banned",
                "test_type",
                "",
            ),
            (
                "spiffe://example.org/spire/agent/join_token/banned_token",
                "join_token",
                "",
            ),
        ] {
            self.ds
                .create_attested_node(AttestedNode {
                    spiffe_id: spiffe_id.to_string(),
                    attestation_type: attestation_type.to_string(),
                    cert_serial_number: serial.to_string(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        for (token, expires_at) in [
            ("test_token", TEST_NOW + 600),
            ("banned_token", TEST_NOW + 600),
            ("expired_token", TEST_NOW - 600),
        ] {
            self.ds
                .create_join_token(JoinToken {
                    token: token.to_string(),
                    expires_at,
                })
                .await
                .unwrap();
        }
    }
}

// ============================================================================
// Datastore with error injection
// ============================================================================

/// Wraps the real SQLite datastore and pops one queued outcome per call,
/// letting tests fail the Nth datastore operation.
pub struct FlakyDataStore {
    inner: SqliteDataStore,
    next_errors: Mutex<VecDeque<Option<String>>>,
}

impl FlakyDataStore {
    pub fn new(inner: SqliteDataStore) -> Self {
        Self {
            inner,
            next_errors: Mutex::new(VecDeque::new()),
        }
    }

    /// Fail the next datastore call with the given message.
    pub fn set_next_error(&self, message: &str) {
        let mut queue = self.next_errors.lock().unwrap();
        queue.clear();
        queue.push_back(Some(message.to_string()));
    }

    /// Queue an outcome for the next call: `None` passes through.
    pub fn append_next_error(&self, message: Option<&str>) {
        self.next_errors
            .lock()
            .unwrap()
            .push_back(message.map(str::to_string));
    }

    fn take(&self) -> Result<(), DatastoreError> {
        match self.next_errors.lock().unwrap().pop_front() {
            Some(Some(message)) => Err(DatastoreError::Internal(message)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DataStore for FlakyDataStore {
    async fn count_attested_nodes(&self) -> Result<i32, DatastoreError> {
        self.take()?;
        self.inner.count_attested_nodes().await
    }

    async fn list_attested_nodes(
        &self,
        request: &ListAttestedNodesRequest,
    ) -> Result<ListAttestedNodesResponse, DatastoreError> {
        self.take()?;
        self.inner.list_attested_nodes(request).await
    }

    async fn fetch_attested_node(
        &self,
        spiffe_id: &str,
    ) -> Result<Option<AttestedNode>, DatastoreError> {
        self.take()?;
        self.inner.fetch_attested_node(spiffe_id).await
    }

    async fn create_attested_node(
        &self,
        node: AttestedNode,
    ) -> Result<AttestedNode, DatastoreError> {
        self.take()?;
        self.inner.create_attested_node(node).await
    }

    async fn update_attested_node(
        &self,
        update: AttestedNodeUpdate,
    ) -> Result<AttestedNode, DatastoreError> {
        self.take()?;
        self.inner.update_attested_node(update).await
    }

    async fn delete_attested_node(
        &self,
        spiffe_id: &str,
    ) -> Result<AttestedNode, DatastoreError> {
        self.take()?;
        self.inner.delete_attested_node(spiffe_id).await
    }

    async fn set_node_selectors(
        &self,
        spiffe_id: &str,
        selectors: Vec<Selector>,
    ) -> Result<(), DatastoreError> {
        self.take()?;
        self.inner.set_node_selectors(spiffe_id, selectors).await
    }

    async fn get_node_selectors(&self, spiffe_id: &str) -> Result<Vec<Selector>, DatastoreError> {
        self.take()?;
        self.inner.get_node_selectors(spiffe_id).await
    }

    async fn create_join_token(&self, token: JoinToken) -> Result<(), DatastoreError> {
        self.take()?;
        self.inner.create_join_token(token).await
    }

    async fn fetch_join_token(&self, token: &str) -> Result<Option<JoinToken>, DatastoreError> {
        self.take()?;
        self.inner.fetch_join_token(token).await
    }

    async fn delete_join_token(&self, token: &str) -> Result<(), DatastoreError> {
        self.take()?;
        self.inner.delete_join_token(token).await
    }

    async fn create_registration_entry(
        &self,
        entry: RegistrationEntry,
    ) -> Result<(), DatastoreError> {
        self.take()?;
        self.inner.create_registration_entry(entry).await
    }

    async fn list_registration_entries(&self) -> Result<Vec<RegistrationEntry>, DatastoreError> {
        self.take()?;
        self.inner.list_registration_entries().await
    }
}

// ============================================================================
// CA with an availability toggle
// ============================================================================

/// The real rcgen CA behind a flag so tests can simulate signing outages.
pub struct TestCa {
    inner: X509Ca,
    available: AtomicBool,
}

impl TestCa {
    pub fn new(clock: Arc<FixedClock>) -> Self {
        let clock: Arc<dyn Clock> = clock;
        let inner = X509Ca::new(X509CaConfig {
            common_name: "tessera-test-ca".to_string(),
            default_x509_svid_ttl: Duration::hours(1),
            clock,
        })
        .expect("build test CA");
        Self {
            inner,
            available: AtomicBool::new(true),
        }
    }

    pub fn set_unavailable(&self) {
        self.available.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServerCa for TestCa {
    async fn sign_x509_svid(&self, request: &SignX509SvidRequest) -> Result<IssuedSvid, CaError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CaError::NotAvailable);
        }
        self.inner.sign_x509_svid(request).await
    }

    fn x509_svid_ttl(&self) -> Duration {
        self.inner.x509_svid_ttl()
    }
}

// ============================================================================
// Audit sink, rate limiter
// ============================================================================

#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.events.lock().unwrap().clear();
    }

    /// The single event recorded so far.
    pub fn single(&self) -> AuditEvent {
        let events = self.events();
        assert_eq!(events.len(), 1, "expected exactly one audit event: {events:?}");
        events.into_iter().next().unwrap()
    }
}

impl AuditSink for RecordingAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn assert_success_audit(audit: &RecordingAuditSink, fields: &[(&str, &str)]) {
    let event = audit.single();
    assert_eq!(event.status, AuditStatus::Success);
    assert_eq!(event.status_code, None);
    assert_eq!(event.status_message, None);
    assert_audit_fields(&event, fields);
}

pub fn assert_error_audit(
    audit: &RecordingAuditSink,
    code: &str,
    message: &str,
    fields: &[(&str, &str)],
) {
    let event = audit.single();
    assert_eq!(event.status, AuditStatus::Error);
    assert_eq!(event.status_code.as_deref(), Some(code));
    assert_eq!(event.status_message.as_deref(), Some(message));
    assert_audit_fields(&event, fields);
}

fn assert_audit_fields(event: &AuditEvent, fields: &[(&str, &str)]) {
    assert_eq!(event.fields.len(), fields.len(), "audit fields: {event:?}");
    for (key, value) in fields {
        assert_eq!(
            event.fields.get(key).map(String::as_str),
            Some(*value),
            "audit field {key}"
        );
    }
}

pub struct FakeRateLimiter {
    expected_count: u32,
    error: Mutex<Option<Status>>,
}

impl FakeRateLimiter {
    pub fn new(expected_count: u32) -> Self {
        Self {
            expected_count,
            error: Mutex::new(None),
        }
    }

    pub fn set_error(&self, status: Status) {
        *self.error.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl RateLimiter for FakeRateLimiter {
    async fn rate_limit(&self, count: u32) -> Result<(), Status> {
        if count != self.expected_count {
            return Err(Status::internal(format!(
                "rate limiter got {count} but expected {}",
                self.expected_count
            )));
        }
        match self.error.lock().unwrap().take() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Fake attestor and resolver plugins
// ============================================================================

/// Maps payloads to agent names, drives configured challenge rounds, and
/// returns configured selectors, mirroring how a real attestor behaves.
pub struct FakeAttestor {
    trust_domain: TrustDomain,
    attestation_type: String,
    payloads: HashMap<String, String>,
    challenges: HashMap<String, Vec<String>>,
    selectors: HashMap<String, Vec<String>>,
}

impl FakeAttestor {
    pub fn test_type() -> Self {
        let payloads = [
            ("payload_attested_before", "id_attested_before"),
            ("payload_with_challenge", "id_with_challenge"),
            ("payload_with_result", "id_with_result"),
            ("payload_banned", "id_banned"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let selectors = [
            ("id_with_result", vec!["result"]),
            ("id_attested_before", vec!["attested_before"]),
            ("id_with_challenge", vec!["challenge"]),
            ("id_banned", vec!["banned"]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into_iter().map(str::to_string).collect()))
        .collect();

        let challenges = [(
            "id_with_challenge".to_string(),
            vec!["challenge_response".to_string()],
        )]
        .into_iter()
        .collect();

        Self {
            trust_domain: TrustDomain::new(TEST_TRUST_DOMAIN).unwrap(),
            attestation_type: "test_type".to_string(),
            payloads,
            challenges,
            selectors,
        }
    }
}

#[async_trait]
impl NodeAttestor for FakeAttestor {
    async fn attest(
        &self,
        payload: Vec<u8>,
        transport: &mut dyn ChallengeTransport,
    ) -> Result<AttestationResult, Status> {
        let payload = String::from_utf8_lossy(&payload).into_owned();
        let name = self
            .payloads
            .get(&payload)
            .ok_or_else(|| Status::invalid_argument("unknown attestation payload"))?;

        if let Some(challenges) = self.challenges.get(name) {
            for challenge in challenges {
                let response = transport.challenge(challenge.clone().into_bytes()).await?;
                if response != challenge.as_bytes() {
                    return Err(Status::invalid_argument("challenge response mismatch"));
                }
            }
        }

        let spiffe_id = SpiffeId::from_parts(
            self.trust_domain.as_str(),
            &format!("/spire/agent/{}/{}", self.attestation_type, name),
        )
        .expect("fake agent ID");

        let selectors = self
            .selectors
            .get(name)
            .map(|values| {
                values
                    .iter()
                    .map(|value| Selector::new(self.attestation_type.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(AttestationResult {
            spiffe_id,
            selectors,
        })
    }
}

/// Returns extra selectors for configured agent IDs.
pub struct FakeResolver {
    attestation_type: String,
    selectors: HashMap<String, Vec<String>>,
}

impl FakeResolver {
    pub fn test_type() -> Self {
        let selectors = [
            (
                "spiffe://example.org/spire/agent/test_type/id_with_result",
                vec!["resolved"],
            ),
            (
                "spiffe://example.org/spire/agent/test_type/id_with_challenge",
                vec!["resolved_too"],
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into_iter().map(str::to_string).collect()))
        .collect();

        Self {
            attestation_type: "test_type".to_string(),
            selectors,
        }
    }
}

#[async_trait]
impl NodeResolver for FakeResolver {
    async fn resolve(&self, agent_id: &SpiffeId) -> Result<Vec<Selector>, Status> {
        Ok(self
            .selectors
            .get(&agent_id.to_string())
            .map(|values| {
                values
                    .iter()
                    .map(|value| Selector::new(self.attestation_type.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============================================================================
// Request and stream helpers
// ============================================================================

pub fn wire_id(trust_domain: &str, path: &str) -> proto::SpiffeId {
    proto::SpiffeId {
        trust_domain: trust_domain.to_string(),
        path: path.to_string(),
    }
}

/// A request carrying the authenticated caller identity.
pub fn request_with_caller<T>(message: T, caller: &str) -> Request<T> {
    let mut request = Request::new(message);
    request
        .extensions_mut()
        .insert(CallerId(SpiffeId::parse(caller).unwrap()));
    request
}

/// A fresh CSR for an EC P-256 key.
pub fn test_csr() -> Vec<u8> {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    rcgen::CertificateParams::default()
        .serialize_request(&key_pair)
        .unwrap()
        .der()
        .to_vec()
}

pub fn attest_request(
    attestation_type: &str,
    payload: &[u8],
    csr: &[u8],
) -> proto::AttestAgentRequest {
    proto::AttestAgentRequest::params(
        proto::AttestationData {
            r#type: attestation_type.to_string(),
            payload: payload.to_vec(),
        },
        proto::AgentX509SvidParams { csr: csr.to_vec() },
    )
}

/// Drive one attestation exchange, echoing any challenge back, and return
/// the terminal result along with the number of challenge round trips.
pub async fn attest(
    service: &AgentService,
    request: proto::AttestAgentRequest,
) -> Result<(proto::AttestAgentResult, usize), Status> {
    let (tx, rx) = mpsc::channel::<Result<proto::AttestAgentRequest, Status>>(8);
    tx.send(Ok(request)).await.expect("send opening message");

    let mut responses = service
        .attest_agent(Request::new(ReceiverStream::new(rx)))
        .await?
        .into_inner();

    let mut challenges = 0;
    while let Some(message) = responses.next().await {
        match message?.step {
            Some(attest_agent_response::Step::Challenge(challenge)) => {
                challenges += 1;
                tx.send(Ok(proto::AttestAgentRequest::challenge_response(challenge)))
                    .await
                    .map_err(|_| Status::aborted("server closed inbound stream"))?;
            }
            Some(attest_agent_response::Step::Result(result)) => return Ok((result, challenges)),
            None => return Err(Status::internal("response carried no step")),
        }
    }
    Err(Status::aborted("stream closed without a result"))
}

// ============================================================================
// Certificate assertions
// ============================================================================

pub struct LeafCert {
    pub serial: String,
    pub not_after: i64,
    pub uris: Vec<String>,
}

/// Parse the leaf of a DER chain for assertions.
pub fn parse_leaf(cert_chain: &[Vec<u8>]) -> LeafCert {
    use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

    assert!(!cert_chain.is_empty(), "empty certificate chain");
    let (_, leaf) = X509Certificate::from_der(&cert_chain[0]).expect("parse leaf certificate");

    let uris = leaf
        .subject_alternative_name()
        .expect("SAN extension")
        .expect("SAN present")
        .value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::URI(uri) => Some(uri.to_string()),
            _ => None,
        })
        .collect();

    LeafCert {
        serial: leaf.serial.to_string(),
        not_after: leaf.validity().not_after.timestamp(),
        uris,
    }
}

/// The sha256 hex of CSR bytes, as recorded in audit events.
pub fn csr_hash(csr: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(csr))
}
