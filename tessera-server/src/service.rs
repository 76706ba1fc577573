//! The agent lifecycle service: configuration and the unary operations.
//!
//! Every handler runs under an audit guard that emits exactly one structured
//! audit event on each exit path. The attestation stream handler lives in
//! `attest.rs`.

use std::sync::Arc;

use chrono::Duration;
use tessera_auth::{parse_csr, Csr, IssuedSvid, ServerCa, SignX509SvidRequest};
use tessera_core::audit::AuditSink;
use tessera_core::{Clock, JoinToken, RegistrationEntry, Selector, SpiffeId, TrustDomain};
use tessera_proto as proto;
use tonic::{Code, Request, Response, Status};

use crate::audit::{hash_bytes, make_err, AuditLog};
use crate::catalog::Catalog;
use crate::convert;
use crate::datastore::{
    AttestedNodeUpdate, DataStore, DatastoreError, ListAttestedNodesRequest, SelectorMatchFilter,
};
use crate::ratelimit::RateLimiter;
use crate::validate;

/// Authenticated caller identity, placed in request extensions by the
/// transport's authentication layer.
#[derive(Debug, Clone)]
pub struct CallerId(pub SpiffeId);

/// Service configuration, captured at construction. The service holds no
/// other mutable state; the shared collaborators are expected to be
/// internally thread-safe.
pub struct Config {
    pub trust_domain: TrustDomain,
    pub datastore: Arc<dyn DataStore>,
    pub server_ca: Arc<dyn ServerCa>,
    pub catalog: Arc<dyn Catalog>,
    pub clock: Arc<dyn Clock>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub audit: Arc<dyn AuditSink>,
    /// SVID TTL for agents; the CA default applies when unset.
    pub agent_ttl: Option<Duration>,
}

/// The agent lifecycle service.
#[derive(Clone)]
pub struct AgentService {
    pub(crate) inner: Arc<Config>,
}

impl AgentService {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(config),
        }
    }

    pub(crate) fn audit_log(&self) -> AuditLog {
        AuditLog::new(self.inner.audit.clone())
    }

    pub async fn count_agents(
        &self,
        _request: Request<proto::CountAgentsRequest>,
    ) -> Result<Response<proto::CountAgentsResponse>, Status> {
        let mut audit = self.audit_log();
        match self.count_agents_inner().await {
            Ok(resp) => {
                audit.success();
                Ok(Response::new(resp))
            }
            Err(status) => {
                audit.error(&status);
                Err(status)
            }
        }
    }

    async fn count_agents_inner(&self) -> Result<proto::CountAgentsResponse, Status> {
        let count = self
            .inner
            .datastore
            .count_attested_nodes()
            .await
            .map_err(|e| make_err(Code::Internal, "failed to count agents", Some(&e)))?;
        Ok(proto::CountAgentsResponse { count })
    }

    pub async fn list_agents(
        &self,
        request: Request<proto::ListAgentsRequest>,
    ) -> Result<Response<proto::ListAgentsResponse>, Status> {
        let req = request.into_inner();
        let mut audit = self.audit_log();
        record_list_filter_fields(&mut audit, &req);
        match self.list_agents_inner(req).await {
            Ok(resp) => {
                audit.success();
                Ok(Response::new(resp))
            }
            Err(status) => {
                audit.error(&status);
                Err(status)
            }
        }
    }

    async fn list_agents_inner(
        &self,
        req: proto::ListAgentsRequest,
    ) -> Result<proto::ListAgentsResponse, Status> {
        let mut ds_req = ListAttestedNodesRequest {
            page_size: req.page_size.max(0) as u32,
            page_token: (!req.page_token.is_empty()).then(|| req.page_token.clone()),
            ..Default::default()
        };

        if let Some(filter) = &req.filter {
            if !filter.by_attestation_type.is_empty() {
                ds_req.by_attestation_type = Some(filter.by_attestation_type.clone());
            }
            ds_req.by_banned = filter.by_banned;
            if let Some(selector_match) = &filter.by_selector_match {
                let selectors = validate::selectors_from_proto(&selector_match.selectors)
                    .map_err(|e| {
                        make_err(Code::InvalidArgument, "failed to parse selectors", Some(&e))
                    })?;
                ds_req.by_selector_match = Some(SelectorMatchFilter {
                    behavior: match_behavior_from_proto(selector_match.r#match),
                    selectors,
                });
            }
        }

        let resp = self
            .inner
            .datastore
            .list_attested_nodes(&ds_req)
            .await
            .map_err(|e| make_err(Code::Internal, "failed to list agents", Some(&e)))?;

        let mut agents = Vec::with_capacity(resp.nodes.len());
        for (node, selectors) in &resp.nodes {
            let mut agent = convert::attested_node_to_agent(node, selectors)
                .map_err(|e| make_err(Code::Internal, "failed to convert agent", Some(&e)))?;
            convert::apply_agent_mask(&mut agent, req.output_mask.as_ref());
            agents.push(agent);
        }

        Ok(proto::ListAgentsResponse {
            agents,
            next_page_token: resp.next_page_token.unwrap_or_default(),
        })
    }

    pub async fn get_agent(
        &self,
        request: Request<proto::GetAgentRequest>,
    ) -> Result<Response<proto::Agent>, Status> {
        let req = request.into_inner();
        let mut audit = self.audit_log();
        match self.get_agent_inner(req, &mut audit).await {
            Ok(agent) => {
                audit.success();
                Ok(Response::new(agent))
            }
            Err(status) => {
                audit.error(&status);
                Err(status)
            }
        }
    }

    async fn get_agent_inner(
        &self,
        req: proto::GetAgentRequest,
        audit: &mut AuditLog,
    ) -> Result<proto::Agent, Status> {
        let id = validate::agent_id_from_proto(&self.inner.trust_domain, req.id.as_ref())
            .map_err(|e| make_err(Code::InvalidArgument, "invalid agent ID", Some(&e)))?;
        audit.field("spiffe_id", id.to_string());

        let ds = &self.inner.datastore;
        let node = ds
            .fetch_attested_node(&id.to_string())
            .await
            .map_err(|e| make_err(Code::Internal, "failed to fetch agent", Some(&e)))?
            .ok_or_else(|| make_err(Code::NotFound, "agent not found", None))?;

        let selectors = ds.get_node_selectors(&id.to_string()).await.map_err(|e| {
            make_err(
                Code::Internal,
                "failed to get selectors from attested node",
                Some(&e),
            )
        })?;

        let mut agent = convert::attested_node_to_agent(&node, &selectors)
            .map_err(|e| make_err(Code::Internal, "failed to convert agent", Some(&e)))?;
        convert::apply_agent_mask(&mut agent, req.output_mask.as_ref());
        Ok(agent)
    }

    pub async fn ban_agent(
        &self,
        request: Request<proto::BanAgentRequest>,
    ) -> Result<Response<proto::BanAgentResponse>, Status> {
        let req = request.into_inner();
        let mut audit = self.audit_log();
        match self.ban_agent_inner(req, &mut audit).await {
            Ok(resp) => {
                audit.success();
                Ok(Response::new(resp))
            }
            Err(status) => {
                audit.error(&status);
                Err(status)
            }
        }
    }

    async fn ban_agent_inner(
        &self,
        req: proto::BanAgentRequest,
        audit: &mut AuditLog,
    ) -> Result<proto::BanAgentResponse, Status> {
        let id = validate::agent_id_from_proto(&self.inner.trust_domain, req.id.as_ref())
            .map_err(|e| make_err(Code::InvalidArgument, "invalid agent ID", Some(&e)))?;
        audit.field("spiffe_id", id.to_string());

        // An empty current serial is the banned marker; the pending serial
        // is cleared too so a stale rotation cannot resurrect the agent.
        let update = AttestedNodeUpdate {
            spiffe_id: id.to_string(),
            cert_serial_number: Some(String::new()),
            new_cert_serial_number: Some(String::new()),
            ..Default::default()
        };

        match self.inner.datastore.update_attested_node(update).await {
            Ok(_) => {
                tracing::info!(spiffe_id = %id, "Agent banned");
                Ok(proto::BanAgentResponse {})
            }
            Err(DatastoreError::NotFound) => Err(make_err(Code::NotFound, "agent not found", None)),
            Err(e) => Err(make_err(Code::Internal, "failed to ban agent", Some(&e))),
        }
    }

    pub async fn delete_agent(
        &self,
        request: Request<proto::DeleteAgentRequest>,
    ) -> Result<Response<proto::DeleteAgentResponse>, Status> {
        let req = request.into_inner();
        let mut audit = self.audit_log();
        match self.delete_agent_inner(req, &mut audit).await {
            Ok(resp) => {
                audit.success();
                Ok(Response::new(resp))
            }
            Err(status) => {
                audit.error(&status);
                Err(status)
            }
        }
    }

    async fn delete_agent_inner(
        &self,
        req: proto::DeleteAgentRequest,
        audit: &mut AuditLog,
    ) -> Result<proto::DeleteAgentResponse, Status> {
        let id = validate::agent_id_from_proto(&self.inner.trust_domain, req.id.as_ref())
            .map_err(|e| make_err(Code::InvalidArgument, "invalid agent ID", Some(&e)))?;
        audit.field("spiffe_id", id.to_string());

        match self
            .inner
            .datastore
            .delete_attested_node(&id.to_string())
            .await
        {
            Ok(_) => {
                tracing::info!(spiffe_id = %id, "Agent deleted");
                Ok(proto::DeleteAgentResponse {})
            }
            Err(DatastoreError::NotFound) => Err(make_err(Code::NotFound, "agent not found", None)),
            Err(e) => Err(make_err(Code::Internal, "failed to remove agent", Some(&e))),
        }
    }

    pub async fn create_join_token(
        &self,
        request: Request<proto::CreateJoinTokenRequest>,
    ) -> Result<Response<proto::JoinToken>, Status> {
        let req = request.into_inner();
        let mut audit = self.audit_log();
        match self.create_join_token_inner(req, &mut audit).await {
            Ok(resp) => {
                audit.success();
                Ok(Response::new(resp))
            }
            Err(status) => {
                audit.error(&status);
                Err(status)
            }
        }
    }

    async fn create_join_token_inner(
        &self,
        req: proto::CreateJoinTokenRequest,
        audit: &mut AuditLog,
    ) -> Result<proto::JoinToken, Status> {
        if req.ttl <= 0 {
            return Err(make_err(
                Code::InvalidArgument,
                "ttl is required, you must provide one",
                None,
            ));
        }
        audit.field("ttl", req.ttl.to_string());

        let agent_id = match &req.agent_id {
            Some(id) => {
                let id = validate::member_id_from_proto(&self.inner.trust_domain, Some(id))
                    .map_err(|e| make_err(Code::InvalidArgument, "invalid agent ID", Some(&e)))?;
                audit.field("spiffe_id", id.to_string());
                Some(id)
            }
            None => None,
        };

        let value = if req.token.is_empty() {
            tessera_auth::generate_join_token()
        } else {
            req.token.clone()
        };
        let expires_at = self.inner.clock.now_unix() + i64::from(req.ttl);

        self.inner
            .datastore
            .create_join_token(JoinToken {
                token: value.clone(),
                expires_at,
            })
            .await
            .map_err(|e| make_err(Code::Internal, "failed to create token", Some(&e)))?;

        if let Some(agent_id) = agent_id {
            let token_id = SpiffeId::join_token_agent(&self.inner.trust_domain, &value);
            self.inner
                .datastore
                .create_registration_entry(RegistrationEntry {
                    spiffe_id: agent_id.to_string(),
                    parent_id: token_id.to_string(),
                    selectors: vec![Selector::new("join_token", token_id.to_string())],
                })
                .await
                .map_err(|e| {
                    make_err(Code::Internal, "failed to create registration entry", Some(&e))
                })?;
        }

        Ok(proto::JoinToken { value, expires_at })
    }

    pub async fn renew_agent(
        &self,
        request: Request<proto::RenewAgentRequest>,
    ) -> Result<Response<proto::RenewAgentResponse>, Status> {
        let mut audit = self.audit_log();
        if let Some(params) = &request.get_ref().params {
            if !params.csr.is_empty() {
                audit.field("csr", hash_bytes(&params.csr));
            }
        }
        let caller = request.extensions().get::<CallerId>().cloned();
        let req = request.into_inner();
        match self.renew_agent_inner(caller, req).await {
            Ok(resp) => {
                audit.success();
                Ok(Response::new(resp))
            }
            Err(status) => {
                audit.error(&status);
                Err(status)
            }
        }
    }

    async fn renew_agent_inner(
        &self,
        caller: Option<CallerId>,
        req: proto::RenewAgentRequest,
    ) -> Result<proto::RenewAgentResponse, Status> {
        if let Err(e) = self.inner.rate_limiter.rate_limit(1).await {
            return Err(make_err(
                e.code(),
                "rejecting request due to renew agent rate limiting",
                Some(&e.message()),
            ));
        }

        // A missing caller is a wiring bug in the authentication layer, not
        // a client fault.
        let CallerId(caller) = caller.ok_or_else(|| {
            make_err(Code::Internal, "caller ID missing from request context", None)
        })?;

        tracing::info!(spiffe_id = %caller, "Renewing agent SVID");

        let params = req
            .params
            .ok_or_else(|| make_err(Code::InvalidArgument, "params cannot be nil", None))?;
        if params.csr.is_empty() {
            return Err(make_err(Code::InvalidArgument, "missing CSR", None));
        }
        let csr = parse_csr(&params.csr)
            .map_err(|e| make_err(Code::InvalidArgument, "failed to parse CSR", Some(&e)))?;

        let svid = self.sign_svid(&caller, csr).await?;

        // Only the pending pair moves; promotion of new→current happens on
        // the agent's next round trip.
        let update = AttestedNodeUpdate {
            spiffe_id: caller.to_string(),
            new_cert_serial_number: Some(svid.serial_number.clone()),
            new_cert_not_after: Some(svid.expires_at),
            ..Default::default()
        };
        match self.inner.datastore.update_attested_node(update).await {
            Ok(_) => {}
            Err(DatastoreError::NotFound) => {
                return Err(make_err(Code::NotFound, "agent not found", None));
            }
            Err(e) => return Err(make_err(Code::Internal, "failed to update agent", Some(&e))),
        }

        Ok(proto::RenewAgentResponse {
            svid: Some(proto::X509Svid {
                id: Some(convert::proto_from_id(&caller)),
                cert_chain: svid.cert_chain,
                expires_at: svid.expires_at,
            }),
        })
    }

    /// Sign one agent SVID, applying the configured agent TTL override.
    pub(crate) async fn sign_svid(&self, id: &SpiffeId, csr: Csr) -> Result<IssuedSvid, Status> {
        self.inner
            .server_ca
            .sign_x509_svid(&SignX509SvidRequest {
                spiffe_id: id.clone(),
                csr,
                ttl: self.inner.agent_ttl,
            })
            .await
            .map_err(|e| make_err(Code::Internal, "failed to sign X509 SVID", Some(&e)))
    }
}

fn record_list_filter_fields(audit: &mut AuditLog, req: &proto::ListAgentsRequest) {
    let Some(filter) = &req.filter else {
        return;
    };
    if !filter.by_attestation_type.is_empty() {
        audit.field("node_attestor_type", filter.by_attestation_type.clone());
    }
    if let Some(by_banned) = filter.by_banned {
        audit.field("by_banned", by_banned.to_string());
    }
    if let Some(selector_match) = &filter.by_selector_match {
        let behavior = proto::MatchBehavior::try_from(selector_match.r#match)
            .unwrap_or(proto::MatchBehavior::MatchExact);
        audit.field("by_selector_match", behavior.as_str_name());
        audit.field(
            "by_selectors",
            selector_match
                .selectors
                .iter()
                .map(|s| format!("{}:{}", s.r#type, s.value))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
}

fn match_behavior_from_proto(raw: i32) -> tessera_core::MatchBehavior {
    match proto::MatchBehavior::try_from(raw).unwrap_or(proto::MatchBehavior::MatchExact) {
        proto::MatchBehavior::MatchExact => tessera_core::MatchBehavior::Exact,
        proto::MatchBehavior::MatchSubset => tessera_core::MatchBehavior::Subset,
        proto::MatchBehavior::MatchSuperset => tessera_core::MatchBehavior::Superset,
        proto::MatchBehavior::MatchAny => tessera_core::MatchBehavior::Any,
    }
}
