//! The AttestAgent bidirectional stream orchestrator.
//!
//! The client opens with one Params message; the server relays attestor
//! challenges and their responses until the attestor produces a terminal
//! identity, then signs, persists, and closes the stream with one Result.
//! All exit paths emit exactly one audit event.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use tessera_auth::parse_csr;
use tessera_core::{selector, AttestedNode, Clock, SpiffeId};
use tessera_proto::{self as proto, attest_agent_request, attest_agent_response};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Request, Response, Status};

use crate::audit::{make_err, AuditLog};
use crate::catalog::{
    AttestationResult, Catalog, ChallengeTransport, NodeAttestor, NodeResolver,
    JOIN_TOKEN_ATTESTATION_TYPE,
};
use crate::datastore::{AttestedNodeUpdate, DataStore, DatastoreError};
use crate::ratelimit::RateLimiter;
use crate::service::AgentService;

/// The server side of the attestation exchange.
pub type AttestAgentStream =
    Pin<Box<dyn Stream<Item = Result<proto::AttestAgentResponse, Status>> + Send>>;

type ResponseSender = mpsc::Sender<Result<proto::AttestAgentResponse, Status>>;

impl AgentService {
    /// Drive one attestation stream. Returns the response stream
    /// immediately; errors are delivered in-stream. Dropping the response
    /// stream (client disconnect) abandons the exchange.
    pub async fn attest_agent<S>(
        &self,
        request: Request<S>,
    ) -> Result<Response<AttestAgentStream>, Status>
    where
        S: Stream<Item = Result<proto::AttestAgentRequest, Status>> + Send + Unpin + 'static,
    {
        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(4);
        let service = self.clone();
        tokio::spawn(async move {
            service.drive_attest_stream(inbound, tx).await;
        });
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn drive_attest_stream<S>(&self, mut inbound: S, tx: ResponseSender)
    where
        S: Stream<Item = Result<proto::AttestAgentRequest, Status>> + Send + Unpin,
    {
        let mut audit = self.audit_log();
        match self.attest_agent_inner(&mut inbound, &tx, &mut audit).await {
            Ok(result) => {
                audit.success();
                let _ = tx.send(Ok(result)).await;
            }
            Err(status) => {
                audit.error(&status);
                let _ = tx.send(Err(status)).await;
            }
        }
    }

    async fn attest_agent_inner<S>(
        &self,
        inbound: &mut S,
        tx: &ResponseSender,
        audit: &mut AuditLog,
    ) -> Result<proto::AttestAgentResponse, Status>
    where
        S: Stream<Item = Result<proto::AttestAgentRequest, Status>> + Send + Unpin,
    {
        if let Err(e) = self.inner.rate_limiter.rate_limit(1).await {
            return Err(make_err(
                e.code(),
                "rejecting request due to attest agent rate limiting",
                Some(&e.message()),
            ));
        }

        let opening = match inbound.next().await {
            Some(Ok(request)) => request,
            Some(Err(status)) => return Err(status),
            None => proto::AttestAgentRequest::default(),
        };
        let (data, csr_bytes) = validate_attest_params(opening)?;
        audit.field("node_attestor_type", data.r#type.clone());

        let attestation = if data.r#type == JOIN_TOKEN_ATTESTATION_TYPE {
            self.attest_join_token(&data.payload).await?
        } else {
            let attestor = self.inner.catalog.node_attestor(&data.r#type).ok_or_else(|| {
                let cause = format!("could not find node attestor type \"{}\"", data.r#type);
                make_err(
                    Code::FailedPrecondition,
                    "error getting node attestor",
                    Some(&cause),
                )
            })?;
            let mut transport = StreamChallengeTransport {
                inbound,
                outbound: tx,
            };
            attestor.attest(data.payload.clone(), &mut transport).await?
        };

        let agent_id = attestation.spiffe_id;
        let agent_id_str = agent_id.to_string();
        audit.field("agent_id", agent_id_str.clone());

        let ds = &self.inner.datastore;
        let existing = ds
            .fetch_attested_node(&agent_id_str)
            .await
            .map_err(|e| make_err(Code::Internal, "failed to fetch agent", Some(&e)))?;
        if existing.as_ref().is_some_and(AttestedNode::is_banned) {
            return Err(make_err(
                Code::PermissionDenied,
                "failed to attest: agent is banned",
                None,
            ));
        }

        // Parsed after attestor success so the audit record already carries
        // the agent identity and attestor type.
        let csr = parse_csr(&csr_bytes)
            .map_err(|e| make_err(Code::InvalidArgument, "failed to parse CSR", Some(&e)))?;

        let mut selectors = attestation.selectors;
        if let Some(resolver) = self.inner.catalog.node_resolver(&data.r#type) {
            let resolved = resolver
                .resolve(&agent_id)
                .await
                .map_err(|e| {
                    make_err(Code::Internal, "failed to resolve selectors", Some(&e.message()))
                })?;
            selectors.extend(resolved);
        }
        let selectors = selector::dedupe(selectors);

        // Signing precedes persistence; a persistence failure discards the
        // minted SVID.
        let svid = self.sign_svid(&agent_id, csr).await?;

        ds.set_node_selectors(&agent_id_str, selectors)
            .await
            .map_err(|e| make_err(Code::Internal, "failed to update selectors", Some(&e)))?;

        match existing {
            Some(_) => {
                let update = AttestedNodeUpdate {
                    spiffe_id: agent_id_str.clone(),
                    new_cert_serial_number: Some(svid.serial_number.clone()),
                    new_cert_not_after: Some(svid.expires_at),
                    ..Default::default()
                };
                ds.update_attested_node(update).await.map_err(|e| {
                    make_err(Code::Internal, "failed to update attested agent", Some(&e))
                })?;
            }
            None => {
                let node = AttestedNode {
                    spiffe_id: agent_id_str.clone(),
                    attestation_type: data.r#type.clone(),
                    cert_serial_number: svid.serial_number.clone(),
                    cert_not_after: svid.expires_at,
                    new_cert_serial_number: String::new(),
                    new_cert_not_after: 0,
                };
                ds.create_attested_node(node).await.map_err(|e| {
                    make_err(Code::Internal, "failed to create attested agent", Some(&e))
                })?;
            }
        }

        tracing::info!(
            agent_id = %agent_id_str,
            node_attestor_type = %data.r#type,
            "Agent attestation request completed"
        );

        Ok(proto::AttestAgentResponse {
            step: Some(attest_agent_response::Step::Result(
                proto::AttestAgentResult {
                    svid: Some(proto::X509Svid {
                        id: Some(crate::convert::proto_from_id(&agent_id)),
                        cert_chain: svid.cert_chain,
                        expires_at: svid.expires_at,
                    }),
                },
            )),
        })
    }

    /// The built-in join-token attestor: look up the token, reject absent or
    /// expired ones, then delete it so it can never be used again. No
    /// rollback: a later failure still consumes the token, preserving the
    /// single-use guarantee against replay.
    async fn attest_join_token(&self, payload: &[u8]) -> Result<AttestationResult, Status> {
        let token = String::from_utf8_lossy(payload).into_owned();
        let ds = &self.inner.datastore;

        let join_token = ds
            .fetch_join_token(&token)
            .await
            .map_err(|e| make_err(Code::Internal, "failed to fetch join token", Some(&e)))?
            .ok_or_else(|| {
                make_err(
                    Code::InvalidArgument,
                    "failed to attest: join token does not exist or has already been used",
                    None,
                )
            })?;

        if join_token.expires_at <= self.inner.clock.now_unix() {
            return Err(make_err(Code::InvalidArgument, "join token expired", None));
        }

        match ds.delete_join_token(&token).await {
            Ok(()) => {}
            Err(DatastoreError::NotFound) => {
                return Err(make_err(
                    Code::InvalidArgument,
                    "failed to attest: join token does not exist or has already been used",
                    None,
                ));
            }
            Err(e) => {
                return Err(make_err(
                    Code::Internal,
                    "failed to delete join token",
                    Some(&e),
                ));
            }
        }

        Ok(AttestationResult {
            spiffe_id: SpiffeId::join_token_agent(&self.inner.trust_domain, &token),
            selectors: vec![],
        })
    }
}

fn validate_attest_params(
    request: proto::AttestAgentRequest,
) -> Result<(proto::AttestationData, Vec<u8>), Status> {
    let params = match request.step {
        Some(attest_agent_request::Step::Params(params)) => params,
        _ => return Err(malformed_param("missing params")),
    };
    let data = params
        .data
        .ok_or_else(|| malformed_param("missing attestation data"))?;
    let x509_params = params
        .params
        .ok_or_else(|| malformed_param("missing X509-SVID parameters"))?;
    if data.r#type.is_empty() {
        return Err(malformed_param("missing attestation data type"));
    }
    if x509_params.csr.is_empty() {
        return Err(malformed_param("missing CSR"));
    }
    Ok((data, x509_params.csr))
}

fn malformed_param(detail: &str) -> Status {
    make_err(Code::InvalidArgument, "malformed param", Some(&detail))
}

/// Relays attestor challenges over the stream and reads the answers.
struct StreamChallengeTransport<'a, S> {
    inbound: &'a mut S,
    outbound: &'a ResponseSender,
}

#[async_trait::async_trait]
impl<S> ChallengeTransport for StreamChallengeTransport<'_, S>
where
    S: Stream<Item = Result<proto::AttestAgentRequest, Status>> + Send + Unpin,
{
    async fn challenge(&mut self, challenge: Vec<u8>) -> Result<Vec<u8>, Status> {
        self.outbound
            .send(Ok(proto::AttestAgentResponse {
                step: Some(attest_agent_response::Step::Challenge(challenge)),
            }))
            .await
            .map_err(|_| Status::aborted("client went away during attestation"))?;

        match self.inbound.next().await {
            Some(Ok(request)) => match request.step {
                Some(attest_agent_request::Step::ChallengeResponse(response)) => Ok(response),
                _ => Err(malformed_param("expected challenge response")),
            },
            Some(Err(status)) => Err(status),
            None => Err(Status::aborted("client closed stream during attestation")),
        }
    }
}
