use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::settings::Settings;
use crate::gate::request_gate::{GateDecision, RequestGate};
use crate::gate::recorder::RequestRecorder;
use crate::gate::resolver::ClientAddrResolver;
use crate::models::request::RequestContext;

/// Fixed body returned on every denied request.
pub const DENY_BODY: &str = "Access denied: address is blocked";

/// The gating gateway: a pre-handler stage (the gate) and a post-handler
/// stage (the recorder) composed around an opaque upstream application.
///
/// For every inbound request the gateway:
///
/// 1. Resolves the client address through the trusted-proxy chain.
/// 2. Runs the [`RequestGate`]; denied requests get a fixed 403 and never
///    reach the upstream or the recorder.
/// 3. Forwards allowed requests to the upstream backend.
/// 4. Spawns the [`RequestRecorder`] once the response is produced, so
///    logging never delays or alters what the client sees.
pub struct Gateway {
    resolver: ClientAddrResolver,
    gate: Arc<RequestGate>,
    recorder: Arc<RequestRecorder>,
    upstream_client: HyperClient<HttpConnector, Full<Bytes>>,
    upstream_address: String,
    response_timeout: Duration,
}

impl Gateway {
    pub fn new(
        settings: &Settings,
        gate: Arc<RequestGate>,
        recorder: Arc<RequestRecorder>,
    ) -> Self {
        let upstream_client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(128)
            .build_http();

        Self {
            resolver: ClientAddrResolver::from_config(&settings.gate),
            gate,
            recorder,
            upstream_client,
            upstream_address: settings.upstream.address.clone(),
            response_timeout: Duration::from_millis(settings.upstream.response_timeout_ms),
        }
    }

    /// Accept loop. Runs until the task is aborted.
    pub async fn run(
        self: Arc<Self>,
        bind: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(bind).await?;
        info!(addr = %bind, "Gateway listening");

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!("Failed to accept TCP connection: {}", err);
                    continue;
                }
            };

            let gateway = Arc::clone(&self);
            tokio::spawn(async move {
                let peer_ip = peer_addr.ip();
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let gateway = Arc::clone(&gateway);
                    async move {
                        Ok::<_, Infallible>(gateway.handle(req, Some(peer_ip)).await)
                    }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer_ip, error = %err, "Connection closed with error");
                }
            });
        }
    }

    /// Process one inbound request end-to-end.
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        peer: Option<IpAddr>,
    ) -> Response<Full<Bytes>> {
        let client = self.resolver.resolve(peer, req.headers());

        match self.gate.check(client.address) {
            Ok(GateDecision::Allow) => {}
            Ok(GateDecision::Deny) => {
                info!(address = %client.address, path = %req.uri().path(), "Request denied");
                return forbidden();
            }
            Err(err) => {
                error!(address = %client.address, error = %err, "Gate check failed; failing closed");
                return gate_unavailable();
            }
        }

        let mut ctx = RequestContext::new(
            client.address,
            client.routable,
            req.method().to_string(),
            req.uri().path().to_string(),
        );
        ctx.user_agent = req
            .headers()
            .get(hyper::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let response = self.forward(req, client.address).await;

        // Post-handler stage, off the response path.
        let recorder = Arc::clone(&self.recorder);
        tokio::spawn(async move {
            recorder.record(&ctx).await;
        });

        response
    }

    /// Relay the request to the upstream application.
    async fn forward(&self, req: Request<Incoming>, client: IpAddr) -> Response<Full<Bytes>> {
        let (parts, body) = req.into_parts();

        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!(error = %err, "Failed to read request body");
                return bad_gateway();
            }
        };

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = format!("http://{}{}", self.upstream_address, path_and_query);

        let mut builder = Request::builder().method(parts.method).uri(&uri);
        for (name, value) in parts.headers.iter() {
            builder = builder.header(name, value);
        }
        builder = builder.header("x-forwarded-for", client.to_string());

        let upstream_req = match builder.body(Full::new(body_bytes)) {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "Failed to build upstream request");
                return bad_gateway();
            }
        };

        let upstream_resp = match tokio::time::timeout(
            self.response_timeout,
            self.upstream_client.request(upstream_req),
        )
        .await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => {
                warn!(error = %err, "Upstream request failed");
                return bad_gateway();
            }
            Err(_) => {
                warn!("Upstream request timed out");
                return bad_gateway();
            }
        };

        let (resp_parts, resp_body) = upstream_resp.into_parts();
        match resp_body.collect().await {
            Ok(collected) => Response::from_parts(resp_parts, Full::new(collected.to_bytes())),
            Err(err) => {
                warn!(error = %err, "Failed to read upstream response body");
                bad_gateway()
            }
        }
    }
}

fn forbidden() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from_static(DENY_BODY.as_bytes())))
        .expect("static response")
}

fn gate_unavailable() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from_static(b"Request gating unavailable")))
        .expect("static response")
}

fn bad_gateway() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from_static(b"Upstream unavailable")))
        .expect("static response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deny_response_is_fixed() {
        let resp = forbidden();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(DENY_BODY.as_bytes()));
    }
}
