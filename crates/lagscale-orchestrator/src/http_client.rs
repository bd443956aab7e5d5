//! HTTP adapter for the orchestrator's scale subresource.
//!
//! Reads and patches `/apis/apps/v1/namespaces/{ns}/deployments/{name}/scale`
//! on a configured API endpoint. Replica reads take `.spec.replicas` from
//! the scale object; writes send a merge patch of the same field.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::{Orchestrator, WorkloadRef};

/// Orchestrator gateway over a plain-HTTP API endpoint ("host:port").
#[derive(Debug, Clone)]
pub struct HttpOrchestrator {
    api_addr: String,
    timeout: Duration,
}

impl HttpOrchestrator {
    /// Create a gateway for the API server at `api_addr` ("host:port").
    pub fn new(api_addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_addr: api_addr.into(),
            timeout,
        }
    }

    fn scale_path(workload: &WorkloadRef) -> String {
        format!(
            "/apis/apps/v1/namespaces/{}/deployments/{}/scale",
            workload.namespace, workload.deployment
        )
    }

    /// One bounded request; returns status and body.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<(&'static str, Bytes)>,
    ) -> OrchestratorResult<(u16, Bytes)> {
        let attempt = tokio::time::timeout(
            self.timeout,
            request_once(&self.api_addr, method, path, body),
        )
        .await;
        match attempt {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Unreachable(format!(
                "{}: timed out after {:?}",
                self.api_addr, self.timeout
            ))),
        }
    }
}

async fn request_once(
    api_addr: &str,
    method: &str,
    path: &str,
    body: Option<(&'static str, Bytes)>,
) -> OrchestratorResult<(u16, Bytes)> {
    let stream = tokio::net::TcpStream::connect(api_addr)
        .await
        .map_err(|e| OrchestratorError::Unreachable(format!("connect {api_addr}: {e}")))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| OrchestratorError::Unreachable(format!("handshake {api_addr}: {e}")))?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = http::Request::builder()
        .method(method)
        .uri(path)
        .header("host", api_addr)
        .header("user-agent", "lagscale-orchestrator/0.1");
    let payload = match body {
        Some((content_type, bytes)) => {
            builder = builder.header("content-type", content_type);
            Full::new(bytes)
        }
        None => Full::new(Bytes::new()),
    };
    let req = builder
        .body(payload)
        .map_err(|e| OrchestratorError::Protocol(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| OrchestratorError::Unreachable(format!("request {api_addr}: {e}")))?;

    let status = resp.status().as_u16();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| OrchestratorError::Unreachable(format!("body {api_addr}: {e}")))?
        .to_bytes();
    Ok((status, bytes))
}

#[async_trait::async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn replicas(&self, workload: &WorkloadRef) -> OrchestratorResult<u32> {
        let path = Self::scale_path(workload);
        let (status, body) = self.request("GET", &path, None).await?;
        if !(200..300).contains(&status) {
            return Err(OrchestratorError::Api {
                status,
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let scale: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| OrchestratorError::Protocol(format!("scale object: {e}")))?;
        let replicas = scale
            .pointer("/spec/replicas")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                OrchestratorError::Protocol("scale object missing .spec.replicas".to_string())
            })?;
        debug!(%workload, replicas, "replica count read");
        Ok(replicas as u32)
    }

    async fn scale_to(&self, workload: &WorkloadRef, replicas: u32) -> OrchestratorResult<()> {
        let path = Self::scale_path(workload);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        let body = Bytes::from(patch.to_string());
        let (status, resp_body) = self
            .request("PATCH", &path, Some(("application/merge-patch+json", body)))
            .await?;
        if !(200..300).contains(&status) {
            return Err(OrchestratorError::Api {
                status,
                message: String::from_utf8_lossy(&resp_body).into_owned(),
            });
        }
        debug!(%workload, replicas, "replica count patched");
        Ok(())
    }
}
