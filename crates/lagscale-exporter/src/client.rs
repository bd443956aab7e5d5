//! HTTP client for the metrics source.
//!
//! One GET per acquisition, bounded by a timeout so a stalled exporter can
//! never wedge a monitor tick. Uses a raw http1 connection per request;
//! exporters are scraped at multi-second intervals, so connection reuse
//! buys nothing here.

use std::time::Duration;

use http_body_util::BodyExt;
use tracing::debug;
use url::Url;

use crate::error::{ExporterError, ExporterResult};
use crate::parse::{LagSample, discover_groups, parse_lag_samples};

/// Client for one-shot reads of a lag-metrics exposition endpoint.
#[derive(Debug, Clone)]
pub struct ExporterClient {
    /// Bound on the whole fetch (connect + request + body).
    timeout: Duration,
}

impl Default for ExporterClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ExporterClient {
    /// Create a client with the given per-fetch timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Fetch the source and return the lag samples for `group`, optionally
    /// restricted to one topic.
    pub async fn fetch_lag(
        &self,
        source_url: &str,
        group: &str,
        topic: Option<&str>,
    ) -> ExporterResult<Vec<LagSample>> {
        let text = self.fetch_text(source_url).await?;
        let samples: Vec<LagSample> = parse_lag_samples(&text, Some(group))
            .filter(|s| match topic {
                Some(wanted) => s.topic == wanted,
                None => true,
            })
            .collect();
        debug!(url = %source_url, %group, count = samples.len(), "lag samples acquired");
        Ok(samples)
    }

    /// Fetch the source and return every consumer group it reports
    /// (discovery mode).
    pub async fn fetch_groups(&self, source_url: &str) -> ExporterResult<Vec<String>> {
        let text = self.fetch_text(source_url).await?;
        Ok(discover_groups(&text))
    }

    /// One bounded HTTP GET, returning the body as text.
    async fn fetch_text(&self, source_url: &str) -> ExporterResult<String> {
        let parsed = Url::parse(source_url)
            .map_err(|e| ExporterError::InvalidUrl(format!("{source_url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ExporterError::InvalidUrl(format!("{source_url}: missing host")))?;
        let port = parsed.port_or_known_default().unwrap_or(80);
        let authority = format!("{host}:{port}");
        let path = match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        };

        let fetched = tokio::time::timeout(self.timeout, fetch_once(&authority, &path)).await;
        match fetched {
            Ok(result) => result,
            Err(_) => Err(ExporterError::Unreachable(format!(
                "{source_url}: timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

async fn fetch_once(authority: &str, path: &str) -> ExporterResult<String> {
    let stream = tokio::net::TcpStream::connect(authority)
        .await
        .map_err(|e| ExporterError::Unreachable(format!("connect {authority}: {e}")))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ExporterError::Unreachable(format!("handshake {authority}: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", authority)
        .header("user-agent", "lagscale-exporter/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .map_err(|e| ExporterError::Unreachable(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| ExporterError::Unreachable(format!("request {authority}: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ExporterError::Unreachable(format!(
            "{authority}{path}: status {status}"
        )));
    }

    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ExporterError::Unreachable(format!("body {authority}: {e}")))?
        .to_bytes();

    String::from_utf8(body.to_vec())
        .map_err(|e| ExporterError::MalformedResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serve a canned HTTP response on a loopback port; returns the URL.
    async fn spawn_stub(body: Vec<u8>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = stream.read(&mut buf).await;
                    let head = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\n\r\n",
                        body.len()
                    );
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(&body).await;
                });
            }
        });
        format!("http://{addr}/metrics")
    }

    const METRICS: &str = "\
kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t1\"} 300.0\n\
kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t2\"} 900\n\
kafka_consumergroup_lag_sum{consumergroup=\"g2\",topic=\"t1\"} 10\n\
malformed_line\n";

    #[tokio::test]
    async fn fetch_lag_filters_group() {
        let url = spawn_stub(METRICS.as_bytes().to_vec()).await;
        let client = ExporterClient::new(Duration::from_secs(2));

        let samples = client.fetch_lag(&url, "g1", None).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.group == "g1"));
    }

    #[tokio::test]
    async fn fetch_lag_applies_topic_filter() {
        let url = spawn_stub(METRICS.as_bytes().to_vec()).await;
        let client = ExporterClient::new(Duration::from_secs(2));

        let samples = client.fetch_lag(&url, "g1", Some("t2")).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].lag, 900.0);
    }

    #[tokio::test]
    async fn fetch_lag_no_match_is_empty_not_error() {
        let url = spawn_stub(METRICS.as_bytes().to_vec()).await;
        let client = ExporterClient::new(Duration::from_secs(2));

        let samples = client.fetch_lag(&url, "nobody", None).await.unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn fetch_groups_discovers_all() {
        let url = spawn_stub(METRICS.as_bytes().to_vec()).await;
        let client = ExporterClient::new(Duration::from_secs(2));

        let groups = client.fetch_groups(&url).await.unwrap();
        assert_eq!(groups, vec!["g1".to_string(), "g2".to_string()]);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let client = ExporterClient::new(Duration::from_millis(500));
        let err = client
            .fetch_lag("http://127.0.0.1:1/metrics", "g1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExporterError::Unreachable(_)));
    }

    #[tokio::test]
    async fn bad_url_is_invalid() {
        let client = ExporterClient::default();
        let err = client.fetch_lag("not a url", "g1", None).await.unwrap_err();
        assert!(matches!(err, ExporterError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn non_utf8_body_is_malformed() {
        let url = spawn_stub(vec![0xff, 0xfe, 0x00, 0x9f]).await;
        let client = ExporterClient::new(Duration::from_secs(2));

        let err = client.fetch_lag(&url, "g1", None).await.unwrap_err();
        assert!(matches!(err, ExporterError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn unresponsive_server_times_out() {
        // Listener that accepts but never responds.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = ExporterClient::new(Duration::from_millis(200));
        let err = client
            .fetch_lag(&format!("http://{addr}/metrics"), "g1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExporterError::Unreachable(_)));
    }
}
