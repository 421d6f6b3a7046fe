//! HTTP transport for cost plugins.
//!
//! `initialize` probes `GET {endpoint}/health`; `fetch_cost_data` posts the
//! fetch parameters to `{endpoint}/cost/get-data` and decodes the response
//! body as JSON lines, one [`CostBatch`] per line, as bytes arrive.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use costsync_core::config::PluginConfig;
use costsync_core::PluginInfo;

use crate::error::PluginError;
use crate::plugin::{CostBatch, CostStream, FetchRequest, PluginManager, ResolvedEndpoint};

pub struct HttpPluginManager {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpPluginManager {
    pub fn new(config: &PluginConfig) -> Result<Self, PluginError> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        // Only the connect phase is bounded here; the body of a fetch can
        // legitimately stream for a long time.
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| PluginError::Connection {
                endpoint: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client, request_timeout })
    }

    fn url(endpoint: &str, path: &str) -> Result<Url, PluginError> {
        let base = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{endpoint}/")
        };
        Url::parse(&base)
            .and_then(|u| u.join(path))
            .map_err(|e| PluginError::Connection {
                endpoint: endpoint.to_string(),
                reason: format!("invalid endpoint: {e}"),
            })
    }

    async fn check_status(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response, PluginError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        debug!(endpoint, status = status.as_u16(), "plugin returned an error status");
        Err(PluginError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl PluginManager for HttpPluginManager {
    async fn resolve_endpoint(
        &self,
        plugin_info: &PluginInfo,
        _domain_id: &str,
    ) -> Result<ResolvedEndpoint, PluginError> {
        let endpoint = plugin_info
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| PluginError::NoEndpoint {
                plugin_id: plugin_info.plugin_id.clone(),
            })?;
        Self::url(&endpoint, "")?;
        // Statically configured endpoints never report upgrades.
        Ok(ResolvedEndpoint {
            endpoint,
            updated_version: None,
        })
    }

    async fn initialize(&self, endpoint: &str, _options: &Map<String, Value>) -> Result<(), PluginError> {
        let url = Self::url(endpoint, "health")?;
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| PluginError::Connection {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        Self::check_status(endpoint, response).await?;
        Ok(())
    }

    async fn fetch_cost_data(&self, endpoint: &str, request: FetchRequest) -> Result<CostStream, PluginError> {
        let url = Self::url(endpoint, "cost/get-data")?;
        debug!(endpoint, "requesting cost data");
        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| PluginError::Connection {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        let response = Self::check_status(endpoint, response).await?;
        Ok(decode_json_lines(response.bytes_stream()))
    }
}

fn parse_line(line: &[u8]) -> Option<Result<CostBatch, PluginError>> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(e) => return Some(Err(PluginError::Data(format!("batch is not UTF-8: {e}")))),
    };
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).map_err(|e| PluginError::Data(format!("malformed batch: {e}"))))
}

/// Decode a byte stream of newline-delimited JSON batches.
///
/// Buffers at most one incomplete line. The stream ends after the first
/// error.
pub fn decode_json_lines<S, E>(bytes: S) -> CostStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    struct State<S> {
        bytes: std::pin::Pin<Box<S>>,
        buffer: Vec<u8>,
        done: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                match parse_line(&line) {
                    Some(Err(e)) => {
                        state.done = true;
                        state.buffer.clear();
                        return Some((Err(e), state));
                    }
                    Some(item) => return Some((item, state)),
                    None => continue,
                }
            }
            if state.done {
                let rest = std::mem::take(&mut state.buffer);
                return parse_line(&rest).map(|item| (item, state));
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.done = true;
                    state.buffer.clear();
                    return Some((Err(PluginError::Interrupted(e.to_string())), state));
                }
                None => state.done = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let owned: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from(p.to_string()))).collect();
        stream::iter(owned)
    }

    #[tokio::test]
    async fn decodes_lines_split_across_chunks() {
        let stream = decode_json_lines(chunks(&[
            r#"{"results":[{"cost":1,"billed_at":"2023-01-01T00:00:00Z"}]}"#,
            "\n\n{\"results\":",
            r#"[{"cost":2,"billed_at":"2023-01-02T00:00:00Z"}]}"#,
        ]));
        let batches: Vec<_> = stream.collect().await;
        assert_eq!(batches.len(), 2);
        let second = batches[1].as_ref().unwrap();
        assert_eq!(second.results[0].cost, Some(2.0));
    }

    #[tokio::test]
    async fn malformed_line_ends_the_stream() {
        let stream = decode_json_lines(chunks(&["{\"results\":[]}\nnot json\n{\"results\":[]}\n"]));
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(PluginError::Data(_))));
    }

    #[tokio::test]
    async fn transport_error_is_interrupted() {
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"results\":[]}\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let items: Vec<_> = decode_json_lines(stream::iter(parts)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Err(PluginError::Interrupted(m)) if m.contains("reset")));
    }

    #[test]
    fn url_joins_paths() {
        let url = HttpPluginManager::url("http://plugin:8080/v1", "cost/get-data").unwrap();
        assert_eq!(url.as_str(), "http://plugin:8080/v1/cost/get-data");
        assert!(HttpPluginManager::url("not a url", "health").is_err());
    }

    #[tokio::test]
    async fn resolve_requires_endpoint() {
        let manager = HttpPluginManager::new(&PluginConfig { request_timeout_secs: 1 }).unwrap();
        let info = PluginInfo {
            plugin_id: "aws-cost".into(),
            ..Default::default()
        };
        let err = manager.resolve_endpoint(&info, "domain-1").await.unwrap_err();
        assert!(matches!(err, PluginError::NoEndpoint { .. }));
    }
}
