//! Remote agent adapter. Invokes an agent service over HTTP.
//!
//! POST {base_url}/agents/{capability}/invoke
//! Headers:
//!   authorization: Bearer {api_key}   (when configured)
//!   content-type: application/json
//! Body: `{"capability": ..., "input": {...}}`
//! Response: the [`AgentInvocation`] envelope.

use async_trait::async_trait;
use std::time::Duration;

use super::{Agent, AgentError, AgentInvocation, Capability};

#[derive(Debug, Clone)]
pub struct HttpAgentConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Client-side request timeout. The invoker applies its own bound on top.
    pub request_timeout: Duration,
}

impl Default for HttpAgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl HttpAgentConfig {
    /// Read `BAGGAGE_AGENT_URL` / `BAGGAGE_AGENT_API_KEY`.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("BAGGAGE_AGENT_URL").ok()?;
        Some(Self {
            base_url,
            api_key: std::env::var("BAGGAGE_AGENT_API_KEY").ok(),
            ..Default::default()
        })
    }
}

pub struct HttpAgent {
    config: HttpAgentConfig,
    client: reqwest::Client,
}

impl HttpAgent {
    pub fn new(config: HttpAgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    pub fn endpoint(&self, capability: Capability) -> String {
        format!(
            "{}/agents/{}/invoke",
            self.config.base_url.trim_end_matches('/'),
            capability.as_str()
        )
    }
}

#[async_trait]
impl Agent for HttpAgent {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(
        &self,
        capability: Capability,
        input: &serde_json::Value,
    ) -> Result<AgentInvocation, AgentError> {
        let url = self.endpoint(capability);
        let body = serde_json::json!({
            "capability": capability.as_str(),
            "input": input,
        });

        tracing::debug!("[HttpAgent] POST {}", url);

        let mut request = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout(self.config.request_timeout.as_millis() as u64)
            } else {
                AgentError::Remote {
                    message: format!("HTTP request failed: {}", e),
                    retryable: e.is_connect() || e.is_request(),
                }
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| AgentError::Remote {
            message: format!("Failed to read response body: {}", e),
            retryable: true,
        })?;

        if !status.is_success() {
            return Err(AgentError::Remote {
                message: format!("agent service returned {}: {}", status, text),
                retryable: status.is_server_error() || status.as_u16() == 429,
            });
        }

        serde_json::from_str::<AgentInvocation>(&text)
            .map_err(|e| AgentError::InvalidOutput(format!("malformed envelope: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one request with the given status line and body.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}", addr)
    }

    fn agent(base_url: String) -> HttpAgent {
        HttpAgent::new(HttpAgentConfig {
            base_url,
            api_key: Some("secret".into()),
            request_timeout: Duration::from_secs(5),
        })
    }

    #[test]
    fn test_endpoint() {
        let agent = agent("http://agents.local/".into());
        assert_eq!(
            agent.endpoint(Capability::RouteOptimization),
            "http://agents.local/agents/route_optimization/invoke"
        );
    }

    #[tokio::test]
    async fn test_parses_envelope() {
        let url = serve_once(
            "200 OK",
            r#"{"result":{"risk_score":55.0},"confidence":0.8,"status":"success","duration_ms":12}"#,
        )
        .await;
        let inv = agent(url)
            .invoke(Capability::Prediction, &serde_json::json!({"flight_id": "CM101"}))
            .await
            .unwrap();
        assert_eq!(inv.result["risk_score"], 55.0);
        assert_eq!(inv.duration_ms, 12);
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let url = serve_once("503 Service Unavailable", r#"{"error":"overloaded"}"#).await;
        let err = agent(url)
            .invoke(Capability::Prediction, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_is_final() {
        let url = serve_once("400 Bad Request", r#"{"error":"missing flight_id"}"#).await;
        let err = agent(url)
            .invoke(Capability::Prediction, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
