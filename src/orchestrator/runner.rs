use crate::error::{AppError, Result};
use crate::models::{HttpMethod, WorkflowStep};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;

/// Classified result of one step attempt
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// 2xx with a JSON body (or none)
    Success { output: Value },
    /// Never retried: 4xx, or 2xx with a body that is not JSON
    Terminal { error: String, raw_body: Option<String> },
    /// Retried: 5xx, 408, 429, timeouts, connection errors
    Transient { error: String },
}

impl StepOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Success { .. } => "success",
            StepOutcome::Terminal { .. } => "terminal",
            StepOutcome::Transient { .. } => "transient",
        }
    }

    /// Map an HTTP status and body to an outcome
    pub fn classify(status: StatusCode, body: String) -> Self {
        if status.is_success() {
            if body.trim().is_empty() {
                return StepOutcome::Success { output: Value::Null };
            }
            return match serde_json::from_str::<Value>(&body) {
                Ok(output) => StepOutcome::Success { output },
                Err(_) => StepOutcome::Terminal {
                    error: format!("{} with a non-JSON body", status),
                    raw_body: Some(body),
                },
            };
        }

        let error = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, truncate(&body, 500))
        };

        match status {
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                StepOutcome::Transient { error }
            }
            s if s.is_server_error() => StepOutcome::Transient { error },
            _ => StepOutcome::Terminal {
                error,
                raw_body: None,
            },
        }
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Performs one attempt of a step against its service
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: &WorkflowStep, url: &Url, timeout: Duration) -> StepOutcome;
}

/// Calls steps over HTTP with reqwest
#[derive(Clone)]
pub struct HttpStepRunner {
    client: Client,
}

impl HttpStepRunner {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("opsgraph/", env!("CARGO_PKG_VERSION")))
            // Redirects could leave the allow-list
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StepRunner for HttpStepRunner {
    async fn run(&self, step: &WorkflowStep, url: &Url, timeout: Duration) -> StepOutcome {
        let method = match step.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut request = self
            .client
            .request(method, url.clone())
            .timeout(timeout)
            .header("X-Opsgraph-Step", step.step_id.as_str());
        if step.method != HttpMethod::Get && !step.payload.is_null() {
            request = request.json(&step.payload);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return StepOutcome::Transient {
                    error: format!("timed out after {}s", timeout.as_secs_f64()),
                }
            }
            Err(e) if e.is_connect() || e.is_request() => {
                return StepOutcome::Transient {
                    error: format!("connection failed: {}", e),
                }
            }
            Err(e) => {
                return StepOutcome::Terminal {
                    error: format!("request failed: {}", e),
                    raw_body: None,
                }
            }
        };

        let status = response.status();
        match response.text().await {
            Ok(body) => StepOutcome::classify(status, body),
            Err(e) if e.is_timeout() => StepOutcome::Transient {
                error: format!("timed out reading response after {}s", timeout.as_secs_f64()),
            },
            Err(e) => StepOutcome::Transient {
                error: format!("failed to read response: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification() {
        assert_eq!(
            StepOutcome::classify(StatusCode::OK, r#"{"ok":true}"#.into()),
            StepOutcome::Success { output: json!({"ok": true}) }
        );
        assert_eq!(
            StepOutcome::classify(StatusCode::NO_CONTENT, String::new()),
            StepOutcome::Success { output: Value::Null }
        );
        assert!(matches!(
            StepOutcome::classify(StatusCode::OK, "<html>".into()),
            StepOutcome::Terminal { raw_body: Some(_), .. }
        ));
        assert!(matches!(
            StepOutcome::classify(StatusCode::NOT_FOUND, String::new()),
            StepOutcome::Terminal { .. }
        ));
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert!(matches!(
                StepOutcome::classify(status, String::new()),
                StepOutcome::Transient { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_http_runner_posts_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/scale")
            .match_header("x-opsgraph-step", "scale")
            .match_body(mockito::Matcher::Json(json!({"replicas": 3})))
            .with_status(200)
            .with_body(r#"{"scaled":true}"#)
            .create_async()
            .await;

        let mut step = WorkflowStep::new("scale", format!("{}/scale", server.url()));
        step.payload = json!({"replicas": 3});
        let url = Url::parse(&step.service_url).unwrap();

        let outcome = HttpStepRunner::new()
            .unwrap()
            .run(&step, &url, Duration::from_secs(5))
            .await;
        assert_eq!(outcome, StepOutcome::Success { output: json!({"scaled": true}) });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_runner_connection_refused_is_transient() {
        let step = WorkflowStep::new("down", "http://127.0.0.1:9/");
        let url = Url::parse(&step.service_url).unwrap();
        let outcome = HttpStepRunner::new()
            .unwrap()
            .run(&step, &url, Duration::from_secs(2))
            .await;
        assert!(matches!(outcome, StepOutcome::Transient { .. }));
    }
}
