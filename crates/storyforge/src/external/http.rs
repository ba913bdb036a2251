//! Task-style HTTP client for the external generation service.

use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;

use crate::config::GenerationConfig;
use crate::error::{ConfigError, GenerationError, PollError, SubmissionError};
use crate::external::{GenerationApi, RemoteJobClient, RemoteStatus};
use crate::usage::Usage;

const REQUEST_ID_HEADER: &str = "X-Tt-Logid";

/// Maps a task body to a [`RemoteStatus`].
///
/// The status is read from `status`, falling back to `data.status`.
/// Unrecognised or missing statuses count as still running.
pub fn parse_task_status(body: &Value) -> RemoteStatus {
    if !body.is_object() {
        return RemoteStatus::Unknown;
    }
    let data = body.get("data");
    let status = body
        .get("status")
        .or_else(|| data.and_then(|d| d.get("status")))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_uppercase();

    match status.as_str() {
        "SUCCEEDED" | "COMPLETED" | "SUCCESS" => {
            let url = [body.get("content"), data]
                .into_iter()
                .flatten()
                .find_map(|v| {
                    v.get("video_url")
                        .or_else(|| v.get("url"))
                        .and_then(Value::as_str)
                })
                .map(str::to_string);
            RemoteStatus::Succeeded(url)
        }
        "FAILED" | "FAILURE" => {
            let reason = match (body.get("error"), data.and_then(|d| d.get("error"))) {
                (Some(error), _) => error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| value_text(error)),
                (None, Some(error)) => value_text(error),
                (None, None) => "Unknown failure".to_string(),
            };
            RemoteStatus::Failed(reason)
        }
        _ => RemoteStatus::Running,
    }
}

/// Extracts the task id from a submission response.
fn parse_task_id(body: &Value) -> Option<String> {
    let pick = |v: &Value| {
        v.get("id")
            .or_else(|| v.get("task_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    pick(body).or_else(|| body.get("data").and_then(pick))
}

fn value_text(v: &Value) -> String {
    v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())
}

/// Blocking client for `{base_url}/contents/generations/tasks`.
///
/// Must be called from a blocking context (a plain thread or a tokio
/// blocking task), never from inside an async task.
pub struct HttpTaskClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl HttpTaskClient {
    pub fn from_config(config: &GenerationConfig) -> Result<Self, ConfigError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ConfigError::Validation {
                message: "generation.base_url is required for the HTTP task client".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ConfigError::Validation {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            log::warn!(
                "{} is not set; requests to {} are unauthenticated",
                config.api_key_env,
                base_url
            );
        }

        Ok(Self {
            client,
            base_url,
            api_key,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            max_wait: Duration::from_secs(config.max_wait_secs),
        })
    }

    fn tasks_url(&self) -> String {
        format!("{}/contents/generations/tasks", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

impl RemoteJobClient for HttpTaskClient {
    fn submit(&self, payload: &Value) -> Result<String, SubmissionError> {
        let response = self
            .authorized(self.client.post(self.tasks_url()))
            .json(payload)
            .send()
            .map_err(|e| SubmissionError::new(format!("request failed: {e}")))?;

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SubmissionError::new(format!(
                "HTTP {status}: {body} (request {request_id})"
            )));
        }

        let body: Value = response
            .json()
            .map_err(|e| SubmissionError::new(format!("malformed response: {e}")))?;
        let task_id = parse_task_id(&body).ok_or_else(|| {
            SubmissionError::new(format!("no task id in response (request {request_id})"))
        })?;

        log::info!("Submitted task {} (request {})", task_id, request_id);
        Ok(task_id)
    }

    fn poll_status(&self, remote_handle: &str) -> Result<RemoteStatus, PollError> {
        let url = format!("{}/{}", self.tasks_url(), remote_handle);
        let response = self
            .authorized(self.client.get(url))
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| PollError(e.to_string()))?;
        let body: Value = response.json().map_err(|e| PollError(e.to_string()))?;
        Ok(parse_task_status(&body))
    }
}

impl GenerationApi for HttpTaskClient {
    /// Submits and then polls until the task is terminal or `max_wait` elapses.
    fn generate(&self, payload: &Value) -> (Result<String, GenerationError>, Usage) {
        let usage = Usage::call();
        let handle = match self.submit(payload) {
            Ok(handle) => handle,
            Err(e) => return (Err(e.into()), usage),
        };

        let deadline = Instant::now() + self.max_wait;
        loop {
            match self.poll_status(&handle) {
                Ok(RemoteStatus::Succeeded(Some(url))) => return (Ok(url), usage),
                Ok(RemoteStatus::Succeeded(None)) => {
                    let error = GenerationError::new("task succeeded without an artifact")
                        .with_request_id(handle);
                    return (Err(error), usage);
                }
                Ok(RemoteStatus::Failed(reason)) => {
                    return (Err(GenerationError::new(reason).with_request_id(handle)), usage)
                }
                Ok(RemoteStatus::Running | RemoteStatus::Unknown) => {}
                Err(e) => log::warn!("Polling task {} failed: {}", handle, e),
            }

            if Instant::now() >= deadline {
                let error = GenerationError::new("polling timeout").with_request_id(handle);
                return (Err(error), usage);
            }
            thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_succeeded_reads_content_url() {
        let body = json!({"status": "succeeded", "content": {"video_url": "https://cdn/v.mp4"}});
        assert_eq!(
            parse_task_status(&body),
            RemoteStatus::Succeeded(Some("https://cdn/v.mp4".to_string()))
        );
    }

    #[test]
    fn test_succeeded_falls_back_to_data() {
        let body = json!({"data": {"status": "completed", "url": "https://cdn/d.mp4"}});
        assert_eq!(
            parse_task_status(&body),
            RemoteStatus::Succeeded(Some("https://cdn/d.mp4".to_string()))
        );
        assert_eq!(
            parse_task_status(&json!({"status": "SUCCESS"})),
            RemoteStatus::Succeeded(None)
        );
    }

    #[test]
    fn test_failed_reasons() {
        assert_eq!(
            parse_task_status(&json!({"status": "FAILED", "error": {"message": "nsfw"}})),
            RemoteStatus::Failed("nsfw".to_string())
        );
        assert_eq!(
            parse_task_status(&json!({"status": "failure", "data": {"error": "quota"}})),
            RemoteStatus::Failed("quota".to_string())
        );
        assert_eq!(
            parse_task_status(&json!({"status": "FAILED"})),
            RemoteStatus::Failed("Unknown failure".to_string())
        );
    }

    #[test]
    fn test_other_statuses_are_running() {
        assert_eq!(
            parse_task_status(&json!({"status": "queued"})),
            RemoteStatus::Running
        );
        assert_eq!(parse_task_status(&json!({})), RemoteStatus::Running);
        assert_eq!(parse_task_status(&json!("oops")), RemoteStatus::Unknown);
    }

    #[test]
    fn test_parse_task_id() {
        assert_eq!(parse_task_id(&json!({"id": "t1"})), Some("t1".to_string()));
        assert_eq!(
            parse_task_id(&json!({"data": {"task_id": "t2"}})),
            Some("t2".to_string())
        );
        assert_eq!(parse_task_id(&json!({"ok": true})), None);
    }

    #[test]
    fn test_client_requires_base_url() {
        assert!(HttpTaskClient::from_config(&GenerationConfig::default()).is_err());
        let client = HttpTaskClient::from_config(&GenerationConfig {
            base_url: "https://api.example.com/v3/".to_string(),
            ..GenerationConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.tasks_url(),
            "https://api.example.com/v3/contents/generations/tasks"
        );
    }
}
