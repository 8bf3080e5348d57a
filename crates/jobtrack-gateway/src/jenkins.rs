//! Jenkins gateway.
//!
//! Triggers parameterized builds through the remote `buildWithParameters`
//! endpoint and reads status and console output through the JSON API.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use jobtrack_config::EngineConfig;
use jobtrack_core::{
    BuildKey, BuildStatus, Error, ExecutionGateway, Result, StatusSnapshot, TriggeredBuild,
    logs::tail_lines,
};
use reqwest::header::LOCATION;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Ceiling for a running build's estimated progress.
const MAX_RUNNING_PROGRESS: f64 = 90.0;

/// Longest slice of an engine error body carried into error messages.
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid engine url '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Build data returned by `/job/<name>/<n>/api/json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JenkinsBuild {
    result: Option<String>,
    /// Start time in epoch milliseconds.
    timestamp: Option<i64>,
    duration: Option<i64>,
    estimated_duration: Option<i64>,
}

/// Gateway over a Jenkins server.
pub struct JenkinsGateway {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
    trigger_token: Option<String>,
    health_timeout: Duration,
    typical_build_duration: Duration,
}

impl JenkinsGateway {
    /// Create a gateway from engine settings.
    ///
    /// Every request is bounded by `config.timeout`; the health check by
    /// `config.health_timeout`.
    pub fn new(config: &EngineConfig) -> std::result::Result<Self, GatewayError> {
        let url = url::Url::parse(&config.url).map_err(|e| GatewayError::InvalidUrl {
            url: config.url.clone(),
            message: e.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("jobtrack/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let base_url = url.as_str().trim_end_matches('/').to_string();
        info!(url = %base_url, authenticated = config.credentials().is_some(), "Configured Jenkins gateway");

        Ok(Self {
            client,
            base_url,
            credentials: config
                .credentials()
                .map(|(user, secret)| (user.to_string(), secret.to_string())),
            trigger_token: config.token.clone().filter(|t| !t.is_empty()),
            health_timeout: config.health_timeout,
            typical_build_duration: config.typical_build_duration,
        })
    }

    fn job_url(&self, job_name: &str) -> String {
        format!("{}/{}", self.base_url, job_path(job_name))
    }

    fn build_url(&self, key: &BuildKey) -> String {
        format!("{}/{}", self.job_url(&key.job_name), key.build_number)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, secret)) => request.basic_auth(user, Some(secret)),
            None => request,
        }
    }

    fn snapshot(&self, build: JenkinsBuild, now: DateTime<Utc>) -> StatusSnapshot {
        let status = map_result(build.result.as_deref());
        let started_at = build
            .timestamp
            .filter(|ts| *ts > 0)
            .and_then(DateTime::from_timestamp_millis);

        let progress_percent = if status.is_terminal() {
            100.0
        } else {
            started_at
                .map(|start| estimate_progress(start, now, self.typical_build_duration))
                .unwrap_or(0.0)
        };

        let expected_ms = if status.is_terminal() {
            build.duration
        } else {
            build.estimated_duration
        };
        // Engine-reported durations are untrusted; out-of-range ones yield no estimate.
        let estimated_end_at = match (started_at, expected_ms) {
            (Some(start), Some(ms)) if ms > 0 => TimeDelta::try_milliseconds(ms)
                .and_then(|expected| start.checked_add_signed(expected)),
            _ => None,
        };

        StatusSnapshot {
            status,
            progress_percent,
            started_at,
            estimated_end_at,
        }
    }
}

#[async_trait]
impl ExecutionGateway for JenkinsGateway {
    fn name(&self) -> &'static str {
        "jenkins"
    }

    async fn trigger(
        &self,
        job_name: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<TriggeredBuild> {
        let url = format!("{}/buildWithParameters", self.job_url(job_name));

        let mut form: Vec<(&str, &str)> = parameters
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if let Some(token) = &self.trigger_token {
            form.push(("token", token.as_str()));
        }

        debug!(job = %job_name, parameters = ?parameters.keys().collect::<Vec<_>>(), "Triggering build");

        let response = self
            .authorize(self.client.post(&url))
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::TriggerFailed(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(job = %job_name, %status, "Engine rejected trigger");
            return Err(Error::TriggerFailed(format!(
                "engine returned {}: {}",
                status,
                truncate(&text)
            )));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let build_number = extract_build_number(&location).ok_or_else(|| {
            error!(job = %job_name, %location, "Build started but its number could not be resolved");
            Error::BuildNumberUnresolved {
                location: location.clone(),
            }
        })?;

        info!(job = %job_name, build = build_number, "Triggered build");

        Ok(TriggeredBuild {
            job_name: job_name.to_string(),
            build_number,
            engine_url: format!("{}/{}", self.job_url(job_name), build_number),
        })
    }

    async fn poll_status(&self, key: &BuildKey) -> Result<StatusSnapshot> {
        let url = format!("{}/api/json", self.build_url(key));

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Error::PollFailed(format!("request to {} failed: {}", url, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(Error::NotFound(format!("build {}", key))),
            status if !status.is_success() => {
                warn!(build = %key, %status, "Status poll failed");
                return Err(Error::PollFailed(format!("engine returned {}", status)));
            }
            _ => {}
        }

        let build: JenkinsBuild = response
            .json()
            .await
            .map_err(|e| Error::PollFailed(format!("invalid build data for {}: {}", key, e)))?;

        Ok(self.snapshot(build, Utc::now()))
    }

    async fn fetch_logs(&self, key: &BuildKey, tail: Option<usize>) -> Result<String> {
        let url = format!("{}/consoleText", self.build_url(key));

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Error::FetchFailed(format!("request to {} failed: {}", url, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(Error::NotFound(format!("logs for build {}", key))),
            status if !status.is_success() => {
                warn!(build = %key, %status, "Log fetch failed");
                return Err(Error::FetchFailed(format!("engine returned {}", status)));
            }
            _ => {}
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::FetchFailed(format!("reading logs for {}: {}", key, e)))?;

        Ok(match tail {
            Some(n) => tail_lines(&text, n).to_string(),
            None => text,
        })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/json", self.base_url);
        match self
            .authorize(self.client.get(&url))
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Jenkins health check failed");
                false
            }
        }
    }
}

/// URL path for a job. Folder-style names `a/b` map to `job/a/job/b`.
pub fn job_path(job_name: &str) -> String {
    job_name
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| format!("job/{}", urlencoding::encode(segment)))
        .collect::<Vec<_>>()
        .join("/")
}

/// The build number is the last path segment of the engine's location
/// reference, e.g. `http://jenkins/job/scan/123/`.
pub fn extract_build_number(location: &str) -> Option<u64> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse::<u64>().ok())
        .filter(|n| *n > 0)
}

/// Map a Jenkins build result onto the lifecycle status.
///
/// No result means the build is still running.
pub fn map_result(result: Option<&str>) -> BuildStatus {
    match result {
        None => BuildStatus::InProgress,
        Some("SUCCESS") => BuildStatus::Success,
        Some("FAILURE") | Some("UNSTABLE") => BuildStatus::Failure,
        Some("ABORTED") | Some("NOT_BUILT") => BuildStatus::Aborted,
        Some(other) => {
            warn!(result = %other, "Unknown Jenkins result, treating as failure");
            BuildStatus::Failure
        }
    }
}

/// Estimate progress of a running build from elapsed time against a typical
/// build duration, clamped to `[0, 90]`.
pub fn estimate_progress(started_at: DateTime<Utc>, now: DateTime<Utc>, typical: Duration) -> f64 {
    let typical_ms = typical.as_millis() as f64;
    if typical_ms <= 0.0 {
        return 0.0;
    }
    let elapsed_ms = (now - started_at).num_milliseconds() as f64;
    (elapsed_ms / typical_ms * 100.0).clamp(0.0, MAX_RUNNING_PROGRESS)
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
