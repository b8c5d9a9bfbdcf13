use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::provider::{ModelError, ModelProvider, ModelSession, ViewPrediction};
use crate::config::ModelConfig;
use crate::error::{Result, RunnerError};

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
    #[serde(default)]
    device: Option<String>,
}

/// Model provider backed by a model server speaking a small JSON protocol:
/// `POST /sessions`, `POST /sessions/{id}/views`, `DELETE /sessions/{id}`.
#[derive(Debug, Clone)]
pub struct HttpModelProvider {
    http: Client,
    endpoint: String,
    name: String,
    weights_path: Option<PathBuf>,
    device: Option<String>,
}

impl HttpModelProvider {
    /// Build from config. Weights, if configured, must exist locally.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let weights_path = config.resolved_weights_path();
        if let Some(weights) = &weights_path {
            if !weights.exists() {
                return Err(RunnerError::ModelUnavailable(format!(
                    "weights file not found: {}",
                    weights.display()
                )));
            }
            tracing::info!(weights = %weights.display(), "Using weights path");
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RunnerError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            name: config.name.clone(),
            weights_path,
            device: config.device.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ModelProvider for HttpModelProvider {
    type Session = HttpModelSession;

    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<HttpModelSession> {
        tracing::info!(model = %self.name, endpoint = %self.endpoint, "Loading model");

        let body = json!({
            "model": self.name,
            "weights_path": self.weights_path,
            "device": self.device,
        });
        let url = format!("{}/sessions", self.endpoint);
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RunnerError::ModelUnavailable(format!("cannot reach model server at {}: {}", url, e))
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(RunnerError::ModelUnavailable(format!(
                "model server refused to load '{}' (HTTP {}): {}",
                self.name, status, text
            )));
        }

        let session: SessionResponse = resp.json().await.map_err(|e| {
            RunnerError::ModelUnavailable(format!("invalid session response: {}", e))
        })?;
        let device = session
            .device
            .or_else(|| self.device.clone())
            .unwrap_or_else(|| "unknown".to_string());

        tracing::info!(session_id = %session.session_id, device = %device, "Model loaded");
        Ok(HttpModelSession {
            http: self.http.clone(),
            endpoint: self.endpoint.clone(),
            session_id: session.session_id,
            device,
        })
    }
}

/// A model loaded on the server.
#[derive(Debug)]
pub struct HttpModelSession {
    http: Client,
    endpoint: String,
    session_id: String,
    device: String,
}

impl HttpModelSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl ModelSession for HttpModelSession {
    fn device(&self) -> &str {
        &self.device
    }

    async fn infer(&self, file: &Path, filename: &str) -> std::result::Result<ViewPrediction, ModelError> {
        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| ModelError::Read(file.display().to_string(), e.to_string()))?;
        let body = json!({
            "filename": filename,
            "dicom_b64": base64::engine::general_purpose::STANDARD.encode(&bytes),
        });

        let url = format!("{}/sessions/{}/views", self.endpoint, self.session_id);
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Connection(self.endpoint.clone(), e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::Server(status, text));
        }

        resp.json::<ViewPrediction>()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))
    }

    async fn close(self) -> std::result::Result<(), ModelError> {
        let url = format!("{}/sessions/{}", self.endpoint, self.session_id);
        let resp = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| ModelError::Connection(self.endpoint.clone(), e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::Server(status, text));
        }
        tracing::debug!(session_id = %self.session_id, "Model session released");
        Ok(())
    }
}
