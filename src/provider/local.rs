//! Self-hosted (Ollama-style) adapter for the economy tier. No API key;
//! the host comes from `base_url` in the provider settings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::error::OrchestratorError;
use crate::model::{AnalysisRequest, ProviderDescriptor};

use super::{
    build_prompt, classify_status, classify_transport, descriptor_from_settings, http_client,
    parse_model_content, ProviderClient, RawAnalysis,
};

pub struct LocalClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    descriptor: ProviderDescriptor,
}

impl LocalClient {
    pub fn from_settings(settings: &ProviderSettings) -> anyhow::Result<Self> {
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:11434".to_string());
        Ok(Self {
            http: http_client(settings.timeout_secs),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| "llama3.1:8b".to_string()),
            descriptor: descriptor_from_settings(settings),
        })
    }
}

#[async_trait]
impl ProviderClient for LocalClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, request: &AnalysisRequest) -> Result<RawAnalysis, OrchestratorError> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            system: &'a str,
            prompt: &'a str,
            stream: bool,
            format: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            response: String,
        }

        let (system, user) = build_prompt(request);
        let req = Req {
            model: &self.model,
            system: &system,
            prompt: &user,
            stream: false,
            format: "json",
        };

        let resp = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| OrchestratorError::MalformedResponse {
                detail: format!("local body: {e}"),
            })?;
        parse_model_content(&body.response)
    }
}
