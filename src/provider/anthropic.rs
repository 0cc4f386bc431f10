//! Anthropic messages adapter. Auth via `x-api-key` (usually `"ENV"` →
//! `ANTHROPIC_API_KEY`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::error::OrchestratorError;
use crate::model::{AnalysisRequest, ProviderDescriptor};

use super::{
    build_prompt, classify_status, classify_transport, descriptor_from_settings, http_client,
    parse_model_content, ProviderClient, RawAnalysis,
};

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    descriptor: ProviderDescriptor,
}

impl AnthropicClient {
    pub fn from_settings(settings: &ProviderSettings) -> anyhow::Result<Self> {
        let api_key = settings
            .resolved_api_key()?
            .ok_or_else(|| anyhow::anyhow!("provider '{}' needs an api_key", settings.id))?;
        Ok(Self {
            http: http_client(settings.timeout_secs),
            api_key,
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| "claude-3-5-haiku-latest".to_string()),
            descriptor: descriptor_from_settings(settings),
        })
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, request: &AnalysisRequest) -> Result<RawAnalysis, OrchestratorError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            system: &'a str,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            content: Vec<Block>,
        }
        #[derive(Deserialize)]
        struct Block {
            #[serde(default)]
            text: String,
        }

        let (system, user) = build_prompt(request);
        let req = Req {
            model: &self.model,
            max_tokens: 1024,
            system: &system,
            messages: vec![Msg {
                role: "user",
                content: &user,
            }],
        };

        let resp = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
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
                detail: format!("anthropic body: {e}"),
            })?;
        let content = body.content.first().map(|b| b.text.as_str()).unwrap_or("");
        parse_model_content(content)
    }
}
