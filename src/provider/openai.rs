//! OpenAI chat-completions adapter. Requires an API key (usually via the
//! `"ENV"` indirection → `OPENAI_API_KEY`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::error::OrchestratorError;
use crate::model::{AnalysisRequest, ProviderDescriptor};

use super::{
    build_prompt, classify_status, classify_transport, descriptor_from_settings, http_client,
    parse_model_content, ProviderClient, RawAnalysis,
};

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    descriptor: ProviderDescriptor,
}

impl OpenAiClient {
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
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            descriptor: descriptor_from_settings(settings),
        })
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
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
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let (system, user) = build_prompt(request);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &system,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.2,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
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
                detail: format!("openai body: {e}"),
            })?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        parse_model_content(content)
    }
}
