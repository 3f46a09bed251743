use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

use leadline_core::config::{ChatCfg, EmbedCfg};
use leadline_core::{read_env, ConversationTurn};
pub use leadline_error::{LeadlineError, Result};

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// 按顺序发送带角色的消息，返回一段补全文本
    async fn chat(&self, messages: &[ConversationTurn], temperature: f32) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[async_trait]
pub trait EmbedModel: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ========== OpenAI-compatible ==========

#[derive(Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: String,                // e.g. https://api.openai.com
    pub api_key: String,                 // Bearer token
    pub chat_model: String,              // e.g. gpt-4o
    pub embedding_model: Option<String>, // e.g. text-embedding-3-small
    pub timeout_ms: u64,
}

#[derive(Clone)]
pub struct OpenAiCompatClient {
    http: Client,
    cfg: OpenAiCompatConfig,
}

impl OpenAiCompatClient {
    pub fn new(cfg: OpenAiCompatConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| LeadlineError::Configuration {
                key: "http_client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { http, cfg })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn transport_error(&self, e: reqwest::Error) -> LeadlineError {
        if e.is_timeout() {
            LeadlineError::Timeout {
                operation: "http_request".to_string(),
                timeout_ms: self.cfg.timeout_ms,
            }
        } else {
            LeadlineError::Network {
                operation: "http_request".to_string(),
                message: e.to_string(),
            }
        }
    }
}

/// 429 和 5xx 视为暂时性故障
fn upstream_retry_after(status: StatusCode) -> Option<Duration> {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(Duration::from_secs(1))
    } else {
        None
    }
}

#[derive(Serialize)]
struct OaiChatReqMsg<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct OaiChatReq<'a> {
    model: &'a str,
    messages: Vec<OaiChatReqMsg<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct OaiChatRespChoiceMsg {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OaiChatRespChoice {
    message: OaiChatRespChoiceMsg,
}

#[derive(Deserialize)]
struct OaiChatResp {
    choices: Vec<OaiChatRespChoice>,
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    #[instrument(skip(self, messages), fields(model = %self.cfg.chat_model, turns = messages.len()))]
    async fn chat(&self, messages: &[ConversationTurn], temperature: f32) -> Result<String> {
        let body = OaiChatReq {
            model: &self.cfg.chat_model,
            messages: messages
                .iter()
                .map(|m| OaiChatReqMsg {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature,
        };

        let resp = self
            .http
            .post(self.url("/v1/chat/completions"))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(LeadlineError::LlmService {
                provider: "openai_compat".to_string(),
                message: format!("status={} body={}", status, txt),
                retry_after: upstream_retry_after(status),
            });
        }

        let data: OaiChatResp = resp.json().await.map_err(|e| LeadlineError::LlmService {
            provider: "openai_compat".to_string(),
            message: format!("unreadable completion envelope: {}", e),
            retry_after: None,
        })?;
        data.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LeadlineError::LlmService {
                provider: "openai_compat".to_string(),
                message: "completion contained no message content".to_string(),
                retry_after: None,
            })
    }

    fn model_name(&self) -> &str {
        &self.cfg.chat_model
    }
}

#[derive(Serialize)]
struct OaiEmbedReq<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OaiEmbedData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OaiEmbedResp {
    data: Vec<OaiEmbedData>,
}

#[async_trait]
impl EmbedModel for OpenAiCompatClient {
    #[instrument(skip(self, texts), fields(inputs = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self
            .cfg
            .embedding_model
            .as_deref()
            .ok_or_else(|| LeadlineError::Configuration {
                key: "embedding_model".to_string(),
                reason: "not configured".to_string(),
            })?;
        let body = OaiEmbedReq {
            model,
            input: texts,
        };

        let resp = self
            .http
            .post(self.url("/v1/embeddings"))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(LeadlineError::EmbeddingService {
                provider: "openai_compat".to_string(),
                message: format!("status={} body={}", status, txt),
                retry_after: upstream_retry_after(status),
            });
        }

        let mut data: OaiEmbedResp =
            resp.json().await.map_err(|e| LeadlineError::EmbeddingService {
                provider: "openai_compat".to_string(),
                message: format!("unreadable embedding envelope: {}", e),
                retry_after: None,
            })?;
        if data.data.len() != texts.len() {
            return Err(LeadlineError::EmbeddingService {
                provider: "openai_compat".to_string(),
                message: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    data.data.len()
                ),
                retry_after: None,
            });
        }
        data.data.sort_by_key(|d| d.index);
        Ok(data.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ========== Provider Factory ==========

pub struct Providers {
    pub chat: Box<dyn ChatModel>,
    pub embed: Box<dyn EmbedModel>,
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub fn make_providers(chat: &ChatCfg, embed: &EmbedCfg) -> Result<Providers> {
    let chat_box: Box<dyn ChatModel> = match chat.kind.as_str() {
        "openai_compat" => Box::new(OpenAiCompatClient::new(OpenAiCompatConfig {
            base_url: chat
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            api_key: read_env(chat.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY"))?,
            chat_model: chat.model.clone(),
            embedding_model: None,
            timeout_ms: chat.timeout_ms,
        })?),
        other => {
            return Err(LeadlineError::Configuration {
                key: "chat_provider.kind".to_string(),
                reason: format!("unsupported chat provider kind={}", other),
            })
        }
    };

    let embed_box: Box<dyn EmbedModel> = match embed.kind.as_str() {
        "openai_compat" => Box::new(OpenAiCompatClient::new(OpenAiCompatConfig {
            base_url: embed
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            api_key: read_env(embed.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY"))?,
            chat_model: String::new(),
            embedding_model: Some(embed.model.clone()),
            timeout_ms: embed.timeout_ms,
        })?),
        other => {
            return Err(LeadlineError::Configuration {
                key: "embedding_provider.kind".to_string(),
                reason: format!("unsupported embedding provider kind={}", other),
            })
        }
    };

    Ok(Providers {
        chat: chat_box,
        embed: embed_box,
    })
}
