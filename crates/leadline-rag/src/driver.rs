use leadline_core::{StructuredReply, MAX_RESPONSE_CHARS};
use leadline_error::{with_timeout, LeadlineError, Result};
use leadline_llm::ChatModel;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::prompt::PromptBundle;

/// 重试前的最长等待
const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

/// 原始输出写入错误时保留的最大长度
const RAW_EXCERPT_CHARS: usize = 500;

/// 调用对话模型并解析结构化回复
pub struct ResponseDriver {
    chat: Arc<dyn ChatModel>,
    temperature: f32,
    timeout_ms: u64,
}

impl ResponseDriver {
    pub fn new(chat: Arc<dyn ChatModel>, temperature: f32, timeout_ms: u64) -> Self {
        Self {
            chat,
            temperature,
            timeout_ms,
        }
    }

    /// 传输层可重试错误重试一次；输出格式错误不重试
    #[instrument(skip(self, bundle), fields(model = self.chat.model_name(), turns = bundle.history.len()))]
    pub async fn complete(&self, bundle: &PromptBundle) -> Result<StructuredReply> {
        let messages = bundle.messages();
        let start = Instant::now();

        let raw = match self.call(&messages).await {
            Ok(raw) => raw,
            Err(e) if e.is_retryable() => {
                let delay = e.retry_after().unwrap_or_default().min(MAX_RETRY_DELAY);
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "completion failed, retrying once");
                tokio::time::sleep(delay).await;
                self.call(&messages).await?
            }
            Err(e) => return Err(e),
        };

        let reply = parse_reply(&raw)?;
        info!(
            latency_ms = start.elapsed().as_millis() as u64,
            response_chars = reply.response.chars().count(),
            "completion parsed"
        );
        Ok(reply)
    }

    async fn call(&self, messages: &[leadline_core::ConversationTurn]) -> Result<String> {
        with_timeout(
            "chat_completion",
            self.timeout_ms,
            self.chat.chat(messages, self.temperature),
        )
        .await
    }
}

fn malformed(reason: impl Into<String>, raw: &str) -> LeadlineError {
    LeadlineError::MalformedModelOutput {
        reason: reason.into(),
        raw: raw.chars().take(RAW_EXCERPT_CHARS).collect(),
    }
}

/// 去掉模型偶尔包裹的 Markdown 代码块
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // 跳过 ```json 这类语言标记所在的首行
    match body.find('\n') {
        Some(idx) if !body[..idx].trim_start().starts_with('{') => body[idx + 1..].trim(),
        _ => body.trim(),
    }
}

/// 解析并校验模型输出
pub fn parse_reply(raw: &str) -> Result<StructuredReply> {
    let body = strip_code_fence(raw);
    let reply: StructuredReply = serde_json::from_str(body)
        .map_err(|e| malformed(format!("reply is not the expected JSON object: {}", e), raw))?;

    let response = reply.response.trim();
    if response.is_empty() {
        return Err(malformed("response is empty", raw));
    }
    let chars = response.chars().count();
    if chars > MAX_RESPONSE_CHARS {
        return Err(malformed(
            format!("response is {} characters, limit is {}", chars, MAX_RESPONSE_CHARS),
            raw,
        ));
    }

    Ok(reply)
}
