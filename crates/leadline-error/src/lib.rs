use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// 系统统一错误类型
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum LeadlineError {
    // === 业务错误 ===
    #[error("请求无效: {reason}")]
    InvalidRequest { reason: String },

    // === 外部服务错误 ===
    #[error("向量存储错误: {operation} 失败")]
    VectorStore { operation: String, message: String },

    #[error("LLM 服务错误 ({provider})")]
    LlmService {
        provider: String,
        message: String,
        #[serde(skip)]
        retry_after: Option<Duration>,
    },

    #[error("嵌入服务错误 ({provider})")]
    EmbeddingService {
        provider: String,
        message: String,
        #[serde(skip)]
        retry_after: Option<Duration>,
    },

    #[error("模型输出格式错误: {reason}")]
    MalformedModelOutput { reason: String, raw: String },

    #[error("网络错误: {operation}")]
    Network { operation: String, message: String },

    #[error("超时错误: {operation} 超过 {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // === 系统错误 ===
    #[error("配置错误: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("序列化错误: {format}")]
    Serialization { format: String, message: String },
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // 可预期的业务错误
    Medium,   // 技术错误但不影响核心功能
    High,     // 影响核心功能的错误
    Critical, // 系统级严重错误
}

/// 错误元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_id: String,
    pub severity: ErrorSeverity,
    pub component: String,
    pub operation: Option<String>,
    pub tenant_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub context: std::collections::HashMap<String, String>,
}

impl LeadlineError {
    /// 获取错误的严重级别
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            LeadlineError::InvalidRequest { .. } => ErrorSeverity::Low,
            LeadlineError::LlmService { .. } | LeadlineError::EmbeddingService { .. } => {
                ErrorSeverity::Medium
            }
            LeadlineError::Network { .. } | LeadlineError::Timeout { .. } => ErrorSeverity::Medium,
            LeadlineError::VectorStore { .. }
            | LeadlineError::MalformedModelOutput { .. }
            | LeadlineError::Serialization { .. } => ErrorSeverity::High,
            LeadlineError::Configuration { .. } => ErrorSeverity::Critical,
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        match self {
            LeadlineError::Network { .. } | LeadlineError::Timeout { .. } => true,
            LeadlineError::LlmService { retry_after, .. }
            | LeadlineError::EmbeddingService { retry_after, .. } => retry_after.is_some(),
            _ => false,
        }
    }

    /// 获取重试延迟时间
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LeadlineError::LlmService { retry_after, .. }
            | LeadlineError::EmbeddingService { retry_after, .. } => *retry_after,
            LeadlineError::Network { .. } => Some(Duration::from_millis(500)),
            LeadlineError::Timeout { .. } => Some(Duration::from_millis(1000)),
            _ => None,
        }
    }

    /// 记录错误日志
    pub fn log(&self, metadata: &ErrorMetadata) {
        match metadata.severity {
            ErrorSeverity::Low => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    tenant_id = ?metadata.tenant_id,
                    error = %self,
                    "request rejected"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    tenant_id = ?metadata.tenant_id,
                    error = %self,
                    context = ?metadata.context,
                    "upstream error"
                );
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    tenant_id = ?metadata.tenant_id,
                    error = %self,
                    context = ?metadata.context,
                    severity = ?metadata.severity,
                    "request failed"
                );
            }
        }
    }

    /// 转换为 HTTP 状态码
    pub fn to_http_status(&self) -> u16 {
        match self {
            LeadlineError::InvalidRequest { .. } => 400,
            LeadlineError::LlmService { .. } | LeadlineError::MalformedModelOutput { .. } => 502,
            LeadlineError::Timeout { .. } => 504,
            _ => 500,
        }
    }

    /// 获取用户友好的错误消息
    pub fn user_message(&self) -> String {
        match self {
            LeadlineError::InvalidRequest { reason } => reason.clone(),
            LeadlineError::LlmService { .. } => "The assistant is unavailable right now".to_string(),
            LeadlineError::MalformedModelOutput { .. } => {
                "The assistant returned an unreadable reply".to_string()
            }
            LeadlineError::Timeout { .. } => "Upstream request timed out".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

/// 创建错误元数据的便捷构造器
pub struct ErrorMetadataBuilder {
    metadata: ErrorMetadata,
}

impl ErrorMetadataBuilder {
    pub fn new(component: &str) -> Self {
        Self {
            metadata: ErrorMetadata {
                error_id: uuid::Uuid::new_v4().to_string(),
                severity: ErrorSeverity::Medium,
                component: component.to_string(),
                operation: None,
                tenant_id: None,
                timestamp: chrono::Utc::now(),
                context: std::collections::HashMap::new(),
            },
        }
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.metadata.operation = Some(operation.to_string());
        self
    }

    pub fn tenant_id(mut self, tenant_id: &str) -> Self {
        self.metadata.tenant_id = Some(tenant_id.to_string());
        self
    }

    pub fn context(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .context
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(mut self, error: &LeadlineError) -> ErrorMetadata {
        self.metadata.severity = error.severity();
        self.metadata
    }
}

pub type Result<T> = std::result::Result<T, LeadlineError>;

// === 转换实现 ===

impl From<serde_json::Error> for LeadlineError {
    fn from(err: serde_json::Error) -> Self {
        LeadlineError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for LeadlineError {
    fn from(err: serde_yaml::Error) -> Self {
        LeadlineError::Serialization {
            format: "yaml".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for LeadlineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LeadlineError::Timeout {
                operation: "http_request".to_string(),
                timeout_ms: 30000, // 默认超时时间
            }
        } else if err.is_connect() {
            LeadlineError::Network {
                operation: "connect".to_string(),
                message: err.to_string(),
            }
        } else {
            LeadlineError::Network {
                operation: "http_request".to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<qdrant_client::QdrantError> for LeadlineError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        LeadlineError::VectorStore {
            operation: "qdrant_client".to_string(),
            message: err.to_string(),
        }
    }
}

/// 为外部调用加上超时上限，超时转换为 [`LeadlineError::Timeout`]
pub async fn with_timeout<T, F>(operation: &str, timeout_ms: u64, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(res) => res,
        Err(_) => Err(LeadlineError::Timeout {
            operation: operation.to_string(),
            timeout_ms,
        }),
    }
}

// Axum integration
#[cfg(feature = "axum")]
impl IntoResponse for LeadlineError {
    fn into_response(self) -> axum::response::Response {
        let status_code =
            StatusCode::from_u16(self.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // 客户端输入错误以纯文本返回原因
        if let LeadlineError::InvalidRequest { reason } = self {
            return (status_code, reason).into_response();
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "message": self.user_message()
        });

        (status_code, Json(body)).into_response()
    }
}
