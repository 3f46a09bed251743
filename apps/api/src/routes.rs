use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use leadline_core::{ConversationTurn, LeadContext, Role};
use leadline_error::{ErrorMetadataBuilder, LeadlineError};
use leadline_rag::{ChatEngine, HealthStatus, Indexer, VectorIndex};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

const INVALID_MESSAGES: &str = "Invalid messages format";
const NO_MESSAGE: &str = "No message provided";

/// 检索降级时附带的响应头
pub const DEGRADED_HEADER: &str = "x-retrieval-degraded";

/// 进程内共享的服务句柄，启动时构建一次
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    pub indexer: Arc<Indexer>,
    pub index: Arc<dyn VectorIndex>,
    pub default_lead: Arc<LeadContext>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/v1/documents/text", post(index_text))
        .route("/api/v1/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn invalid(reason: &str) -> LeadlineError {
    LeadlineError::InvalidRequest {
        reason: reason.to_string(),
    }
}

/// 按严重级别记录失败请求，返回原错误
fn log_failure(err: LeadlineError, metadata: ErrorMetadataBuilder) -> LeadlineError {
    err.log(&metadata.build(&err));
    err
}

#[derive(Deserialize)]
struct IncomingMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
}

/// 校验请求体并取出对话历史与线索
fn parse_chat_body(
    body: &serde_json::Value,
    default_lead: &LeadContext,
) -> Result<(Vec<ConversationTurn>, LeadContext), LeadlineError> {
    let messages = body
        .get("messages")
        .filter(|m| m.is_array())
        .ok_or_else(|| invalid(INVALID_MESSAGES))?;
    let messages: Vec<IncomingMessage> =
        serde_json::from_value(messages.clone()).map_err(|_| invalid(INVALID_MESSAGES))?;

    // 系统消息不作为待回答的问题
    let latest = messages
        .iter()
        .rev()
        .find(|m| m.role != Role::System)
        .and_then(|m| m.content.as_deref())
        .map(str::trim)
        .unwrap_or_default();
    if latest.is_empty() {
        return Err(invalid(NO_MESSAGE));
    }

    let history = messages
        .into_iter()
        .filter_map(|m| {
            m.content
                .filter(|c| !c.trim().is_empty())
                .map(|c| ConversationTurn::new(m.role, c))
        })
        .collect();

    let lead = match body.get("lead") {
        None | Some(serde_json::Value::Null) => default_lead.clone(),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| invalid(&format!("Invalid lead: {}", e)))?,
    };

    Ok((history, lead))
}

async fn chat(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, LeadlineError> {
    let (history, lead) = parse_chat_body(&body, &state.default_lead)?;

    let today = Utc::now().date_naive();
    let outcome = state
        .engine
        .respond(&lead, &history, today)
        .await
        .map_err(|e| {
            log_failure(
                e,
                ErrorMetadataBuilder::new("api")
                    .operation("chat")
                    .tenant_id(&lead.clinic_id),
            )
        })?;

    let mut response = Json(outcome.reply).into_response();
    if outcome.retrieval_degraded {
        response
            .headers_mut()
            .insert(DEGRADED_HEADER, HeaderValue::from_static("true"));
    }
    Ok(response)
}

#[derive(Deserialize)]
struct IndexTextReq {
    tenant_id: String,
    source: String,
    text: String,
}

async fn index_text(
    State(state): State<AppState>,
    Json(req): Json<IndexTextReq>,
) -> Result<Json<serde_json::Value>, LeadlineError> {
    if req.tenant_id.trim().is_empty() {
        return Err(invalid("tenant_id must not be empty"));
    }
    if req.text.trim().is_empty() {
        return Err(invalid("text must not be empty"));
    }
    let indexed = state
        .indexer
        .ingest_document(&req.tenant_id, &req.source, &req.text)
        .await
        .map_err(|e| {
            log_failure(
                e,
                ErrorMetadataBuilder::new("api")
                    .operation("index_text")
                    .tenant_id(&req.tenant_id)
                    .context("source", &req.source),
            )
        })?;
    info!(tenant_id = %req.tenant_id, source = %req.source, indexed, "document text indexed");
    Ok(Json(json!({ "indexed": indexed })))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let store = state
        .index
        .health_check()
        .await
        .unwrap_or_else(|e| HealthStatus::Unhealthy {
            error: e.to_string(),
        });
    let status = match &store {
        HealthStatus::Healthy => "ok",
        HealthStatus::Unhealthy { error } => {
            warn!(error = %error, "vector store unhealthy");
            "degraded"
        }
    };
    (
        StatusCode::OK,
        Json(json!({ "status": status, "vector_store": store })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::TimeZone;
    use leadline_core::{OpeningHours, ScoredPassage, Service, StructuredReply, TenantRecord};
    use leadline_error::Result;
    use leadline_llm::{ChatModel, EmbedModel};
    use leadline_rag::{IndexedPassage, MemoryIndex, PurgeScope, ResponseDriver, Retriever};
    use std::sync::Mutex;
    use tower::ServiceExt;

    const CLINIC: &str = "13945a21-28c0-49f9-a6c4-189d48351c4d";

    /// 关键词向量：第 i 维表示是否出现第 i 个词
    struct KeywordEmbed;

    const KEYWORDS: [&str; 5] = ["whiten", "hour", "speak", "accept", "polish"];

    #[async_trait]
    impl EmbedModel for KeywordEmbed {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    let mut v: Vec<f32> = KEYWORDS
                        .iter()
                        .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
                        .collect();
                    v.push(0.1);
                    v
                })
                .collect())
        }
    }

    /// 按系统指令中的上下文生成回复，模拟真实模型引用检索内容
    struct ContextEcho {
        raw_override: Option<String>,
        calls: Mutex<usize>,
    }

    impl ContextEcho {
        fn new() -> Self {
            Self {
                raw_override: None,
                calls: Mutex::new(0),
            }
        }

        fn raw(raw: &str) -> Self {
            Self {
                raw_override: Some(raw.to_string()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ContextEcho {
        async fn chat(&self, messages: &[ConversationTurn], _temperature: f32) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            if let Some(raw) = &self.raw_override {
                return Ok(raw.clone());
            }
            let system = &messages[0].content;
            let context = system
                .split("SERVICES & LOCATIONS CONTEXT:\n")
                .nth(1)
                .unwrap_or_default();
            let first = context.lines().next().unwrap_or_default();
            let response: String = format!("We can help with that. {}", first)
                .chars()
                .take(280)
                .collect();
            Ok(json!({
                "response": response,
                "thought_process": {
                    "reasoning": "Used clinic context",
                    "plan": "Offer a consultation",
                    "critique": "Availability not yet checked"
                }
            })
            .to_string())
        }

        fn model_name(&self) -> &str {
            "context-echo"
        }
    }

    struct UnreachableIndex;

    #[async_trait]
    impl VectorIndex for UnreachableIndex {
        async fn upsert(&self, _entries: Vec<IndexedPassage>) -> Result<usize> {
            Err(unreachable_store("upsert"))
        }
        async fn search(
            &self,
            _query: &[f32],
            _k: usize,
            _tenant_id: Option<&str>,
        ) -> Result<Vec<ScoredPassage>> {
            Err(unreachable_store("search"))
        }
        async fn purge(&self, _scope: &PurgeScope) -> Result<()> {
            Err(unreachable_store("delete"))
        }
        fn name(&self) -> &str {
            "unreachable"
        }
        async fn health_check(&self) -> Result<HealthStatus> {
            Ok(HealthStatus::Unhealthy {
                error: "connection refused".into(),
            })
        }
    }

    fn unreachable_store(op: &str) -> LeadlineError {
        LeadlineError::VectorStore {
            operation: op.into(),
            message: "connection refused".into(),
        }
    }

    fn clinic() -> TenantRecord {
        TenantRecord {
            clinic_id: CLINIC.into(),
            name: "Bright Smiles Dental Clinic".into(),
            description: "A modern dental clinic offering general and cosmetic dentistry.".into(),
            address: None,
            contact: None,
            services: vec![
                Service {
                    id: "svc_001".into(),
                    original_id: None,
                    title: "Routine Checkup".into(),
                    description: "Comprehensive dental examination.".into(),
                    price: 45.0,
                },
                Service {
                    id: "svc_003".into(),
                    original_id: None,
                    title: "Teeth Whitening".into(),
                    description: "Professional whitening treatment.".into(),
                    price: 200.0,
                },
            ],
            opening_hours: OpeningHours::default(),
            languages_spoken: vec!["English".into(), "Polish".into()],
            payment_methods: vec!["Cash".into()],
        }
    }

    fn lead() -> LeadContext {
        LeadContext {
            id: None,
            first_name: "John".into(),
            treatment: "Invisalign".into(),
            mobile: "+447911123456".into(),
            clinic_id: CLINIC.into(),
            submitted_at: Utc.with_ymd_and_hms(2025, 8, 1, 10, 0, 0).unwrap(),
        }
    }

    fn state_with(index: Arc<dyn VectorIndex>, chat: Arc<dyn ChatModel>) -> AppState {
        let embed: Arc<dyn EmbedModel> = Arc::new(KeywordEmbed);
        AppState {
            engine: Arc::new(ChatEngine::new(
                Retriever::new(embed.clone(), index.clone(), 5, 1_000),
                ResponseDriver::new(chat, 0.7, 1_000),
            )),
            indexer: Arc::new(Indexer::new(embed, index.clone(), 1_000)),
            index,
            default_lead: Arc::new(lead()),
        }
    }

    async fn seeded_state(chat: Arc<dyn ChatModel>) -> AppState {
        let state = state_with(Arc::new(MemoryIndex::new()), chat);
        state.indexer.reindex(&clinic()).await.unwrap();
        state
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_chat_answers_with_whitening_context() {
        let app = router(seeded_state(Arc::new(ContextEcho::new())).await);
        let response = app
            .oneshot(post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "Do you do whitening?"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(DEGRADED_HEADER).is_none());
        let reply: StructuredReply = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(reply.response.chars().count() <= 280);
        assert!(reply.response.contains("Whitening"));
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_messages() {
        let app = router(seeded_state(Arc::new(ContextEcho::new())).await);
        let response = app
            .oneshot(post_json("/api/chat", json!({"messages": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "No message provided");
    }

    #[tokio::test]
    async fn test_chat_rejects_non_array_messages() {
        let chat = Arc::new(ContextEcho::new());
        let app = router(seeded_state(chat.clone()).await);
        for body in [json!({}), json!({"messages": "hi"})] {
            let response = app.clone().oneshot(post_json("/api/chat", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_string(response).await, "Invalid messages format");
        }
        assert_eq!(*chat.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_chat_rejects_last_message_without_content() {
        let app = router(seeded_state(Arc::new(ContextEcho::new())).await);
        let response = app
            .oneshot(post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "hi"}, {"role": "assistant"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "No message provided");
    }

    #[tokio::test]
    async fn test_chat_survives_unreachable_index() {
        let app = router(state_with(Arc::new(UnreachableIndex), Arc::new(ContextEcho::new())));
        let response = app
            .oneshot(post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "Do you do whitening?"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(DEGRADED_HEADER).unwrap(), "true");
        let reply: StructuredReply = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(reply.response.contains("Unable to retrieve documents at this time."));
    }

    #[tokio::test]
    async fn test_chat_reports_non_json_completion() {
        let app = router(seeded_state(Arc::new(ContextEcho::raw("Yes, we do whitening."))).await);
        let response = app
            .oneshot(post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "Do you do whitening?"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_string(response).await;
        assert!(!body.contains("Yes, we do whitening."));
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(v["error"].is_string());
    }

    #[tokio::test]
    async fn test_chat_lead_override_selects_tenant() {
        let app = router(seeded_state(Arc::new(ContextEcho::new())).await);
        let response = app
            .oneshot(post_json(
                "/api/chat",
                json!({
                    "messages": [{"role": "user", "content": "Do you do whitening?"}],
                    "lead": {
                        "firstName": "Anna",
                        "treatment": "Veneers",
                        "mobile": "+447700900123",
                        "clinicId": "another-clinic",
                        "submittedAt": "2025-08-02T09:00:00Z"
                    }
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let reply: StructuredReply = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(reply.response.contains("No matching clinic information"));
    }

    #[tokio::test]
    async fn test_index_text_then_chat_finds_document() {
        let state = seeded_state(Arc::new(ContextEcho::new())).await;
        let response = router(state.clone())
            .oneshot(post_json(
                "/api/v1/documents/text",
                json!({
                    "tenant_id": CLINIC,
                    "source": "faq",
                    "text": "Our hygienists polish every patient's teeth after a checkup."
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let v: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(v["indexed"], 1);

        let response = router(state)
            .oneshot(post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "Do you polish teeth?"}]}),
            ))
            .await
            .unwrap();
        let reply: StructuredReply = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(reply.response.contains("hygienists polish"));
    }

    #[tokio::test]
    async fn test_index_text_repost_replaces_document_chunks() {
        let store = MemoryIndex::new();
        let state = state_with(Arc::new(store.clone()), Arc::new(ContextEcho::new()));
        state.indexer.reindex(&clinic()).await.unwrap();
        let record_passages = store.len().await;

        let long_text = (0..40)
            .map(|i| format!("Aftercare tip {}: rinse gently with salt water.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        for text in [long_text.as_str(), "Parking is free behind the clinic."] {
            let response = router(state.clone())
                .oneshot(post_json(
                    "/api/v1/documents/text",
                    json!({"tenant_id": CLINIC, "source": "faq", "text": text}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(store.len().await, record_passages + 1);
    }

    #[tokio::test]
    async fn test_chat_answers_last_user_turn_before_system_note() {
        let app = router(seeded_state(Arc::new(ContextEcho::new())).await);
        let response = app
            .oneshot(post_json(
                "/api/chat",
                json!({"messages": [
                    {"role": "user", "content": "Do you do whitening?"},
                    {"role": "system", "content": "Operator note: be brief"}
                ]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let reply: StructuredReply = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(reply.response.contains("Whitening"));
    }

    #[tokio::test]
    async fn test_chat_rejects_system_only_messages() {
        let chat = Arc::new(ContextEcho::new());
        let app = router(seeded_state(chat.clone()).await);
        let response = app
            .oneshot(post_json(
                "/api/chat",
                json!({"messages": [{"role": "system", "content": "You are a bot"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "No message provided");
        assert_eq!(*chat.calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_log_failure_passes_error_through() {
        let err = log_failure(
            invalid(NO_MESSAGE),
            ErrorMetadataBuilder::new("api")
                .operation("chat")
                .tenant_id(CLINIC),
        );
        assert_eq!(err.to_http_status(), 400);
        assert_eq!(err.user_message(), NO_MESSAGE);
    }

    #[tokio::test]
    async fn test_index_text_rejects_blank_text() {
        let app = router(seeded_state(Arc::new(ContextEcho::new())).await);
        let response = app
            .oneshot(post_json(
                "/api/v1/documents/text",
                json!({"tenant_id": CLINIC, "source": "faq", "text": "   "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_store_status() {
        let app = router(seeded_state(Arc::new(ContextEcho::new())).await);
        let response = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(v["status"], "ok");
        assert_eq!(v["vector_store"]["status"], "healthy");

        let app = router(state_with(Arc::new(UnreachableIndex), Arc::new(ContextEcho::new())));
        let response = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let v: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(v["status"], "degraded");
        assert_eq!(v["vector_store"]["error"], "connection refused");
    }
}
