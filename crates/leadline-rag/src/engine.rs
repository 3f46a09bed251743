use chrono::NaiveDate;
use leadline_core::{ConversationTurn, LeadContext, Role, StructuredReply};
use leadline_error::{LeadlineError, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::driver::ResponseDriver;
use crate::prompt::assemble;
use crate::retriever::Retriever;

/// 单次对话请求的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOutcome {
    pub reply: StructuredReply,
    /// 检索失败、以无上下文模式生成
    pub retrieval_degraded: bool,
    pub passages_used: usize,
}

/// 请求级流水线：检索 → 组装提示词 → 生成回复
///
/// 不保存跨请求的可变状态，各客户端句柄在启动时注入。
pub struct ChatEngine {
    retriever: Retriever,
    driver: ResponseDriver,
}

impl ChatEngine {
    pub fn new(retriever: Retriever, driver: ResponseDriver) -> Self {
        Self { retriever, driver }
    }

    #[instrument(skip(self, lead, history), fields(tenant_id = %lead.clinic_id, turns = history.len()))]
    pub async fn respond(
        &self,
        lead: &LeadContext,
        history: &[ConversationTurn],
        today: NaiveDate,
    ) -> Result<ChatOutcome> {
        // 提示词不含系统消息，检索也以最后一条非系统消息为准
        let query = history
            .iter()
            .rev()
            .find(|t| t.role != Role::System)
            .map(|t| t.content.trim())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LeadlineError::InvalidRequest {
                reason: "No message provided".to_string(),
            })?;

        let retrieval = self.retriever.retrieve(query, &lead.clinic_id, None).await;
        let bundle = assemble(lead, &retrieval, history, today);
        let reply = self.driver.complete(&bundle).await?;

        let outcome = ChatOutcome {
            reply,
            retrieval_degraded: retrieval.is_degraded(),
            passages_used: retrieval.passages().len(),
        };
        info!(
            degraded = outcome.retrieval_degraded,
            passages = outcome.passages_used,
            "chat turn completed"
        );
        Ok(outcome)
    }
}
