use leadline_core::ScoredPassage;
use leadline_error::{with_timeout, LeadlineError, Result};
use leadline_llm::EmbedModel;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::index::VectorIndex;

pub const DEFAULT_TOP_K: usize = 5;

/// 检索结果：区分“没有匹配”与“检索失败”
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    /// 按距离升序，长度不超过 k，可能为空
    Found(Vec<ScoredPassage>),
    /// 嵌入或向量库不可用，调用方以无上下文模式继续
    Failed { reason: String },
}

impl RetrievalOutcome {
    pub fn passages(&self) -> &[ScoredPassage] {
        match self {
            RetrievalOutcome::Found(p) => p,
            RetrievalOutcome::Failed { .. } => &[],
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, RetrievalOutcome::Failed { .. })
    }
}

pub struct Retriever {
    embed: Arc<dyn EmbedModel>,
    index: Arc<dyn VectorIndex>,
    default_k: usize,
    timeout_ms: u64,
}

impl Retriever {
    pub fn new(
        embed: Arc<dyn EmbedModel>,
        index: Arc<dyn VectorIndex>,
        default_k: usize,
        timeout_ms: u64,
    ) -> Self {
        Self {
            embed,
            index,
            default_k,
            timeout_ms,
        }
    }

    /// 检索租户内与查询最相近的片段，任何失败都不会向调用方抛出
    #[instrument(skip(self, query))]
    pub async fn retrieve(&self, query: &str, tenant_id: &str, k: Option<usize>) -> RetrievalOutcome {
        let k = k.unwrap_or(self.default_k);
        match self.try_retrieve(query, tenant_id, k).await {
            Ok(hits) => {
                tracing::info!(results_count = hits.len(), "retrieval completed");
                RetrievalOutcome::Found(hits)
            }
            Err(e) => {
                warn!(error = %e, "retrieval failed, continuing without context");
                RetrievalOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_retrieve(&self, query: &str, tenant_id: &str, k: usize) -> Result<Vec<ScoredPassage>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = with_timeout(
            "embed_query",
            self.timeout_ms,
            self.embed.embed(&[query.to_string()]),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| LeadlineError::EmbeddingService {
            provider: "retriever".to_string(),
            message: "no embedding returned for query".to_string(),
            retry_after: None,
        })?;

        let mut hits = with_timeout(
            "vector_search",
            self.timeout_ms,
            self.index.search(&query_embedding, k, Some(tenant_id)),
        )
        .await?;

        // 向量库过滤之外再校验一次租户，跨租户泄漏的片段直接丢弃
        let before = hits.len();
        hits.retain(|h| h.passage.meta.tenant_id == tenant_id);
        if hits.len() != before {
            warn!(
                dropped = before - hits.len(),
                "vector store returned passages from another tenant"
            );
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }
}
