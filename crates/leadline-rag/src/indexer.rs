use leadline_core::{Passage, TenantRecord};
use leadline_error::{with_timeout, LeadlineError, Result};
use leadline_llm::EmbedModel;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::chunker::{chunk_document, chunk_tenant_record};
use crate::index::{IndexedPassage, PurgeScope, VectorIndex};

/// 单次嵌入请求的最大输入条数
const EMBED_BATCH_SIZE: usize = 64;

/// 嵌入片段并写入向量索引
///
/// 片段 id 由 (tenant_id, type, sub_id) 确定，重复索引会覆盖旧条目。
/// 任一嵌入或写入失败都会中止整批，不记录部分成功。
pub struct Indexer {
    embed: Arc<dyn EmbedModel>,
    index: Arc<dyn VectorIndex>,
    timeout_ms: u64,
}

impl Indexer {
    pub fn new(embed: Arc<dyn EmbedModel>, index: Arc<dyn VectorIndex>, timeout_ms: u64) -> Self {
        Self {
            embed,
            index,
            timeout_ms,
        }
    }

    /// 逐批嵌入，全部成功后才返回
    async fn embed_all(&self, passages: &[Passage]) -> Result<Vec<IndexedPassage>> {
        let mut entries = Vec::with_capacity(passages.len());
        for batch in passages.chunks(EMBED_BATCH_SIZE) {
            let inputs: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors =
                with_timeout("embed_passages", self.timeout_ms, self.embed.embed(&inputs)).await?;
            if vectors.len() != batch.len() {
                return Err(LeadlineError::EmbeddingService {
                    provider: "indexer".to_string(),
                    message: format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        vectors.len()
                    ),
                    retry_after: None,
                });
            }
            entries.extend(batch.iter().cloned().zip(vectors).map(|(passage, vector)| {
                IndexedPassage { passage, vector }
            }));
        }
        Ok(entries)
    }

    #[instrument(skip(self, passages), fields(count = passages.len(), store = self.index.name()))]
    pub async fn index(&self, passages: &[Passage]) -> Result<usize> {
        if passages.is_empty() {
            return Ok(0);
        }

        let entries = self.embed_all(passages).await?;
        let upserted =
            with_timeout("upsert_passages", self.timeout_ms, self.index.upsert(entries)).await?;
        info!(upserted, "indexed passages");
        Ok(upserted)
    }

    /// 写入新片段后清理 `scope` 中未被覆盖的旧条目
    async fn replace(&self, passages: &[Passage], scope: PurgeScope) -> Result<usize> {
        let upserted = self.index(passages).await?;
        with_timeout("purge_passages", self.timeout_ms, self.index.purge(&scope)).await?;
        Ok(upserted)
    }

    /// 用最新的租户记录替换记录派生的片段
    ///
    /// 嵌入或写入失败时旧片段保持不变；已导入的文档片段不受影响。
    #[instrument(skip(self, record), fields(tenant_id = %record.clinic_id))]
    pub async fn reindex(&self, record: &TenantRecord) -> Result<usize> {
        let passages = chunk_tenant_record(record);
        let keep = passages.iter().map(|p| p.id).collect();
        self.replace(&passages, PurgeScope::record(&record.clinic_id, keep))
            .await
    }

    /// 导入一段文档；同一来源再次导入时替换旧切片
    #[instrument(skip(self, text), fields(tenant_id = %tenant_id, source = %source))]
    pub async fn ingest_document(&self, tenant_id: &str, source: &str, text: &str) -> Result<usize> {
        let passages = chunk_document(tenant_id, source, text);
        if passages.is_empty() {
            return Err(LeadlineError::InvalidRequest {
                reason: "text is empty".to_string(),
            });
        }
        let keep = passages.iter().map(|p| p.id).collect();
        self.replace(&passages, PurgeScope::document(tenant_id, source, keep))
            .await
    }
}
