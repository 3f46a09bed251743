use async_trait::async_trait;
use leadline_core::{Passage, PassageKind, ScoredPassage};
use leadline_error::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 已嵌入、待写入向量库的片段
#[derive(Debug, Clone)]
pub struct IndexedPassage {
    pub passage: Passage,
    pub vector: Vec<f32>,
}

/// 清理旧片段的范围
///
/// 命中条件：同一租户、类型属于 `kinds`、来源等于 `source`（若指定），
/// 且 id 不在 `keep` 中。
#[derive(Debug, Clone, PartialEq)]
pub struct PurgeScope {
    pub tenant_id: String,
    pub kinds: Vec<PassageKind>,
    pub source: Option<String>,
    pub keep: Vec<Uuid>,
}

impl PurgeScope {
    /// 租户记录派生的片段，文档片段不受影响
    pub fn record(tenant_id: &str, keep: Vec<Uuid>) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            kinds: PassageKind::RECORD_KINDS.to_vec(),
            source: None,
            keep,
        }
    }

    /// 某个来源的文档片段
    pub fn document(tenant_id: &str, source: &str, keep: Vec<Uuid>) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            kinds: vec![PassageKind::Document],
            source: Some(source.to_string()),
            keep,
        }
    }

    pub fn covers(&self, passage: &Passage) -> bool {
        let meta = &passage.meta;
        meta.tenant_id == self.tenant_id
            && self.kinds.contains(&meta.kind)
            && self
                .source
                .as_deref()
                .map_or(true, |s| meta.source.as_deref() == Some(s))
            && !self.keep.contains(&passage.id)
    }
}

/// 向量索引的统一抽象接口
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 按片段 id 覆盖写入，返回写入条数
    async fn upsert(&self, entries: Vec<IndexedPassage>) -> Result<usize>;

    /// k 近邻搜索（余弦距离），`tenant_id` 为等值过滤条件
    ///
    /// 返回结果按距离升序排列，长度不超过 `k`。
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        tenant_id: Option<&str>,
    ) -> Result<Vec<ScoredPassage>>;

    /// 删除 `scope` 覆盖的片段
    async fn purge(&self, scope: &PurgeScope) -> Result<()>;

    fn name(&self) -> &str;

    /// 健康检查
    async fn health_check(&self) -> Result<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }
}

/// 索引健康状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy { error: String },
}

/// 余弦距离 `1 - cos(a, b)`，零向量视为最远
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }

    let mut dot_product = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    let len = a.len().min(b.len());
    for i in 0..len {
        dot_product += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - dot_product / (norm_a.sqrt() * norm_b.sqrt())
}
