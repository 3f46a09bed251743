use async_trait::async_trait;
use leadline_core::{Passage, ScoredPassage};
use leadline_error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::index::{cosine_distance, IndexedPassage, PurgeScope, VectorIndex};

/// 内存中的索引条目
#[derive(Debug, Clone)]
struct MemoryEntry {
    passage: Passage,
    vector: Vec<f32>,
}

/// 基于内存的向量索引，过滤语义与 Qdrant 实现一致
#[derive(Clone, Default)]
pub struct MemoryIndex {
    entries: Arc<RwLock<HashMap<Uuid, MemoryEntry>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取当前索引的片段数量
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn upsert(&self, entries: Vec<IndexedPassage>) -> Result<usize> {
        let count = entries.len();
        let mut map = self.entries.write().await;
        for IndexedPassage { passage, vector } in entries {
            map.insert(passage.id, MemoryEntry { passage, vector });
        }
        tracing::debug!(upserted = count, total = map.len(), "memory index upsert");
        Ok(count)
    }

    #[instrument(skip(self, query))]
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        tenant_id: Option<&str>,
    ) -> Result<Vec<ScoredPassage>> {
        let map = self.entries.read().await;

        let mut scored: Vec<ScoredPassage> = map
            .values()
            .filter(|e| tenant_id.map_or(true, |t| e.passage.meta.tenant_id == t))
            .map(|e| ScoredPassage {
                distance: cosine_distance(query, &e.vector),
                passage: e.passage.clone(),
            })
            .collect();

        // 距离相同时按 id 排序，保证结果稳定
        scored.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.passage.id.cmp(&b.passage.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn purge(&self, scope: &PurgeScope) -> Result<()> {
        let mut map = self.entries.write().await;
        let before = map.len();
        map.retain(|_, e| !scope.covers(&e.passage));
        tracing::info!(
            tenant_id = %scope.tenant_id,
            removed = before - map.len(),
            "purged passages from memory index"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
