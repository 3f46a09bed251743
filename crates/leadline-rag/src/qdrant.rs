use async_trait::async_trait;
use leadline_core::{Passage, PassageMeta, ScoredPassage};
use leadline_error::{LeadlineError, Result};
use qdrant_client::{
    qdrant::{
        value::Kind, Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
        DeletePointsBuilder, Distance, FieldType, Filter, PointStruct, SearchPointsBuilder,
        UpsertPointsBuilder, Value, VectorParamsBuilder,
    },
    Payload, Qdrant,
};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

use crate::index::{HealthStatus, IndexedPassage, PurgeScope, VectorIndex};

const TEXT_KEY: &str = "text";
const TENANT_KEY: &str = "tenant_id";
const NAMESPACE_KEY: &str = "namespace";
const KIND_KEY: &str = "type";
const SOURCE_KEY: &str = "source";

/// 基于 Qdrant 的向量索引
///
/// 片段元数据平铺在 payload 中，`tenant_id` 建有 keyword 索引用于过滤。
/// 配置了 namespace 时，写入和查询都带上该字段。
pub struct QdrantIndex {
    client: Qdrant,
    collection_name: String,
    namespace: Option<String>,
}

impl QdrantIndex {
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection_name: String,
        namespace: Option<String>,
    ) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .map_err(|e| LeadlineError::VectorStore {
                operation: "connect".to_string(),
                message: format!("Failed to connect to Qdrant: {}", e),
            })?;
        Ok(Self {
            client,
            collection_name,
            namespace,
        })
    }

    /// 确保 collection 存在，维度取自第一批向量
    async fn ensure_collection(&self, vector_size: usize) -> Result<()> {
        if self.client.collection_exists(&self.collection_name).await? {
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name).vectors_config(
                    VectorParamsBuilder::new(vector_size as u64, Distance::Cosine).build(),
                ),
            )
            .await
            .map_err(|e| LeadlineError::VectorStore {
                operation: "create_collection".to_string(),
                message: format!(
                    "Failed to create collection {}: {}",
                    self.collection_name, e
                ),
            })?;

        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                &self.collection_name,
                TENANT_KEY,
                FieldType::Keyword,
            ))
            .await?;

        info!(
            collection = %self.collection_name,
            vector_size,
            "Created Qdrant collection"
        );
        Ok(())
    }

    fn payload(&self, passage: &Passage) -> Result<Payload> {
        let mut json = serde_json::to_value(&passage.meta)?;
        if let serde_json::Value::Object(map) = &mut json {
            map.insert(TEXT_KEY.into(), passage.text.clone().into());
            if let Some(ns) = &self.namespace {
                map.insert(NAMESPACE_KEY.into(), ns.clone().into());
            }
        }
        Ok(Payload::try_from(json)?)
    }
}

/// 检索过滤条件：租户与 namespace 均为等值匹配
fn search_filter(tenant_id: Option<&str>, namespace: Option<&str>) -> Option<Filter> {
    let mut must = Vec::new();
    if let Some(tenant) = tenant_id {
        must.push(Condition::matches(TENANT_KEY, tenant.to_string()));
    }
    if let Some(ns) = namespace {
        must.push(Condition::matches(NAMESPACE_KEY, ns.to_string()));
    }
    if must.is_empty() {
        None
    } else {
        Some(Filter::must(must))
    }
}

/// 清理旧片段的过滤条件，`keep` 中的 id 放进 must_not
fn purge_filter(scope: &PurgeScope, namespace: Option<&str>) -> Filter {
    let mut must = vec![Condition::matches(TENANT_KEY, scope.tenant_id.clone())];
    if let Some(ns) = namespace {
        must.push(Condition::matches(NAMESPACE_KEY, ns.to_string()));
    }
    let kinds: Vec<String> = scope.kinds.iter().map(|k| k.as_str().to_string()).collect();
    must.push(Condition::matches(KIND_KEY, kinds));
    if let Some(source) = &scope.source {
        must.push(Condition::matches(SOURCE_KEY, source.clone()));
    }

    let mut filter = Filter::must(must);
    if !scope.keep.is_empty() {
        filter
            .must_not
            .push(Condition::has_id(scope.keep.iter().map(|id| id.to_string())));
    }
    filter
}

/// 把 Qdrant payload 值转换为 JSON
fn to_json(value: Value) -> serde_json::Value {
    match value.kind {
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(f)) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(to_json).collect())
        }
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields.into_iter().map(|(k, v)| (k, to_json(v))).collect(),
        ),
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
    }
}

fn decode_passage(payload: HashMap<String, Value>) -> Option<Passage> {
    let mut map: serde_json::Map<String, serde_json::Value> =
        payload.into_iter().map(|(k, v)| (k, to_json(v))).collect();
    let text = match map.remove(TEXT_KEY) {
        Some(serde_json::Value::String(t)) => t,
        _ => return None,
    };
    map.remove(NAMESPACE_KEY);
    match serde_json::from_value::<PassageMeta>(serde_json::Value::Object(map)) {
        Ok(meta) => Some(Passage::new(text, meta)),
        Err(e) => {
            warn!("Failed to deserialize passage payload: {}. Skipping.", e);
            None
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    #[instrument(skip(self, entries), fields(collection = %self.collection_name, count = entries.len()))]
    async fn upsert(&self, entries: Vec<IndexedPassage>) -> Result<usize> {
        let Some(first) = entries.first() else {
            return Ok(0);
        };
        self.ensure_collection(first.vector.len()).await?;

        let mut points = Vec::with_capacity(entries.len());
        for IndexedPassage { passage, vector } in &entries {
            points.push(PointStruct::new(
                passage.id.to_string(),
                vector.clone(),
                self.payload(passage)?,
            ));
        }

        let count = points.len();
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points).wait(true))
            .await
            .map_err(|e| LeadlineError::VectorStore {
                operation: "upsert_points".to_string(),
                message: format!("Failed to upsert points: {}", e),
            })?;
        Ok(count)
    }

    #[instrument(skip(self, query), fields(collection = %self.collection_name))]
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        tenant_id: Option<&str>,
    ) -> Result<Vec<ScoredPassage>> {
        let mut request =
            SearchPointsBuilder::new(&self.collection_name, query.to_vec(), k as u64)
                .with_payload(true);
        if let Some(filter) = search_filter(tenant_id, self.namespace.as_deref()) {
            request = request.filter(filter);
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| LeadlineError::VectorStore {
                operation: "search".to_string(),
                message: format!("Failed to search points: {}", e),
            })?;

        // Qdrant 的 cosine 分数是相似度，转换为距离
        let mut hits: Vec<ScoredPassage> = response
            .result
            .into_iter()
            .filter_map(|point| {
                let score = point.score;
                decode_passage(point.payload).map(|passage| ScoredPassage {
                    passage,
                    distance: 1.0 - score,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    #[instrument(skip(self, scope), fields(collection = %self.collection_name, tenant_id = %scope.tenant_id))]
    async fn purge(&self, scope: &PurgeScope) -> Result<()> {
        if !self.client.collection_exists(&self.collection_name).await? {
            return Ok(());
        }
        let filter = purge_filter(scope, self.namespace.as_deref());
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(filter)
                    .wait(true),
            )
            .await
            .map_err(|e| LeadlineError::VectorStore {
                operation: "delete_points".to_string(),
                message: format!("Failed to purge passages of {}: {}", scope.tenant_id, e),
            })?;
        info!(kept = scope.keep.len(), "Purged stale passages");
        Ok(())
    }

    fn name(&self) -> &str {
        "qdrant"
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.client.health_check().await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy {
                error: e.to_string(),
            }),
        }
    }
}
