pub mod chunker;
pub mod driver;
pub mod engine;
pub mod index;
pub mod indexer;
pub mod memory;
pub mod prompt;
pub mod qdrant;
pub mod retriever;

pub use chunker::{chunk_document, chunk_tenant_record, split_text};
pub use driver::{parse_reply, ResponseDriver};
pub use engine::{ChatEngine, ChatOutcome};
pub use index::{HealthStatus, IndexedPassage, PurgeScope, VectorIndex};
pub use indexer::Indexer;
pub use memory::MemoryIndex;
pub use prompt::{assemble, PromptBundle};
pub use qdrant::QdrantIndex;
pub use retriever::{RetrievalOutcome, Retriever, DEFAULT_TOP_K};

pub use leadline_error::{LeadlineError, Result};

use leadline_core::config::VectorStoreCfg;
use leadline_core::read_env;
use std::sync::Arc;

const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
const DEFAULT_COLLECTION: &str = "clinic_passages";

/// 根据配置创建向量索引：qdrant | memory
pub fn make_vector_index(cfg: &VectorStoreCfg) -> Result<Arc<dyn VectorIndex>> {
    match cfg.kind.as_str() {
        "qdrant" => {
            let url = cfg.url.as_deref().unwrap_or(DEFAULT_QDRANT_URL);
            // API key 可选，本地 Qdrant 不需要
            let api_key = read_env(cfg.api_key_env.as_deref().unwrap_or("QDRANT_API_KEY")).ok();
            let collection = cfg
                .collection
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
            let index = QdrantIndex::new(url, api_key, collection, cfg.namespace.clone())?;
            Ok(Arc::new(index))
        }
        "memory" => Ok(Arc::new(MemoryIndex::new())),
        other => Err(LeadlineError::Configuration {
            key: "vector_store.kind".into(),
            reason: format!("unsupported vector store: {}", other),
        }),
    }
}
