use dotenv::dotenv;
use leadline_core::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use leadline_core::{load_clinic_data, load_config};
use leadline_llm::make_providers;
use leadline_rag::{make_vector_index, Indexer};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// 一次性索引：读取诊所数据文件，替换该租户的全部片段
///
/// 用法：`leadline-indexer [clinic.yaml]`，缺省取配置中的 `data.clinic_path`。
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();
    tracing::info!("leadline-indexer starting");

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = load_config(&config_path)?;
    let clinic_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| cfg.data.clinic_path.clone());
    let data = load_clinic_data(&clinic_path)?;

    if cfg.vector_store.kind == "memory" {
        tracing::warn!("vector_store.kind is memory; indexed passages are discarded on exit");
    }

    let providers = make_providers(&cfg.chat_provider, &cfg.embedding_provider)?;
    let index = make_vector_index(&cfg.vector_store)?;
    let indexer = Indexer::new(
        Arc::from(providers.embed),
        index,
        cfg.embedding_provider.timeout_ms,
    );

    let start = Instant::now();
    let count = indexer.reindex(&data.clinic).await?;
    tracing::info!(
        tenant_id = %data.clinic.clinic_id,
        count,
        latency_ms = start.elapsed().as_millis() as u64,
        "clinic indexed"
    );
    Ok(())
}

fn init_tracing() {
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}
