mod routes;

use dotenv::dotenv;
use leadline_core::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use leadline_core::{load_clinic_data, load_config};
use leadline_llm::make_providers;
use leadline_rag::{make_vector_index, ChatEngine, Indexer, ResponseDriver, Retriever};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = load_config(&config_path)?;
    info!(path = %config_path, vector_store = %cfg.vector_store.kind, "configuration loaded");

    let clinic_data = load_clinic_data(&cfg.data.clinic_path)?;

    let providers = make_providers(&cfg.chat_provider, &cfg.embedding_provider)?;
    let chat: Arc<dyn leadline_llm::ChatModel> = Arc::from(providers.chat);
    let embed: Arc<dyn leadline_llm::EmbedModel> = Arc::from(providers.embed);
    let index = make_vector_index(&cfg.vector_store)?;
    info!(store = index.name(), model = chat.model_name(), "providers ready");

    let indexer = Arc::new(Indexer::new(
        embed.clone(),
        index.clone(),
        cfg.embedding_provider.timeout_ms,
    ));

    if cfg.data.seed_on_start {
        let count = indexer.reindex(&clinic_data.clinic).await?;
        info!(tenant_id = %clinic_data.clinic.clinic_id, count, "seeded clinic passages");
    }

    let engine = ChatEngine::new(
        Retriever::new(
            embed,
            index.clone(),
            cfg.retrieval.top_k,
            cfg.retrieval.timeout_ms,
        ),
        ResponseDriver::new(
            chat,
            cfg.chat_provider.temperature,
            cfg.chat_provider.timeout_ms,
        ),
    );

    let state = AppState {
        engine: Arc::new(engine),
        indexer,
        index,
        default_lead: Arc::new(clinic_data.lead),
    };
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    info!(%addr, "leadline-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}
