use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use smsgraph::auth::OAuthClient;
use smsgraph::config::Config;
use smsgraph::graph::GraphClient;
use smsgraph::llm::OpenRouterProvider;
use smsgraph::orchestrator::Orchestrator;
use smsgraph::store::Database;
use smsgraph::subscriptions::{spawn_renewal_worker, SubscriptionManager};
use smsgraph::twilio::TwilioClient;
use smsgraph::web::{router, AppState};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = Arc::new(Config::load().context("failed to load configuration")?);
    info!("configuration loaded, data dir {}", config.data_dir);

    let database = Arc::new(Database::new(&config.data_dir).context("failed to open database")?);
    let oauth = Arc::new(OAuthClient::new(&config)?);
    let graph = Arc::new(GraphClient::new(
        &config,
        oauth.clone(),
        database.clone(),
        database.clone(),
    )?);
    let sms = Arc::new(TwilioClient::new(&config)?);
    let llm = Arc::new(OpenRouterProvider::new(&config)?);
    let orchestrator = Arc::new(Orchestrator::new(llm, graph.clone()));

    let subscriptions = Arc::new(SubscriptionManager::new(
        &config,
        graph.clone(),
        database.clone(),
    ));
    let _renewal_worker = spawn_renewal_worker(
        subscriptions.clone(),
        std::time::Duration::from_secs(config.renewal_interval_minutes * 60),
    );

    let state = AppState {
        config: config.clone(),
        oauth,
        graph,
        sms,
        orchestrator,
        credentials: database.clone(),
        subscriptions,
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
