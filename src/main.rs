use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use agri_advisor::agents::AdvisoryPipeline;
use agri_advisor::config::Config;
use agri_advisor::db::{
    create_pool, JobStore, KnowledgeStore, MemoryJobStore, MemoryKnowledgeStore, PgJobStore, PgKnowledgeStore,
};
use agri_advisor::llm::provider::ProviderSet;
use agri_advisor::queue::{AdvisoryWorker, JobLifecycle, JobQueue};
use agri_advisor::realtime::RoomHub;
use agri_advisor::utils::init_logger;
use agri_advisor::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.server);

    let (jobs, knowledge, store_backend): (Arc<dyn JobStore>, Arc<dyn KnowledgeStore>, &'static str) =
        match &config.database.url {
            Some(url) => {
                let pool = create_pool(&config.database, url).await?;

                info!("Running database migrations...");
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
                info!("Database migrations completed");

                let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
                let knowledge: Arc<dyn KnowledgeStore> = Arc::new(PgKnowledgeStore::new(pool));
                (jobs, knowledge, "postgres")
            }
            None => {
                warn!("DATABASE_URL not set, jobs are kept in memory and lost on restart");
                let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
                let knowledge: Arc<dyn KnowledgeStore> = Arc::new(MemoryKnowledgeStore::seeded());
                (jobs, knowledge, "memory")
            }
        };

    // Provider clients are built once and shared by every job
    let providers = ProviderSet::from_config(&config.providers);
    let hub = Arc::new(RoomHub::new());
    let lifecycle = Arc::new(JobLifecycle::new(jobs));
    let pipeline = Arc::new(AdvisoryPipeline::new(&providers, knowledge, &config.pipeline));
    let worker = Arc::new(AdvisoryWorker::new(
        lifecycle.clone(),
        pipeline,
        hub.clone(),
        config.pipeline.job_deadline(),
    ));

    let state = AppState {
        config: config.clone(),
        queue: Arc::new(JobQueue::new(lifecycle, worker)),
        hub,
        store_backend,
    };

    let app = create_router(state);

    // Start server
    let ip: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((ip, config.server.port));
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
