use std::sync::Arc;

use tenantq::api::{self, ApiState, EventStream};
use tenantq::{
    Admission, Config, EventBus, JobService, JobsRepo, MetricsService, PgQueue, RateLimiter,
    SimulatedProcessor, TenantsRepo, WorkerConfig, WorkerPool,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;

    let default_filter = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!(
        api_addr = %cfg.api_addr(),
        worker_pool_size = cfg.worker_pool_size,
        lease_ttl_seconds = cfg.worker_lease_ttl_seconds,
        poll_interval_seconds = cfg.worker_poll_interval_seconds,
        "tenantq starting"
    );

    let pool = tenantq::db::make_pool(&cfg).await?;
    if cfg.migrate_on_startup {
        tenantq::db::run_migrations(&pool).await?;
    }

    let jobs = JobsRepo::new(pool.clone());
    let tenants = TenantsRepo::new(pool.clone());
    let bus = EventBus::new();

    let queue = Arc::new(PgQueue::new(jobs.clone(), cfg.worker_lease_ttl_seconds));
    let admission = Admission::new(jobs.clone(), RateLimiter::new());
    let service = JobService::new(jobs.clone(), queue.clone(), admission, bus.clone());
    let metrics = MetricsService::new(jobs.clone(), bus.clone());

    // Live update channel: every bus event fans out to websocket clients.
    let events = EventStream::default();
    events.attach(&bus);

    // ---- Worker pool + reaper ----
    let worker_cfg = WorkerConfig {
        lease_seconds: cfg.worker_lease_ttl_seconds,
        poll_interval: cfg.poll_interval(),
    };
    let mut worker_pool = WorkerPool::new(
        queue.clone(),
        jobs.clone(),
        bus.clone(),
        Arc::new(SimulatedProcessor::default()),
        worker_cfg,
    );
    worker_pool.start(cfg.worker_pool_size);

    // ---- API ----
    let state = ApiState {
        service,
        tenants,
        metrics,
        events,
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(cfg.api_addr()).await?;
    tracing::info!(addr = %cfg.api_addr(), "api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // In-flight jobs are dropped without acknowledgment here; their
    // leases expire and the next reaper sweep requeues them.
    worker_pool.stop().await;

    Ok(())
}
