use std::time::Duration;

/// Typed runtime configuration loaded from the environment, so raw
/// strings stop at the process boundary.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub api_host: String,
    pub api_port: u16,
    pub worker_pool_size: usize,
    pub worker_lease_ttl_seconds: i64,
    pub worker_poll_interval_seconds: u64,
    pub default_max_concurrent_jobs: i32,
    pub default_rate_limit_per_minute: i32,
    pub debug: bool,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        // sized for workers + API handlers + the reaper sharing one pool
        let db_max_connections = env_parse("DB_MAX_CONNECTIONS").unwrap_or(10);

        let api_host = env_nonempty("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let api_port = env_parse("API_PORT").unwrap_or(8000);

        let worker_pool_size = env_parse("WORKER_POOL_SIZE").unwrap_or(3);
        let worker_lease_ttl_seconds = env_parse("WORKER_LEASE_TTL_SECONDS").unwrap_or(300);
        let worker_poll_interval_seconds = env_parse("WORKER_POLL_INTERVAL_SECONDS").unwrap_or(1);

        let default_max_concurrent_jobs = env_parse("DEFAULT_MAX_CONCURRENT_JOBS").unwrap_or(5);
        let default_rate_limit_per_minute =
            env_parse("DEFAULT_RATE_LIMIT_PER_MINUTE").unwrap_or(10);

        let debug = env_bool("DEBUG").unwrap_or(false);
        let migrate_on_startup = env_bool("MIGRATE_ON_STARTUP").unwrap_or(true);

        Ok(Self {
            database_url,
            db_max_connections,
            api_host,
            api_port,
            worker_pool_size,
            worker_lease_ttl_seconds,
            worker_poll_interval_seconds,
            default_max_concurrent_jobs,
            default_rate_limit_per_minute,
            debug,
            migrate_on_startup,
        })
    }

    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.worker_poll_interval_seconds)
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_nonempty(key).and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_nonempty(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
