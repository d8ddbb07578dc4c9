pub mod admission;
pub mod api;
pub mod bus;
pub mod config;
pub mod db;
pub mod jobs;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod tenants;
pub mod worker;

pub use admission::{Admission, RateLimiter};
pub use bus::{EventBus, Topic};
pub use config::Config;
pub use jobs::{DlqEntry, Job, JobStatus, JobsRepo, NewJob, QueueError};
pub use metrics::{MetricsService, MetricsSnapshot};
pub use queue::{PgQueue, Queue};
pub use service::JobService;
pub use tenants::{NewTenant, Tenant, TenantsRepo};
pub use worker::{JobProcessor, SimulatedProcessor, Worker, WorkerConfig, WorkerPool};
