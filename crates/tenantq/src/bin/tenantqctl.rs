use sqlx::{postgres::PgPoolOptions, PgPool};
use std::env;
use uuid::Uuid;

use tenantq::jobs::JobStatus;
use tenantq::tenants::{NewTenant, TenantsRepo};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "tenantqctl <command>\n\
             Commands:\n\
             - create-tenant <tenant_id> [max_concurrent] [rate_per_minute] [display_name]\n\
             - list-tenants\n\
             - seed <tenant_id> <n>\n\
             - counts\n\
             - reset\n\
             \n\
             Uses DATABASE_URL or TEST_DATABASE_URL.\n"
        );
        std::process::exit(2);
    }

    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .expect("DATABASE_URL or TEST_DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    match args[1].as_str() {
        "create-tenant" => {
            let tenant_id = args
                .get(2)
                .expect("usage: tenantqctl create-tenant <tenant_id> [max_concurrent] [rate_per_minute] [display_name]");
            let max_concurrent: i32 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(5);
            let rate_per_minute: i32 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(10);
            let display_name = args.get(5).cloned();

            create_tenant(&pool, tenant_id, max_concurrent, rate_per_minute, display_name).await?;
        }
        "list-tenants" => list_tenants(&pool).await?,
        "seed" => {
            let tenant_id = args.get(2).expect("usage: tenantqctl seed <tenant_id> <n>");
            let n: i64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(10);
            seed(&pool, tenant_id, n).await?;
        }
        "counts" => show_counts(&pool).await?,
        "reset" => reset(&pool).await?,
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn create_tenant(
    pool: &PgPool,
    tenant_id: &str,
    max_concurrent: i32,
    rate_per_minute: i32,
    display_name: Option<String>,
) -> anyhow::Result<()> {
    let credential = Uuid::new_v4().to_string();

    let tenant = TenantsRepo::new(pool.clone())
        .create(NewTenant {
            id: tenant_id.to_string(),
            credential_fingerprint: credential.clone(),
            display_name,
            max_concurrent_jobs: max_concurrent,
            rate_limit_per_minute: rate_per_minute,
        })
        .await?;

    println!("created tenant {}", tenant.id);
    println!("  max_concurrent_jobs   = {}", tenant.max_concurrent_jobs);
    println!("  rate_limit_per_minute = {}", tenant.rate_limit_per_minute);
    println!("  credential (shown once, store it now):");
    println!("  {credential}");

    Ok(())
}

async fn list_tenants(pool: &PgPool) -> anyhow::Result<()> {
    let tenants = TenantsRepo::new(pool.clone()).list().await?;

    for tenant in tenants {
        println!(
            "{}  max_concurrent={} rate_per_minute={} name={}",
            tenant.id,
            tenant.max_concurrent_jobs,
            tenant.rate_limit_per_minute,
            tenant.display_name.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}

async fn seed(pool: &PgPool, tenant_id: &str, n: i64) -> anyhow::Result<()> {
    for i in 0..n {
        // alternate succeeding and failing payloads
        let payload = if i % 2 == 0 {
            serde_json::json!({"task": "noop", "seq": i})
        } else {
            serde_json::json!({"error": true, "error_message": "seeded failure", "seq": i})
        };

        let job_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (id, tenant_id, status, payload, max_retries, retry_count, created_at, trace_id)
            VALUES ($1, $2, 'pending', $3, 3, 0, now(), $4)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&payload)
        .bind(Uuid::new_v4().to_string())
        .fetch_one(pool)
        .await?;

        println!("+ inserted job id={job_id}");
    }

    Ok(())
}

async fn show_counts(pool: &PgPool) -> anyhow::Result<()> {
    for status in JobStatus::ALL {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(pool)
            .await?;
        println!("{:<10} {count}", status.as_str());
    }

    let dlq: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dlq")
        .fetch_one(pool)
        .await?;
    println!("{:<10} {dlq}", "archived");

    Ok(())
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        TRUNCATE TABLE
            dlq,
            jobs,
            metrics
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(pool)
    .await?;

    println!("reset OK");
    Ok(())
}
