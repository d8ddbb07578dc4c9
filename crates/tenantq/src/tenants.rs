use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::jobs::Result;

/// Identity used for scoping and quotas. Rows are provisioned out-of-band
/// (tenantqctl) and treated as immutable by the queue engine.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tenant {
    pub id: String,
    pub credential_fingerprint: String,
    pub display_name: Option<String>,
    pub max_concurrent_jobs: i32,
    pub rate_limit_per_minute: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTenant {
    pub id: String,
    pub credential_fingerprint: String,
    pub display_name: Option<String>,
    pub max_concurrent_jobs: i32,
    pub rate_limit_per_minute: i32,
}

#[derive(Clone)]
pub struct TenantsRepo {
    pool: PgPool,
}

impl TenantsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewTenant) -> Result<Tenant> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO users (id, credential_fingerprint, display_name,
                               max_concurrent_jobs, rate_limit_per_minute, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            RETURNING *
            "#,
        )
        .bind(&new.id)
        .bind(&new.credential_fingerprint)
        .bind(&new.display_name)
        .bind(new.max_concurrent_jobs)
        .bind(new.rate_limit_per_minute)
        .fetch_one(&self.pool)
        .await?;

        Ok(tenant)
    }

    pub async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM users WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    /// The authentication collaborator: opaque bearer credential in,
    /// tenant record out.
    pub async fn get_by_credential(&self, credential: &str) -> Result<Option<Tenant>> {
        let tenant =
            sqlx::query_as::<_, Tenant>("SELECT * FROM users WHERE credential_fingerprint = $1")
                .bind(credential)
                .fetch_optional(&self.pool)
                .await?;
        Ok(tenant)
    }

    pub async fn list(&self) -> Result<Vec<Tenant>> {
        let tenants = sqlx::query_as::<_, Tenant>("SELECT * FROM users ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(tenants)
    }
}
