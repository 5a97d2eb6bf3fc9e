use std::cmp;

use chrono::{Duration, Utc};
use jobs::entity::job;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};

use crate::error::AppError;

/// Check the submission rate limit for a tenant.
///
/// Uses an optimistic (non-locking) fixed window over the job table, so
/// concurrent requests within a very short window may both pass the check
/// before either insert completes; an accepted trade-off compared to
/// pessimistic locking which adds latency to each request.
pub async fn check_rate_limit(
    db: &DatabaseConnection,
    tenant_id: &str,
    limit_per_minute: u32,
) -> Result<(), AppError> {
    if limit_per_minute == 0 {
        return Ok(()); // Rate limiting disabled
    }

    let one_minute_ago = Utc::now() - Duration::minutes(1);

    let count = job::Entity::find()
        .filter(job::Column::TenantId.eq(tenant_id))
        .filter(job::Column::CreatedAt.gt(one_minute_ago))
        .count(db)
        .await?;

    if count >= limit_per_minute as u64 {
        let oldest = job::Entity::find()
            .filter(job::Column::TenantId.eq(tenant_id))
            .filter(job::Column::CreatedAt.gt(one_minute_ago))
            .order_by_asc(job::Column::CreatedAt)
            .one(db)
            .await?;

        let retry_after = oldest
            .map(|j| {
                let expires = j.created_at + Duration::minutes(1);
                cmp::max((expires - Utc::now()).num_seconds(), 1) as u64
            })
            .unwrap_or(60);

        return Err(AppError::RateLimited { retry_after });
    }

    Ok(())
}
