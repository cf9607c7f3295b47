//! Live usage counting
//!
//! Usage is computed from live table counts on every evaluation and never
//! cached beyond the request that asked for it; a stale count here would
//! silently widen or narrow the quota gate.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

/// Megabytes attributed to each stored document for the storage proxy
/// metric. Documents live in external object storage; this core only sees
/// their count.
const STORAGE_MB_PER_DOCUMENT: f64 = 2.5;

/// A point-in-time usage snapshot for one user
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub user_id: Uuid,
    pub entities_used: i64,
    pub documents_count: i64,
    pub storage_used_mb: f64,
}

/// Computes usage snapshots from live counts
pub struct UsageService {
    pool: PgPool,
}

impl UsageService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of compliance entities the user currently owns
    pub async fn entities_used(&self, user_id: Uuid) -> BillingResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM entities WHERE owner_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Full usage snapshot for one user
    pub async fn snapshot(&self, user_id: Uuid) -> BillingResult<UsageSnapshot> {
        let entities_used = self.entities_used(user_id).await?;

        let (documents_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM documents WHERE owner_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(UsageSnapshot {
            user_id,
            entities_used,
            documents_count,
            storage_used_mb: storage_proxy_mb(documents_count),
        })
    }
}

/// Document-count-derived storage estimate in megabytes
pub fn storage_proxy_mb(documents_count: i64) -> f64 {
    documents_count as f64 * STORAGE_MB_PER_DOCUMENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_proxy_scales_with_document_count() {
        assert_eq!(storage_proxy_mb(0), 0.0);
        assert_eq!(storage_proxy_mb(4), 10.0);
        assert!(storage_proxy_mb(1000) > storage_proxy_mb(999));
    }
}
