//! Usage quota gate. Admission consults `can_consume` before creating a
//! record and charges `consume` exactly once per created record.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

#[async_trait]
pub trait QuotaGate: Send + Sync {
    /// Whether the user has room for `amount` more analyses this period.
    async fn can_consume(&self, user_id: &str, amount: i64) -> Result<bool>;

    /// Atomically charges `amount` against the user's allowance. Returns
    /// false when the allowance would be exceeded (nothing is charged).
    async fn consume(&self, user_id: &str, amount: i64) -> Result<bool>;
}

/// Postgres-backed monthly counters: one row per `(user, month)`,
/// charged with a conditional increment.
#[derive(Clone)]
pub struct PgUsageService {
    pool: PgPool,
    monthly_allowance: i64,
}

impl PgUsageService {
    pub fn new(pool: PgPool, monthly_allowance: i64) -> Self {
        Self {
            pool,
            monthly_allowance,
        }
    }

    async fn ensure_row(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_counters (user_id, period_start, used, allowance)
            VALUES ($1, date_trunc('month', NOW()), 0, $2)
            ON CONFLICT (user_id, period_start) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(self.monthly_allowance)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QuotaGate for PgUsageService {
    async fn can_consume(&self, user_id: &str, amount: i64) -> Result<bool> {
        self.ensure_row(user_id).await?;

        let allowed: bool = sqlx::query_scalar(
            r#"
            SELECT used + $2 <= allowance
            FROM usage_counters
            WHERE user_id = $1 AND period_start = date_trunc('month', NOW())
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(allowed)
    }

    async fn consume(&self, user_id: &str, amount: i64) -> Result<bool> {
        self.ensure_row(user_id).await?;

        let updated = sqlx::query(
            r#"
            UPDATE usage_counters
            SET used = used + $2, updated_at = NOW()
            WHERE user_id = $1
              AND period_start = date_trunc('month', NOW())
              AND used + $2 <= allowance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        let charged = updated.rows_affected() > 0;
        if charged {
            info!("Charged {amount} analysis credit(s) to user {user_id}");
        }
        Ok(charged)
    }
}
