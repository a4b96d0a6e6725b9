//! Cooldown gates for operator escalations.
//!
//! A gate admits the first caller for a key and rejects the rest until the
//! cooldown elapses. Two backends: the `escalation_cooldowns` table (default)
//! and Redis `SET NX EX` when a Redis URL is configured.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use sqlx::PgPool;

use newswire_common::error::DispatchError;

#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Returns `true` when `key` was not cooling down; the cooldown is armed
    /// for `cooldown_secs` in the same atomic step.
    async fn try_acquire(&self, key: &str, cooldown_secs: u64) -> Result<bool, DispatchError>;
}

/// Postgres-backed gate. Survives restarts and is shared by every replica.
pub struct PgCooldownStore {
    pool: PgPool,
}

impl PgCooldownStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CooldownStore for PgCooldownStore {
    async fn try_acquire(&self, key: &str, cooldown_secs: u64) -> Result<bool, DispatchError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO escalation_cooldowns (key, last_sent_at)
            VALUES ($1, now())
            ON CONFLICT (key) DO UPDATE SET last_sent_at = EXCLUDED.last_sent_at
            WHERE escalation_cooldowns.last_sent_at <= now() - make_interval(secs => $2)
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(cooldown_secs as f64)
        .fetch_optional(&self.pool)
        .await?;

        let acquired = row.is_some();
        if !acquired {
            tracing::debug!(key, cooldown_secs, "Escalation suppressed, key in cooldown");
        }
        Ok(acquired)
    }
}

/// Redis-backed gate with automatic TTL expiry.
pub struct RedisCooldownStore {
    redis: ConnectionManager,
}

impl RedisCooldownStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, DispatchError> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;

        tracing::info!("Connected to Redis for escalation cooldowns");
        Ok(Self::new(redis))
    }

    fn redis_key(key: &str) -> String {
        format!("newswire:escalation:cooldown:{}", key)
    }
}

#[async_trait]
impl CooldownStore for RedisCooldownStore {
    async fn try_acquire(&self, key: &str, cooldown_secs: u64) -> Result<bool, DispatchError> {
        let mut conn = self.redis.clone();

        // Some("OK") when the key was set, None while it still exists.
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::redis_key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(cooldown_secs.max(1))
            .query_async(&mut conn)
            .await?;

        let acquired = result.is_some();
        if !acquired {
            tracing::debug!(key, cooldown_secs, "Escalation suppressed, key in cooldown");
        }
        Ok(acquired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_key_namespaced() {
        assert_eq!(
            RedisCooldownStore::redis_key("giveup:email:resend_status_500"),
            "newswire:escalation:cooldown:giveup:email:resend_status_500"
        );
    }
}
