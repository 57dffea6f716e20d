// Postgres implementation of the EventStore contract
//
// One statement per logical operation; no transaction ever spans a queue
// operation. Expiry is evaluated against the database clock so recovery
// and cleanup agree on what is terminal.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use beacon_core::{Event, EventStore, NewEvent, StoreError};

use crate::models::EventRow;

/// Postgres-backed event store
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store from a connection URL
    pub async fn from_url(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn db_err(error: sqlx::Error) -> StoreError {
    StoreError::Database(error.to_string())
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn save(&self, event: NewEvent) -> Result<Event, StoreError> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            INSERT INTO events (id, event_type, payload, target_user_id, priority, is_read, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7)
            RETURNING id, event_type, payload, target_user_id, priority, is_read, created_at, expires_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.target_user_id)
        .bind(event.priority.rank())
        .bind(event.created_at)
        .bind(event.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.into_event())
    }

    async fn mark_read(&self, event_id: Uuid, user_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET is_read = TRUE
            WHERE id = $1 AND target_user_id = $2 AND is_read = FALSE
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_read_batch(
        &self,
        event_ids: &[Uuid],
        user_id: i64,
    ) -> Result<u64, StoreError> {
        if event_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE events
            SET is_read = TRUE
            WHERE id = ANY($1) AND target_user_id = $2 AND is_read = FALSE
            "#,
        )
        .bind(event_ids)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn find_pending_for(
        &self,
        user_id: i64,
        event_type: &str,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, event_type, payload, target_user_id, priority, is_read, created_at, expires_at
            FROM events
            WHERE target_user_id = $1
              AND event_type = $2
              AND is_read = FALSE
              AND (expires_at IS NULL OR expires_at > NOW())
            ORDER BY priority DESC, created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(EventRow::into_event).collect())
    }

    async fn purge_terminal(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM events
            WHERE is_read = TRUE
               OR (expires_at IS NOT NULL AND expires_at <= NOW())
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
