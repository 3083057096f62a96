//! PostgreSQL-backed trigger metadata store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tripwire_trigger::{MetadataStore, StoreError, StoredTrigger};

/// Row type for trigger definition queries.
#[derive(FromRow)]
struct TriggerRow {
    name: String,
    statement: String,
    selector: Option<String>,
    params: String,
    paused: bool,
}

impl From<TriggerRow> for StoredTrigger {
    fn from(row: TriggerRow) -> Self {
        Self {
            name: row.name,
            statement: row.statement,
            selector: row.selector,
            params: row.params,
            paused: row.paused,
        }
    }
}

fn read_failed(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable {
                reason: e.to_string(),
            }
        }
        other => StoreError::ReadFailed {
            reason: other.to_string(),
        },
    }
}

fn write_failed(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable {
                reason: e.to_string(),
            }
        }
        other => StoreError::WriteFailed {
            reason: other.to_string(),
        },
    }
}

/// Metadata store keeping trigger definitions in PostgreSQL.
///
/// Every server pointed at the same database shares definitions and the
/// last-update marker.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn list_trigger_definitions(
        &self,
        scope: &str,
    ) -> Result<Vec<StoredTrigger>, StoreError> {
        let rows: Vec<TriggerRow> = sqlx::query_as(
            r#"
            SELECT name, statement, selector, params, paused
            FROM trigger_definitions
            WHERE scope = $1
            ORDER BY position
            "#,
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await
        .map_err(read_failed)?;

        Ok(rows.into_iter().map(StoredTrigger::from).collect())
    }

    async fn upsert_trigger_definition(
        &self,
        scope: &str,
        trigger: StoredTrigger,
    ) -> Result<Option<StoredTrigger>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(write_failed)?;

        let previous: Option<TriggerRow> = sqlx::query_as(
            r#"
            SELECT name, statement, selector, params, paused
            FROM trigger_definitions
            WHERE scope = $1 AND name = $2
            FOR UPDATE
            "#,
        )
        .bind(scope)
        .bind(&trigger.name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(write_failed)?;

        sqlx::query(
            r#"
            INSERT INTO trigger_definitions (scope, name, statement, selector, params, paused)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (scope, name) DO UPDATE
            SET statement = EXCLUDED.statement,
                selector = EXCLUDED.selector,
                params = EXCLUDED.params,
                paused = EXCLUDED.paused
            "#,
        )
        .bind(scope)
        .bind(&trigger.name)
        .bind(&trigger.statement)
        .bind(&trigger.selector)
        .bind(&trigger.params)
        .bind(trigger.paused)
        .execute(&mut *tx)
        .await
        .map_err(write_failed)?;

        tx.commit().await.map_err(write_failed)?;
        Ok(previous.map(StoredTrigger::from))
    }

    async fn set_trigger_paused(
        &self,
        scope: &str,
        name: &str,
        paused: bool,
    ) -> Result<Option<StoredTrigger>, StoreError> {
        let row: Option<TriggerRow> = sqlx::query_as(
            r#"
            UPDATE trigger_definitions
            SET paused = $3
            WHERE scope = $1 AND name = $2
            RETURNING name, statement, selector, params, paused
            "#,
        )
        .bind(scope)
        .bind(name)
        .bind(paused)
        .fetch_optional(&self.pool)
        .await
        .map_err(write_failed)?;

        Ok(row.map(StoredTrigger::from))
    }

    async fn delete_trigger_definition(
        &self,
        scope: &str,
        name: &str,
    ) -> Result<Option<StoredTrigger>, StoreError> {
        let row: Option<TriggerRow> = sqlx::query_as(
            r#"
            DELETE FROM trigger_definitions
            WHERE scope = $1 AND name = $2
            RETURNING name, statement, selector, params, paused
            "#,
        )
        .bind(scope)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(write_failed)?;

        Ok(row.map(StoredTrigger::from))
    }

    async fn delete_all_trigger_definitions(
        &self,
        scope: &str,
    ) -> Result<Vec<StoredTrigger>, StoreError> {
        let rows: Vec<TriggerRow> = sqlx::query_as(
            r#"
            DELETE FROM trigger_definitions
            WHERE scope = $1
            RETURNING name, statement, selector, params, paused
            "#,
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await
        .map_err(write_failed)?;

        Ok(rows.into_iter().map(StoredTrigger::from).collect())
    }

    async fn last_update_marker(&self, scope: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let marker: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT last_update FROM trigger_markers WHERE scope = $1")
                .bind(scope)
                .fetch_optional(&self.pool)
                .await
                .map_err(read_failed)?;

        Ok(marker.map(|(at,)| at))
    }

    async fn bump_last_update_marker(&self, scope: &str) -> Result<DateTime<Utc>, StoreError> {
        // Same rule as `next_marker`: never step back, always move at least 1ms.
        let (marker,): (DateTime<Utc>,) = sqlx::query_as(
            r#"
            INSERT INTO trigger_markers (scope, last_update)
            VALUES ($1, clock_timestamp())
            ON CONFLICT (scope) DO UPDATE
            SET last_update = GREATEST(
                clock_timestamp(),
                trigger_markers.last_update + INTERVAL '1 millisecond'
            )
            RETURNING last_update
            "#,
        )
        .bind(scope)
        .fetch_one(&self.pool)
        .await
        .map_err(write_failed)?;

        Ok(marker)
    }
}
