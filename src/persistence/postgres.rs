//! PostgreSQL implementation of the durable observer state store.
//!
//! All cross-worker correctness rests on this module: the atomic
//! multi-table subscribe statement with bounded retry, and row-locked
//! transactional snapshot replacement. No in-process locks are held —
//! any worker process holding a pool to the same database can subscribe
//! and evaluate.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgDatabaseError;

use super::models::ObserverRecord;
use crate::domain::diff::{self, Diff, SnapshotItem};
use crate::domain::request::ObserverId;
use crate::error::GatewayError;

/// Maximum number of retries when the atomic subscribe statement hits a
/// foreign-key violation caused by a concurrent observer/subscriber
/// deletion.
const MAX_INTEGRITY_ERROR_RETRIES: usize = 3;

/// Postgres error code for a unique constraint violation.
const UNIQUE_VIOLATION: &str = "23505";
/// Postgres error code for a foreign-key constraint violation.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgreSQL-backed observer state store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct ObserverStore {
    pool: PgPool,
}

/// Classification of a database error by Postgres SQLSTATE code.
fn error_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<PgDatabaseError>()
            .map(|pg| pg.code().to_string()),
        _ => None,
    }
}

impl ObserverStore {
    /// Creates a new store with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Atomically ensures the observer exists, the subscriber exists,
    /// and the subscription join row links them.
    ///
    /// One multi-CTE statement inserts-or-ignores the observer and
    /// subscriber rows, then inserts the join row. A duplicate-key
    /// conflict on the join row means the session was already
    /// subscribed, which counts as success. A foreign-key violation
    /// means a concurrent deletion removed the observer or subscriber
    /// between the CTEs and the final insert; the statement is retried
    /// up to [`MAX_INTEGRITY_ERROR_RETRIES`] times.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SubscribeConflict`] when the retries are
    /// exhausted, or [`GatewayError::PersistenceError`] on any other
    /// database failure.
    pub async fn subscribe(
        &self,
        observer_id: &ObserverId,
        request: &Value,
        poll_interval: Option<i32>,
        session_id: &str,
    ) -> Result<(), GatewayError> {
        for retry in 0..MAX_INTEGRITY_ERROR_RETRIES {
            let outcome = sqlx::query(
                r"
                WITH inserted_observer AS (
                    INSERT INTO observers (id, request, poll_interval)
                    VALUES ($1, $2, $3)
                    ON CONFLICT DO NOTHING
                ), inserted_subscriber AS (
                    INSERT INTO subscribers (session_id)
                    VALUES ($4)
                    ON CONFLICT DO NOTHING
                )
                INSERT INTO observer_subscribers (observer_id, subscriber_id)
                VALUES ($1, $4)
                ",
            )
            .bind(observer_id.as_str())
            .bind(request)
            .bind(poll_interval)
            .bind(session_id)
            .execute(&self.pool)
            .await;

            match outcome {
                Ok(_) => return Ok(()),
                Err(err) => match error_code(&err).as_deref() {
                    // Already subscribed: the join row exists.
                    Some(UNIQUE_VIOLATION) => return Ok(()),
                    // Observer or subscriber deleted concurrently.
                    Some(FOREIGN_KEY_VIOLATION) if retry < MAX_INTEGRITY_ERROR_RETRIES - 1 => {}
                    Some(FOREIGN_KEY_VIOLATION) => {
                        return Err(GatewayError::SubscribeConflict(
                            observer_id.as_str().to_string(),
                        ));
                    }
                    _ => return Err(err.into()),
                },
            }
        }
        Err(GatewayError::SubscribeConflict(
            observer_id.as_str().to_string(),
        ))
    }

    /// Registers table dependencies for a push-mode observer, ignoring
    /// duplicates.
    ///
    /// Returns `false` when the observer was removed before the
    /// dependencies could be created (foreign-key violation), which
    /// callers treat as "observer gone, stop here".
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn insert_dependencies(
        &self,
        observer_id: &ObserverId,
        tables: &[String],
    ) -> Result<bool, GatewayError> {
        for table in tables {
            let outcome = sqlx::query(
                "INSERT INTO dependencies (observer_id, table_name) VALUES ($1, $2) \
                 ON CONFLICT (observer_id, table_name) DO NOTHING",
            )
            .bind(observer_id.as_str())
            .bind(table)
            .execute(&self.pool)
            .await;

            match outcome {
                Ok(_) => {}
                Err(err) if error_code(&err).as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(true)
    }

    /// Loads an observer record by fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn get(
        &self,
        observer_id: &ObserverId,
    ) -> Result<Option<ObserverRecord>, GatewayError> {
        let row = sqlx::query_as::<_, (String, Value, Option<DateTime<Utc>>, Option<i32>)>(
            "SELECT id, request, last_evaluation, poll_interval FROM observers WHERE id = $1",
        )
        .bind(observer_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, request, last_evaluation, poll_interval)| ObserverRecord {
            id,
            request,
            last_evaluation,
            poll_interval,
        }))
    }

    /// Counts current subscribers of an observer.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn subscriber_count(&self, observer_id: &ObserverId) -> Result<i64, GatewayError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM observer_subscribers WHERE observer_id = $1",
        )
        .bind(observer_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Returns the session ids currently subscribed to an observer.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn subscriber_sessions(
        &self,
        observer_id: &ObserverId,
    ) -> Result<Vec<String>, GatewayError> {
        let sessions = sqlx::query_scalar::<_, String>(
            "SELECT subscriber_id FROM observer_subscribers WHERE observer_id = $1",
        )
        .bind(observer_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    /// Returns the fingerprints of observers depending on `table` that
    /// still have at least one subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn dependents_of_table(
        &self,
        table: &str,
    ) -> Result<Vec<ObserverId>, GatewayError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT d.observer_id FROM dependencies d \
             WHERE d.table_name = $1 AND EXISTS (\
                 SELECT 1 FROM observer_subscribers s WHERE s.observer_id = d.observer_id)",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(ObserverId::from_string).collect())
    }

    /// Cheap existence check: does any observer depend on `table`?
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn table_has_dependents(&self, table: &str) -> Result<bool, GatewayError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM dependencies WHERE table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Loads the current snapshot of an observer, ordered by position.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn snapshot(
        &self,
        observer_id: &ObserverId,
    ) -> Result<Vec<SnapshotItem>, GatewayError> {
        let rows = sqlx::query_as::<_, (String, i32, Value)>(
            "SELECT primary_key, item_order, data FROM items \
             WHERE observer_id = $1 ORDER BY item_order",
        )
        .bind(observer_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(primary_key, order, data)| SnapshotItem {
                primary_key,
                order,
                data,
            })
            .collect())
    }

    /// Diffs `rows` against the persisted snapshot and atomically
    /// replaces it, all inside one transaction.
    ///
    /// The observer row is locked with `SELECT ... FOR UPDATE` so two
    /// concurrent evaluations of the same observer serialize their
    /// read-modify-write: last writer wins cleanly, never a lost
    /// update. The `(observer_id, item_order)` uniqueness constraint
    /// is deferred within the transaction so two rows may swap
    /// positions. Also touches `last_evaluation`.
    ///
    /// Returns `None` when the observer no longer exists (removed by a
    /// concurrent unsubscribe); the evaluation is then ignored.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MissingPrimaryKeyField`] when a row
    /// lacks the primary key, or [`GatewayError::PersistenceError`] on
    /// database failure. On error the transaction rolls back and the
    /// previous snapshot stays intact.
    pub async fn replace_snapshot(
        &self,
        observer_id: &ObserverId,
        rows: Vec<serde_json::Map<String, Value>>,
        primary_key: &str,
    ) -> Result<Option<Diff>, GatewayError> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query_scalar::<_, String>(
            "SELECT id FROM observers WHERE id = $1 FOR UPDATE",
        )
        .bind(observer_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            return Ok(None);
        }

        let previous: Vec<SnapshotItem> = sqlx::query_as::<_, (String, i32, Value)>(
            "SELECT primary_key, item_order, data FROM items WHERE observer_id = $1",
        )
        .bind(observer_id.as_str())
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(primary_key, order, data)| SnapshotItem {
            primary_key,
            order,
            data,
        })
        .collect();

        let delta = diff::diff(&previous, rows, primary_key)?;

        sqlx::query("SET CONSTRAINTS items_observer_order_uniq DEFERRED")
            .execute(&mut *tx)
            .await?;

        if !delta.removed.is_empty() {
            let removed: Vec<String> = delta
                .removed
                .iter()
                .map(|item| item.primary_key.clone())
                .collect();
            sqlx::query("DELETE FROM items WHERE observer_id = $1 AND primary_key = ANY($2)")
                .bind(observer_id.as_str())
                .bind(&removed)
                .execute(&mut *tx)
                .await?;
        }

        for item in &delta.changed {
            sqlx::query(
                "UPDATE items SET item_order = $3, data = $4 \
                 WHERE observer_id = $1 AND primary_key = $2",
            )
            .bind(observer_id.as_str())
            .bind(&item.primary_key)
            .bind(item.order)
            .bind(&item.data)
            .execute(&mut *tx)
            .await?;
        }

        for item in &delta.added {
            sqlx::query(
                "INSERT INTO items (observer_id, primary_key, item_order, data) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(observer_id.as_str())
            .bind(&item.primary_key)
            .bind(item.order)
            .bind(&item.data)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE observers SET last_evaluation = NOW() WHERE id = $1")
            .bind(observer_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(delta))
    }

    /// Ensures a subscriber row exists for a connecting session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn create_session(&self, session_id: &str) -> Result<(), GatewayError> {
        sqlx::query("INSERT INTO subscribers (session_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes a disconnected session and garbage-collects observers
    /// left without subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn remove_session(&self, session_id: &str) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM subscribers WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        self.remove_orphaned_observers().await
    }

    /// Removes one subscription and deletes the observer when that was
    /// its last subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn remove_subscriber(
        &self,
        observer_id: &ObserverId,
        session_id: &str,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "DELETE FROM observer_subscribers WHERE observer_id = $1 AND subscriber_id = $2",
        )
        .bind(observer_id.as_str())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "DELETE FROM observers o WHERE o.id = $1 AND NOT EXISTS (\
                 SELECT 1 FROM observer_subscribers s WHERE s.observer_id = o.id)",
        )
        .bind(observer_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Strips every subscriber from an observer (slow-evaluation
    /// circuit breaker). The observer row and its snapshot are kept.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn remove_all_subscribers(
        &self,
        observer_id: &ObserverId,
    ) -> Result<u64, GatewayError> {
        let result = sqlx::query("DELETE FROM observer_subscribers WHERE observer_id = $1")
            .bind(observer_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Deletes observers that have no subscribers left. Items and
    /// dependencies cascade.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn remove_orphaned_observers(&self) -> Result<(), GatewayError> {
        sqlx::query(
            "DELETE FROM observers o WHERE NOT EXISTS (\
                 SELECT 1 FROM observer_subscribers s WHERE s.observer_id = o.id)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes all observer state: observers, snapshots, dependencies
    /// and subscribers. Operational reset.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn clear(&self) -> Result<(), GatewayError> {
        sqlx::query("TRUNCATE observers, subscribers CASCADE")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
