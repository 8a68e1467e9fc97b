use std::{collections::HashMap, str::FromStr};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use thiserror::Error;

use crate::service::OperatorQuota;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("migrate error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid quota data: {0}")]
    InvalidQuotaData(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOperator {
    pub id: i64,
    pub username: Option<String>,
}

/// Durable per-operator state: the authorized set, usernames, quotas and
/// which operator created which peer.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

type Result<T> = std::result::Result<T, DatabaseError>;

impl Database {
    pub async fn new(connstr: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .connect_with(SqliteConnectOptions::from_str(connstr)?.create_if_missing(true))
            .await?;
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn operator(&self, id: i64) -> Result<Option<StoredOperator>> {
        let row = sqlx::query_as::<_, (i64, Option<String>)>(
            // sqlite
            "SELECT id, username FROM operators WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, username)| StoredOperator { id, username }))
    }

    pub async fn operators(&self) -> Result<Vec<StoredOperator>> {
        let rows = sqlx::query_as::<_, (i64, Option<String>)>(
            // sqlite
            "SELECT id, username FROM operators ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, username)| StoredOperator { id, username })
            .collect())
    }

    /// Returns `true` when the operator was not stored before. A `None`
    /// username never clears one that is already stored.
    pub async fn add_operator(&self, id: i64, username: Option<&str>) -> Result<bool> {
        let existed = self.operator(id).await?.is_some();

        sqlx::query(
            // sqlite
            "INSERT INTO operators (id, username) VALUES ($1, $2)
            ON CONFLICT(id) DO UPDATE SET username = COALESCE(excluded.username, operators.username)",
        )
        .bind(id)
        .bind(username)
        .execute(&self.pool)
        .await?;

        Ok(!existed)
    }

    pub async fn rm_operator(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM quotas WHERE operator_id = $1")
            .bind(id)
            .execute(&mut tx)
            .await?;
        let removed = sqlx::query("DELETE FROM operators WHERE id = $1")
            .bind(id)
            .execute(&mut tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(removed > 0)
    }

    pub async fn quota(&self, id: i64) -> Result<Option<OperatorQuota>> {
        let limits = sqlx::query_scalar::<_, String>(
            // sqlite
            "SELECT limits FROM quotas WHERE operator_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(limits.map(|l| serde_json::from_str(&l)).transpose()?)
    }

    pub async fn set_quota(&self, id: i64, quota: &OperatorQuota) -> Result<()> {
        let limits = serde_json::to_string(quota)?;

        sqlx::query(
            // sqlite
            "INSERT INTO quotas (operator_id, limits) VALUES ($1, $2)
            ON CONFLICT(operator_id) DO UPDATE SET limits = excluded.limits",
        )
        .bind(id)
        .bind(limits)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn rm_quota(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM quotas WHERE operator_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_peer_owner(&self, name: &str, owner_id: i64) -> Result<()> {
        sqlx::query(
            // sqlite
            "INSERT INTO peer_owners (name, owner_id) VALUES ($1, $2)
            ON CONFLICT(name) DO UPDATE SET owner_id = excluded.owner_id",
        )
        .bind(name)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn rm_peer_owner(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM peer_owners WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn peer_owners(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>("SELECT name, owner_id FROM peer_owners")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().collect())
    }
}
