//! SQLite implementation of the durable store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::schema::{
    UserData, Users, CREATE_USERS_TABLE, CREATE_USER_DATA_INDEX, CREATE_USER_DATA_TABLE,
};
use super::{Database, Result};
use crate::adapter::DataAdapter;
use crate::snapshot::{Snapshot, User};

/// SQLite implementation of [`Database`].
///
/// Snapshot payloads are stored packed by the configured adapter; the
/// metadata columns (timestamp, save cause, pin flag) are duplicated out of
/// the payload so rotation and history queries never need to unpack rows.
pub struct SqliteDatabase {
    pool: SqlitePool,
    adapter: Arc<dyn DataAdapter>,
    max_snapshots: u32,
}

impl SqliteDatabase {
    pub fn new(pool: SqlitePool, adapter: Arc<dyn DataAdapter>, max_snapshots: u32) -> Self {
        Self {
            pool,
            adapter,
            max_snapshots,
        }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_USERS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_USER_DATA_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_USER_DATA_INDEX)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn format_timestamp(timestamp: DateTime<Utc>) -> String {
        // Fixed-width fraction keeps lexicographic order chronological
        timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn snapshot_from_row(&self, row: &SqliteRow) -> Result<Snapshot> {
        let data: Vec<u8> = row.get("data");
        let pinned: bool = row.get("pinned");
        let snapshot = self.adapter.from_bytes(&data)?;
        // The pin column is authoritative; pin/unpin only touch the column
        Ok(if snapshot.pinned() == pinned {
            snapshot
        } else {
            snapshot.with_pinned(pinned)
        })
    }

    async fn set_pinned(&self, user: Uuid, version: Uuid, pinned: bool) -> Result<()> {
        let query = Query::update()
            .table(UserData::Table)
            .values([(UserData::Pinned, pinned.into())])
            .and_where(Expr::col(UserData::PlayerUuid).eq(user.to_string()))
            .and_where(Expr::col(UserData::VersionUuid).eq(version.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    /// Among a user's unpinned snapshots ordered oldest-first, delete
    /// everything beyond the newest `max_snapshots`.
    async fn rotate_snapshots(&self, user: Uuid) -> Result<()> {
        let user_str = user.to_string();

        let query = Query::select()
            .expr(Expr::col(UserData::VersionUuid).count())
            .from(UserData::Table)
            .and_where(Expr::col(UserData::PlayerUuid).eq(&user_str))
            .and_where(Expr::col(UserData::Pinned).eq(false))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let unpinned: i64 = row.get(0);
        let excess = unpinned - self.max_snapshots as i64;
        if excess <= 0 {
            return Ok(());
        }

        let query = Query::select()
            .column(UserData::VersionUuid)
            .from(UserData::Table)
            .and_where(Expr::col(UserData::PlayerUuid).eq(&user_str))
            .and_where(Expr::col(UserData::Pinned).eq(false))
            .order_by(UserData::Timestamp, Order::Asc)
            .limit(excess as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let victims: Vec<String> = rows
            .iter()
            .map(|row| row.get::<String, _>("version_uuid"))
            .collect();

        let query = Query::delete()
            .from_table(UserData::Table)
            .and_where(Expr::col(UserData::VersionUuid).is_in(victims))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn ensure_user(&self, uuid: Uuid, username: &str) -> Result<()> {
        let query = Query::insert()
            .into_table(Users::Table)
            .columns([Users::Uuid, Users::Username])
            .values_panic([uuid.to_string().into(), username.into()])
            .on_conflict(
                OnConflict::column(Users::Uuid)
                    .update_column(Users::Username)
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn get_user(&self, uuid: Uuid) -> Result<Option<User>> {
        let query = Query::select()
            .columns([Users::Uuid, Users::Username])
            .from(Users::Table)
            .and_where(Expr::col(Users::Uuid).eq(uuid.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|row| {
            let uuid = Uuid::parse_str(&row.get::<String, _>("uuid"))?;
            Ok(User::new(uuid, row.get::<String, _>("username")))
        })
        .transpose()
    }

    async fn get_user_by_name(&self, username: &str) -> Result<Option<User>> {
        let query = Query::select()
            .columns([Users::Uuid, Users::Username])
            .from(Users::Table)
            .and_where(Expr::col(Users::Username).eq(username))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|row| {
            let uuid = Uuid::parse_str(&row.get::<String, _>("uuid"))?;
            Ok(User::new(uuid, row.get::<String, _>("username")))
        })
        .transpose()
    }

    async fn get_latest_snapshot(&self, user: Uuid) -> Result<Option<Snapshot>> {
        let query = Query::select()
            .columns([UserData::Data, UserData::Pinned])
            .from(UserData::Table)
            .and_where(Expr::col(UserData::PlayerUuid).eq(user.to_string()))
            .order_by(UserData::Timestamp, Order::Desc)
            .limit(1)
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|row| self.snapshot_from_row(&row)).transpose()
    }

    async fn get_all_snapshots(&self, user: Uuid) -> Result<Vec<Snapshot>> {
        let query = Query::select()
            .columns([UserData::Data, UserData::Pinned])
            .from(UserData::Table)
            .and_where(Expr::col(UserData::PlayerUuid).eq(user.to_string()))
            .order_by(UserData::Timestamp, Order::Desc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| self.snapshot_from_row(row))
            .collect()
    }

    async fn get_snapshot(&self, user: Uuid, version: Uuid) -> Result<Option<Snapshot>> {
        let query = Query::select()
            .columns([UserData::Data, UserData::Pinned])
            .from(UserData::Table)
            .and_where(Expr::col(UserData::PlayerUuid).eq(user.to_string()))
            .and_where(Expr::col(UserData::VersionUuid).eq(version.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|row| self.snapshot_from_row(&row)).transpose()
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let data = self.adapter.to_bytes(snapshot)?;

        let query = Query::insert()
            .into_table(UserData::Table)
            .columns([
                UserData::VersionUuid,
                UserData::PlayerUuid,
                UserData::Timestamp,
                UserData::SaveCause,
                UserData::Pinned,
                UserData::Data,
            ])
            .values_panic([
                snapshot.id().to_string().into(),
                snapshot.user_id().to_string().into(),
                Self::format_timestamp(snapshot.timestamp()).into(),
                snapshot.save_cause().as_str().into(),
                snapshot.pinned().into(),
                data.into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        self.rotate_snapshots(snapshot.user_id()).await
    }

    async fn update_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let data = self.adapter.to_bytes(snapshot)?;

        let query = Query::update()
            .table(UserData::Table)
            .values([
                (
                    UserData::Timestamp,
                    Self::format_timestamp(snapshot.timestamp()).into(),
                ),
                (UserData::SaveCause, snapshot.save_cause().as_str().into()),
                (UserData::Pinned, snapshot.pinned().into()),
                (UserData::Data, data.into()),
            ])
            .and_where(Expr::col(UserData::PlayerUuid).eq(snapshot.user_id().to_string()))
            .and_where(Expr::col(UserData::VersionUuid).eq(snapshot.id().to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_snapshot(&self, user: Uuid, version: Uuid) -> Result<bool> {
        let query = Query::delete()
            .from_table(UserData::Table)
            .and_where(Expr::col(UserData::PlayerUuid).eq(user.to_string()))
            .and_where(Expr::col(UserData::VersionUuid).eq(version.to_string()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn pin_snapshot(&self, user: Uuid, version: Uuid) -> Result<()> {
        self.set_pinned(user, version, true).await
    }

    async fn unpin_snapshot(&self, user: Uuid, version: Uuid) -> Result<()> {
        self.set_pinned(user, version, false).await
    }

    async fn delete_all_snapshots(&self, user: Uuid) -> Result<()> {
        let query = Query::delete()
            .from_table(UserData::Table)
            .and_where(Expr::col(UserData::PlayerUuid).eq(user.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
