//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Users table schema.
#[derive(Iden)]
pub enum Users {
    Table,
    #[iden = "uuid"]
    Uuid,
    #[iden = "username"]
    Username,
}

/// Snapshot history table schema.
#[derive(Iden)]
pub enum UserData {
    Table,
    #[iden = "version_uuid"]
    VersionUuid,
    #[iden = "player_uuid"]
    PlayerUuid,
    #[iden = "timestamp"]
    Timestamp,
    #[iden = "save_cause"]
    SaveCause,
    #[iden = "pinned"]
    Pinned,
    #[iden = "data"]
    Data,
}

/// SQL for creating the users table.
pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    uuid TEXT NOT NULL PRIMARY KEY,
    username TEXT NOT NULL
);
"#;

/// SQL for creating the snapshot history table.
pub const CREATE_USER_DATA_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_data (
    version_uuid TEXT NOT NULL PRIMARY KEY,
    player_uuid TEXT NOT NULL REFERENCES users(uuid),
    timestamp TEXT NOT NULL,
    save_cause TEXT NOT NULL,
    pinned INTEGER NOT NULL DEFAULT 0,
    data BLOB NOT NULL
);
"#;

/// Index supporting "most recent N snapshots per user".
pub const CREATE_USER_DATA_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_user_data_player_timestamp
    ON user_data(player_uuid, timestamp);
"#;
