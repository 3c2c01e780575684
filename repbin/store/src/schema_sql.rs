//! Schema creation, issued as plain `CREATE TABLE IF NOT EXISTS` statements rather than
//! Diesel migrations so sqlite and postgres share one statement list differing only in
//! column type spelling (`INTEGER PRIMARY KEY AUTOINCREMENT` vs `BIGSERIAL PRIMARY KEY`).

use diesel::sql_query;
use diesel::RunQueryDsl;

use crate::conn::DbConn;
use crate::error::StoreResult;

const SQLITE_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS signer (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        public_key TEXT NOT NULL UNIQUE,
        nonce TEXT NOT NULL,
        bits INTEGER NOT NULL DEFAULT 0,
        messages_posted BIGINT NOT NULL DEFAULT 0,
        messages_retained BIGINT NOT NULL DEFAULT 0,
        max_messages_posted BIGINT NOT NULL DEFAULT 0,
        max_messages_retained BIGINT NOT NULL DEFAULT 0,
        expire_target BIGINT NOT NULL DEFAULT 0,
        last_message_deleted BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS peer (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        public_key TEXT NOT NULL UNIQUE,
        auth_token TEXT NOT NULL DEFAULT '',
        last_notify_send BIGINT NOT NULL DEFAULT 0,
        last_notify_from BIGINT NOT NULL DEFAULT 0,
        last_fetch BIGINT NOT NULL DEFAULT 0,
        error_count BIGINT NOT NULL DEFAULT 0,
        last_position BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS message (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        counter BIGINT NOT NULL,
        message_id TEXT NOT NULL UNIQUE,
        receiver_constant_pub_key TEXT NOT NULL,
        signer_pub TEXT NOT NULL,
        post_time BIGINT NOT NULL,
        expire_time BIGINT NOT NULL,
        expire_request BIGINT NOT NULL DEFAULT 0,
        distance BIGINT NOT NULL DEFAULT 0,
        one_time INTEGER NOT NULL DEFAULT 0,
        sync INTEGER NOT NULL DEFAULT 0,
        hidden INTEGER NOT NULL DEFAULT 0,
        UNIQUE (counter, receiver_constant_pub_key)
    )",
    "CREATE TABLE IF NOT EXISTS message_counter (
        receiver_constant_pub_key TEXT NOT NULL UNIQUE,
        counter BIGINT NOT NULL DEFAULT 0,
        last_time BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS global_index (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id BIGINT NOT NULL UNIQUE REFERENCES message(id) ON DELETE CASCADE,
        entry_time BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS message_blob (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id BIGINT NOT NULL UNIQUE REFERENCES message(id) ON DELETE CASCADE,
        envelope_id TEXT NOT NULL,
        signer_pub TEXT NOT NULL,
        one_time INTEGER NOT NULL DEFAULT 0,
        data BLOB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS known_message (
        envelope_id TEXT PRIMARY KEY,
        expire_time BIGINT NOT NULL
    )",
];

const POSTGRES_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS signer (
        id BIGSERIAL PRIMARY KEY,
        public_key TEXT NOT NULL UNIQUE,
        nonce TEXT NOT NULL,
        bits INTEGER NOT NULL DEFAULT 0,
        messages_posted BIGINT NOT NULL DEFAULT 0,
        messages_retained BIGINT NOT NULL DEFAULT 0,
        max_messages_posted BIGINT NOT NULL DEFAULT 0,
        max_messages_retained BIGINT NOT NULL DEFAULT 0,
        expire_target BIGINT NOT NULL DEFAULT 0,
        last_message_deleted BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS peer (
        id BIGSERIAL PRIMARY KEY,
        public_key TEXT NOT NULL UNIQUE,
        auth_token TEXT NOT NULL DEFAULT '',
        last_notify_send BIGINT NOT NULL DEFAULT 0,
        last_notify_from BIGINT NOT NULL DEFAULT 0,
        last_fetch BIGINT NOT NULL DEFAULT 0,
        error_count BIGINT NOT NULL DEFAULT 0,
        last_position BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS message (
        id BIGSERIAL PRIMARY KEY,
        counter BIGINT NOT NULL,
        message_id TEXT NOT NULL UNIQUE,
        receiver_constant_pub_key TEXT NOT NULL,
        signer_pub TEXT NOT NULL,
        post_time BIGINT NOT NULL,
        expire_time BIGINT NOT NULL,
        expire_request BIGINT NOT NULL DEFAULT 0,
        distance BIGINT NOT NULL DEFAULT 0,
        one_time INTEGER NOT NULL DEFAULT 0,
        sync INTEGER NOT NULL DEFAULT 0,
        hidden INTEGER NOT NULL DEFAULT 0,
        UNIQUE (counter, receiver_constant_pub_key)
    )",
    "CREATE TABLE IF NOT EXISTS message_counter (
        receiver_constant_pub_key TEXT NOT NULL UNIQUE,
        counter BIGINT NOT NULL DEFAULT 0,
        last_time BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS global_index (
        id BIGSERIAL PRIMARY KEY,
        message_id BIGINT NOT NULL UNIQUE REFERENCES message(id) ON DELETE CASCADE,
        entry_time BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS message_blob (
        id BIGSERIAL PRIMARY KEY,
        message_id BIGINT NOT NULL UNIQUE REFERENCES message(id) ON DELETE CASCADE,
        envelope_id TEXT NOT NULL,
        signer_pub TEXT NOT NULL,
        one_time INTEGER NOT NULL DEFAULT 0,
        data BYTEA NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS known_message (
        envelope_id TEXT PRIMARY KEY,
        expire_time BIGINT NOT NULL
    )",
];

/// Create every table the store needs, idempotently, on whichever backend `conn` wraps.
pub fn ensure_schema(conn: &mut DbConn) -> StoreResult<()> {
    match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => {
            tracing::debug!(driver = "sqlite", statements = SQLITE_STATEMENTS.len(), "ensuring schema");
            for stmt in SQLITE_STATEMENTS {
                sql_query(*stmt).execute(c)?;
            }
        }
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => {
            tracing::debug!(driver = "postgres", statements = POSTGRES_STATEMENTS.len(), "ensuring schema");
            for stmt in POSTGRES_STATEMENTS {
                sql_query(*stmt).execute(c)?;
            }
        }
    }
    tracing::info!("schema ready");
    Ok(())
}
