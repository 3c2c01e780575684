//! Duplicate-delivery suppression: a lightweight table of envelope ids we've already
//! accepted (or explicitly rejected), independent of whether the message itself is still
//! retained, so a replayed post or a re-notified peer can't make it count twice.

use diesel::sql_query;
use diesel::sql_types::{BigInt, Text};
use diesel::{QueryableByName, RunQueryDsl};

use crate::conn::DbConn;
use crate::error::StoreResult;
use crate::models;

/// Remember that `envelope_id` was seen, expiring the memory itself at `expire_time`.
pub fn learn_message(conn: &mut DbConn, envelope_id: &[u8; 32], expire_time: i64) -> StoreResult<()> {
    let hex_id = models::to_hex(envelope_id);
    match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => {
            sql_query(
                "INSERT OR IGNORE INTO known_message (envelope_id, expire_time) VALUES (?, ?)",
            )
            .bind::<Text, _>(hex_id)
            .bind::<BigInt, _>(expire_time)
            .execute(c)?;
        }
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => {
            sql_query(
                "INSERT INTO known_message (envelope_id, expire_time) VALUES ($1, $2) \
                 ON CONFLICT (envelope_id) DO NOTHING",
            )
            .bind::<Text, _>(hex_id)
            .bind::<BigInt, _>(expire_time)
            .execute(c)?;
        }
    }
    Ok(())
}

/// Whether `envelope_id` has already been learned.
pub fn message_known(conn: &mut DbConn, envelope_id: &[u8; 32]) -> StoreResult<bool> {
    #[derive(QueryableByName)]
    struct Hit {
        #[diesel(sql_type = Text)]
        #[allow(dead_code)]
        envelope_id: String,
    }
    let hex_id = models::to_hex(envelope_id);
    let rows: Vec<Hit> = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query("SELECT envelope_id FROM known_message WHERE envelope_id = ?")
            .bind::<Text, _>(hex_id)
            .get_results(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => {
            sql_query("SELECT envelope_id FROM known_message WHERE envelope_id = $1")
                .bind::<Text, _>(hex_id)
                .get_results(c)?
        }
    };
    Ok(!rows.is_empty())
}

/// Drop every remembered envelope id whose own `expire_time` has passed.
pub fn forget_messages(conn: &mut DbConn, now: i64) -> StoreResult<u64> {
    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query("DELETE FROM known_message WHERE expire_time < ?")
            .bind::<BigInt, _>(now)
            .execute(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query("DELETE FROM known_message WHERE expire_time < $1")
            .bind::<BigInt, _>(now)
            .execute(c)?,
    };
    Ok(affected as u64)
}
