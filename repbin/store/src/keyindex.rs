//! Index listings: per-recipient key index and the server-wide global index. Both return
//! full message rows (not bare ids) so the HTTP index handlers can render an `IDX:` line
//! per entry without a follow-up `select_message` per id.

use diesel::sql_query;
use diesel::sql_types::{BigInt, Integer, Text};
use diesel::{QueryableByName, RunQueryDsl};

use crate::conn::DbConn;
use crate::error::StoreResult;
use crate::models::{self, MessageRow};

#[derive(QueryableByName)]
struct IndexRecord {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = BigInt)]
    counter: i64,
    #[diesel(sql_type = Text)]
    message_id: String,
    #[diesel(sql_type = Text)]
    receiver_constant_pub_key: String,
    #[diesel(sql_type = Text)]
    signer_pub: String,
    #[diesel(sql_type = BigInt)]
    post_time: i64,
    #[diesel(sql_type = BigInt)]
    expire_time: i64,
    #[diesel(sql_type = BigInt)]
    expire_request: i64,
    #[diesel(sql_type = BigInt)]
    distance: i64,
    #[diesel(sql_type = Integer)]
    one_time: i32,
    #[diesel(sql_type = Integer)]
    sync: i32,
    #[diesel(sql_type = Integer)]
    hidden: i32,
}

impl From<IndexRecord> for MessageRow {
    fn from(r: IndexRecord) -> Self {
        MessageRow {
            id: r.id,
            counter: r.counter,
            message_id: models::from_hex_32(&r.message_id),
            receiver_constant_pub_key: models::from_hex_32(&r.receiver_constant_pub_key),
            signer_pub: models::from_hex_32(&r.signer_pub),
            post_time: r.post_time,
            expire_time: r.expire_time,
            expire_request: r.expire_request,
            distance: r.distance,
            one_time: models::int_to_bool(r.one_time),
            sync: models::int_to_bool(r.sync),
            hidden: models::int_to_bool(r.hidden),
        }
    }
}

const INDEX_COLUMNS: &str = "id, counter, message_id, receiver_constant_pub_key, signer_pub, \
     post_time, expire_time, expire_request, distance, one_time, sync, hidden";

/// Append a freshly-posted message's row id to the global index, timestamped `now`.
pub fn add_to_global_index(conn: &mut DbConn, message_row_id: i64, now: i64) -> StoreResult<()> {
    match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => {
            sql_query("INSERT INTO global_index (message_id, entry_time) VALUES (?, ?)")
                .bind::<BigInt, _>(message_row_id)
                .bind::<BigInt, _>(now)
                .execute(c)?;
        }
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => {
            sql_query("INSERT INTO global_index (message_id, entry_time) VALUES ($1, $2)")
                .bind::<BigInt, _>(message_row_id)
                .bind::<BigInt, _>(now)
                .execute(c)?;
        }
    }
    Ok(())
}

/// Full rows for a recipient whose counter exceeds `start`, oldest-first, capped at
/// `count`. Callers read `found.len() == count` as "more may follow" (`CMD: Continue`).
pub fn get_key_index(
    conn: &mut DbConn,
    receiver_constant_pub_key: &[u8; 32],
    start: i64,
    count: i64,
) -> StoreResult<Vec<MessageRow>> {
    let hex_key = models::to_hex(receiver_constant_pub_key);
    let rows: Vec<IndexRecord> = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(format!(
            "SELECT {INDEX_COLUMNS} FROM message WHERE receiver_constant_pub_key = ? \
             AND counter > ? ORDER BY counter ASC LIMIT ?"
        ))
        .bind::<Text, _>(hex_key)
        .bind::<BigInt, _>(start)
        .bind::<BigInt, _>(count)
        .get_results(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(format!(
            "SELECT {INDEX_COLUMNS} FROM message WHERE receiver_constant_pub_key = $1 \
             AND counter > $2 ORDER BY counter ASC LIMIT $3"
        ))
        .bind::<Text, _>(hex_key)
        .bind::<BigInt, _>(start)
        .bind::<BigInt, _>(count)
        .get_results(c)?,
    };
    Ok(rows.into_iter().map(Into::into).collect())
}

/// Full rows from the server-wide global index starting at `start`, capped at `count`,
/// ordered by the index's own entry order rather than the message's per-recipient counter.
///
/// The `counter` field of the returned rows is `global_index.id`, not `message.counter` —
/// peers paginate their `last_position` off this value (§4.D), so it must track the same
/// column the `WHERE global_index.id > ?` filter advances over.
pub fn get_global_index(conn: &mut DbConn, start: i64, count: i64) -> StoreResult<Vec<MessageRow>> {
    let columns = INDEX_COLUMNS
        .split(", ")
        .map(|c| {
            if c == "counter" {
                "global_index.id AS counter".to_string()
            } else {
                format!("message.{c}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let rows: Vec<IndexRecord> = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(format!(
            "SELECT {columns} FROM global_index JOIN message ON message.id = global_index.message_id \
             WHERE global_index.id > ? ORDER BY global_index.id ASC LIMIT ?"
        ))
        .bind::<BigInt, _>(start)
        .bind::<BigInt, _>(count)
        .get_results(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(format!(
            "SELECT {columns} FROM global_index JOIN message ON message.id = global_index.message_id \
             WHERE global_index.id > $1 ORDER BY global_index.id ASC LIMIT $2"
        ))
        .bind::<BigInt, _>(start)
        .bind::<BigInt, _>(count)
        .get_results(c)?,
    };
    Ok(rows.into_iter().map(Into::into).collect())
}
