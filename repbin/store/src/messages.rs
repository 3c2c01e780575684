//! Message row lifecycle: counter allocation, insertion, lookup, expiry.

use diesel::sql_query;
use diesel::sql_types::{BigInt, Integer, Text};
use diesel::{QueryableByName, RunQueryDsl};

use crate::conn::DbConn;
use crate::error::{StoreError, StoreResult};
use crate::models::{self, ExpireCandidate, MessageRow, NewMessage};
use crate::shard::ShardLocks;

#[derive(QueryableByName)]
struct MessageRecord {
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

impl From<MessageRecord> for MessageRow {
    fn from(r: MessageRecord) -> Self {
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

/// Allocate the next per-recipient counter value, serialized per-recipient via `shards` so
/// two concurrent posts to the same hidden key never race on the read-increment-write.
pub fn next_counter(
    conn: &mut DbConn,
    shards: &ShardLocks,
    receiver_constant_pub_key: &[u8; 32],
) -> StoreResult<i64> {
    let _guard = shards.lock(receiver_constant_pub_key);
    let hex_key = models::to_hex(receiver_constant_pub_key);

    #[derive(QueryableByName)]
    struct Counter {
        #[diesel(sql_type = BigInt)]
        counter: i64,
    }

    let existing: Vec<Counter> = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => {
            sql_query("SELECT counter FROM message_counter WHERE receiver_constant_pub_key = ?")
                .bind::<Text, _>(hex_key.clone())
                .get_results(c)?
        }
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => {
            sql_query("SELECT counter FROM message_counter WHERE receiver_constant_pub_key = $1")
                .bind::<Text, _>(hex_key.clone())
                .get_results(c)?
        }
    };

    let next = existing.first().map(|c| c.counter).unwrap_or(0) + 1;
    let now = crate::now();

    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => {
            if existing.is_empty() {
                sql_query(
                    "INSERT INTO message_counter (receiver_constant_pub_key, counter, last_time) \
                     VALUES (?, ?, ?)",
                )
                .bind::<Text, _>(hex_key)
                .bind::<BigInt, _>(next)
                .bind::<BigInt, _>(now)
                .execute(c)?
            } else {
                sql_query(
                    "UPDATE message_counter SET counter = ?, last_time = ? \
                     WHERE receiver_constant_pub_key = ?",
                )
                .bind::<BigInt, _>(next)
                .bind::<BigInt, _>(now)
                .bind::<Text, _>(hex_key)
                .execute(c)?
            }
        }
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => {
            if existing.is_empty() {
                sql_query(
                    "INSERT INTO message_counter (receiver_constant_pub_key, counter, last_time) \
                     VALUES ($1, $2, $3)",
                )
                .bind::<Text, _>(hex_key)
                .bind::<BigInt, _>(next)
                .bind::<BigInt, _>(now)
                .execute(c)?
            } else {
                sql_query(
                    "UPDATE message_counter SET counter = $1, last_time = $2 \
                     WHERE receiver_constant_pub_key = $3",
                )
                .bind::<BigInt, _>(next)
                .bind::<BigInt, _>(now)
                .bind::<Text, _>(hex_key)
                .execute(c)?
            }
        }
    };
    if affected == 0 {
        return Err(StoreError::NoModify);
    }
    Ok(next)
}

/// Insert a fully-formed message row, returning the allocated row id.
pub fn insert_message(
    conn: &mut DbConn,
    msg: &NewMessage,
    counter: i64,
    post_time: i64,
    expire_time: i64,
) -> StoreResult<i64> {
    let message_id = models::to_hex(&msg.message_id);
    let receiver = models::to_hex(&msg.receiver_constant_pub_key);
    let signer_pub = models::to_hex(&msg.signer_pub);
    let one_time = models::bool_to_int(msg.one_time);
    let sync = models::bool_to_int(msg.sync);
    let hidden = models::bool_to_int(msg.hidden);

    #[derive(QueryableByName)]
    struct Inserted {
        #[diesel(sql_type = BigInt)]
        id: i64,
    }

    let inserted: Vec<Inserted> = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => {
            sql_query(
                "INSERT INTO message (counter, message_id, receiver_constant_pub_key, \
                 signer_pub, post_time, expire_time, expire_request, distance, one_time, \
                 sync, hidden) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind::<BigInt, _>(counter)
            .bind::<Text, _>(message_id)
            .bind::<Text, _>(receiver)
            .bind::<Text, _>(signer_pub)
            .bind::<BigInt, _>(post_time)
            .bind::<BigInt, _>(expire_time)
            .bind::<BigInt, _>(msg.expire_request)
            .bind::<BigInt, _>(msg.distance)
            .bind::<Integer, _>(one_time)
            .bind::<Integer, _>(sync)
            .bind::<Integer, _>(hidden)
            .execute(c)?;
            sql_query("SELECT id FROM message WHERE message_id = ?")
                .bind::<Text, _>(models::to_hex(&msg.message_id))
                .get_results(c)?
        }
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "INSERT INTO message (counter, message_id, receiver_constant_pub_key, signer_pub, \
             post_time, expire_time, expire_request, distance, one_time, sync, hidden) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id",
        )
        .bind::<BigInt, _>(counter)
        .bind::<Text, _>(message_id)
        .bind::<Text, _>(receiver)
        .bind::<Text, _>(signer_pub)
        .bind::<BigInt, _>(post_time)
        .bind::<BigInt, _>(expire_time)
        .bind::<BigInt, _>(msg.expire_request)
        .bind::<BigInt, _>(msg.distance)
        .bind::<Integer, _>(one_time)
        .bind::<Integer, _>(sync)
        .bind::<Integer, _>(hidden)
        .get_results(c)?,
    };

    inserted.into_iter().next().map(|r| r.id).ok_or(StoreError::NoModify)
}

/// Fetch a message by the envelope id carried in the post, not the internal row id.
pub fn select_message(conn: &mut DbConn, message_id: &[u8; 32]) -> StoreResult<Option<MessageRow>> {
    let hex_id = models::to_hex(message_id);
    let rows: Vec<MessageRecord> = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(
            "SELECT id, counter, message_id, receiver_constant_pub_key, signer_pub, post_time, \
             expire_time, expire_request, distance, one_time, sync, hidden \
             FROM message WHERE message_id = ?",
        )
        .bind::<Text, _>(hex_id)
        .get_results(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "SELECT id, counter, message_id, receiver_constant_pub_key, signer_pub, post_time, \
             expire_time, expire_request, distance, one_time, sync, hidden \
             FROM message WHERE message_id = $1",
        )
        .bind::<Text, _>(hex_id)
        .get_results(c)?,
    };
    Ok(rows.into_iter().next().map(Into::into))
}

/// Delete a message by its internal row id, cascading to its global-index entry and blob.
pub fn delete_message(conn: &mut DbConn, id: i64) -> StoreResult<()> {
    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query("DELETE FROM message WHERE id = ?")
            .bind::<BigInt, _>(id)
            .execute(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query("DELETE FROM message WHERE id = $1")
            .bind::<BigInt, _>(id)
            .execute(c)?,
    };
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Move a message's expiry forward or back in response to a signed expire-request.
pub fn update_expire_message(conn: &mut DbConn, id: i64, expire_time: i64) -> StoreResult<()> {
    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query("UPDATE message SET expire_time = ? WHERE id = ?")
            .bind::<BigInt, _>(expire_time)
            .bind::<BigInt, _>(id)
            .execute(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query("UPDATE message SET expire_time = $1 WHERE id = $2")
            .bind::<BigInt, _>(expire_time)
            .bind::<BigInt, _>(id)
            .execute(c)?,
    };
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Select every message whose `expire_time` has passed, for the expiry sweep.
pub fn select_expired(conn: &mut DbConn, now: i64, limit: i64) -> StoreResult<Vec<ExpireCandidate>> {
    #[derive(QueryableByName)]
    struct Candidate {
        #[diesel(sql_type = BigInt)]
        id: i64,
        #[diesel(sql_type = Text)]
        message_id: String,
        #[diesel(sql_type = Text)]
        signer_pub: String,
    }
    let rows: Vec<Candidate> = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(
            "SELECT id, message_id, signer_pub FROM message WHERE expire_time < ? ORDER BY id ASC LIMIT ?",
        )
        .bind::<BigInt, _>(now)
        .bind::<BigInt, _>(limit)
        .get_results(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "SELECT id, message_id, signer_pub FROM message WHERE expire_time < $1 ORDER BY id ASC LIMIT $2",
        )
        .bind::<BigInt, _>(now)
        .bind::<BigInt, _>(limit)
        .get_results(c)?,
    };
    Ok(rows
        .into_iter()
        .map(|r| ExpireCandidate {
            id: r.id,
            message_id: models::from_hex_32(&r.message_id),
            signer_pub: models::from_hex_32(&r.signer_pub),
        })
        .collect())
}

/// Delete `message_counter` rows that have not advanced in longer than `max_age`, letting a
/// recipient's distance/counter sequence restart from zero instead of growing unbounded for
/// keys nobody posts to anymore.
pub fn expire_message_counter(conn: &mut DbConn, now: i64, max_age: i64) -> StoreResult<u64> {
    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query("DELETE FROM message_counter WHERE last_time < ?")
            .bind::<BigInt, _>(now - max_age)
            .execute(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query("DELETE FROM message_counter WHERE last_time < $1")
            .bind::<BigInt, _>(now - max_age)
            .execute(c)?,
    };
    Ok(affected as u64)
}
