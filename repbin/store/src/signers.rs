//! Per-signer accounting: how much quota a public key has consumed and is still owed.

use diesel::sql_query;
use diesel::sql_types::{BigInt, Integer, Text};
use diesel::{QueryableByName, RunQueryDsl};

use crate::conn::DbConn;
use crate::error::{StoreError, StoreResult};
use crate::models::{self, SignerCapability, SignerRow};

#[derive(QueryableByName)]
struct SignerRecord {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    public_key: String,
    #[diesel(sql_type = Text)]
    nonce: String,
    #[diesel(sql_type = Integer)]
    bits: i32,
    #[diesel(sql_type = BigInt)]
    messages_posted: i64,
    #[diesel(sql_type = BigInt)]
    messages_retained: i64,
    #[diesel(sql_type = BigInt)]
    max_messages_posted: i64,
    #[diesel(sql_type = BigInt)]
    max_messages_retained: i64,
    #[diesel(sql_type = BigInt)]
    expire_target: i64,
    #[diesel(sql_type = BigInt)]
    last_message_deleted: i64,
}

impl From<SignerRecord> for SignerRow {
    fn from(r: SignerRecord) -> Self {
        SignerRow {
            id: r.id,
            public_key: models::from_hex_32(&r.public_key),
            nonce: models::from_hex_8(&r.nonce),
            bits: r.bits,
            messages_posted: r.messages_posted,
            messages_retained: r.messages_retained,
            max_messages_posted: r.max_messages_posted,
            max_messages_retained: r.max_messages_retained,
            expire_target: r.expire_target,
            last_message_deleted: r.last_message_deleted,
        }
    }
}

/// Look up a signer's current accounting row, if one has been created for it.
pub fn select_signer(conn: &mut DbConn, public_key: &[u8; 32]) -> StoreResult<Option<SignerRow>> {
    let hex_key = models::to_hex(public_key);
    let rows: Vec<SignerRecord> = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(
            "SELECT id, public_key, nonce, bits, messages_posted, messages_retained, \
             max_messages_posted, max_messages_retained, expire_target, last_message_deleted \
             FROM signer WHERE public_key = ?",
        )
        .bind::<Text, _>(hex_key)
        .get_results(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "SELECT id, public_key, nonce, bits, messages_posted, messages_retained, \
             max_messages_posted, max_messages_retained, expire_target, last_message_deleted \
             FROM signer WHERE public_key = $1",
        )
        .bind::<Text, _>(hex_key)
        .get_results(c)?,
    };
    Ok(rows.into_iter().next().map(Into::into))
}

/// Create the accounting row for a signer that has never posted before, granting it the
/// capability computed from its proof-of-work strength.
pub fn insert_signer(conn: &mut DbConn, cap: &SignerCapability) -> StoreResult<()> {
    let public_key = models::to_hex(&cap.public_key);
    let nonce = models::to_hex(&cap.nonce);
    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(
            "INSERT INTO signer (public_key, nonce, bits, max_messages_posted, \
             max_messages_retained, expire_target) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind::<Text, _>(public_key)
        .bind::<Text, _>(nonce)
        .bind::<Integer, _>(cap.bits)
        .bind::<BigInt, _>(cap.max_messages_posted)
        .bind::<BigInt, _>(cap.max_messages_retained)
        .bind::<BigInt, _>(cap.expire_target)
        .execute(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "INSERT INTO signer (public_key, nonce, bits, max_messages_posted, \
             max_messages_retained, expire_target) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (public_key) DO NOTHING",
        )
        .bind::<Text, _>(public_key)
        .bind::<Text, _>(nonce)
        .bind::<Integer, _>(cap.bits)
        .bind::<BigInt, _>(cap.max_messages_posted)
        .bind::<BigInt, _>(cap.max_messages_retained)
        .bind::<BigInt, _>(cap.expire_target)
        .execute(c)?,
    };
    if affected == 0 {
        return Err(StoreError::NoModify);
    }
    Ok(())
}

/// Refresh a signer's quota and nonce after it re-proves a stronger (or renewed) hashcash
/// stamp; never lowers `messages_posted`/`messages_retained`, which only the post/delete
/// paths touch.
pub fn update_signer(conn: &mut DbConn, cap: &SignerCapability) -> StoreResult<()> {
    let public_key = models::to_hex(&cap.public_key);
    let nonce = models::to_hex(&cap.nonce);
    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(
            "UPDATE signer SET nonce = ?, bits = ?, max_messages_posted = ?, \
             max_messages_retained = ?, expire_target = ? WHERE public_key = ?",
        )
        .bind::<Text, _>(nonce)
        .bind::<Integer, _>(cap.bits)
        .bind::<BigInt, _>(cap.max_messages_posted)
        .bind::<BigInt, _>(cap.max_messages_retained)
        .bind::<BigInt, _>(cap.expire_target)
        .bind::<Text, _>(public_key)
        .execute(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "UPDATE signer SET nonce = $1, bits = $2, max_messages_posted = $3, \
             max_messages_retained = $4, expire_target = $5 WHERE public_key = $6",
        )
        .bind::<Text, _>(nonce)
        .bind::<Integer, _>(cap.bits)
        .bind::<BigInt, _>(cap.max_messages_posted)
        .bind::<BigInt, _>(cap.max_messages_retained)
        .bind::<BigInt, _>(cap.expire_target)
        .bind::<Text, _>(public_key)
        .execute(c)?,
    };
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Insert a signer row if none exists yet, otherwise update it in place.
pub fn update_or_insert_signer(conn: &mut DbConn, cap: &SignerCapability) -> StoreResult<()> {
    match update_signer(conn, cap) {
        Ok(()) => Ok(()),
        Err(StoreError::NotFound) => insert_signer(conn, cap),
        Err(other) => Err(other),
    }
}

/// Atomically admit one more message for `public_key`, incrementing both posted and
/// retained counters, but only while both stay under the signer's quota (§8 invariant 3).
/// Returns whether the message was admitted.
pub fn add_message_signer(conn: &mut DbConn, public_key: &[u8; 32]) -> StoreResult<bool> {
    let hex_key = models::to_hex(public_key);
    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(
            "UPDATE signer SET messages_posted = messages_posted + 1, \
             messages_retained = messages_retained + 1 \
             WHERE public_key = ? AND messages_retained < max_messages_retained \
             AND messages_posted < max_messages_posted",
        )
        .bind::<Text, _>(hex_key)
        .execute(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "UPDATE signer SET messages_posted = messages_posted + 1, \
             messages_retained = messages_retained + 1 \
             WHERE public_key = $1 AND messages_retained < max_messages_retained \
             AND messages_posted < max_messages_posted",
        )
        .bind::<Text, _>(hex_key)
        .execute(c)?,
    };
    Ok(affected > 0)
}

/// Two-step signer garbage collection (§4.A expiry queries). First mark every signer that
/// currently retains nothing as newly dormant; then delete any signer that has been
/// dormant for longer than `max_age`. Splitting the mark and the sweep means a signer gets
/// at least one full `max_age` window of grace after its last message disappears before its
/// accounting row (and its quota history) is forgotten.
pub fn expire_signers(conn: &mut DbConn, now: i64, max_age: i64) -> StoreResult<u64> {
    match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => {
            sql_query(
                "UPDATE signer SET last_message_deleted = ? \
                 WHERE messages_retained = 0 AND last_message_deleted = 0",
            )
            .bind::<BigInt, _>(now)
            .execute(c)?;
            let deleted = sql_query(
                "DELETE FROM signer WHERE last_message_deleted > 0 AND last_message_deleted < ?",
            )
            .bind::<BigInt, _>(now - max_age)
            .execute(c)?;
            Ok(deleted as u64)
        }
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => {
            sql_query(
                "UPDATE signer SET last_message_deleted = $1 \
                 WHERE messages_retained = 0 AND last_message_deleted = 0",
            )
            .bind::<BigInt, _>(now)
            .execute(c)?;
            let deleted = sql_query(
                "DELETE FROM signer WHERE last_message_deleted > 0 AND last_message_deleted < $1",
            )
            .bind::<BigInt, _>(now - max_age)
            .execute(c)?;
            Ok(deleted as u64)
        }
    }
}

/// Release one unit of retained quota after a message belonging to `public_key` expires
/// or is deleted. Only stamps `last_message_deleted` when this release brings the signer
/// down to zero retained messages; a signer with ongoing churn must not accumulate a
/// stale timestamp that `expire_signers` would later treat as dormant.
pub fn del_message_signer(conn: &mut DbConn, public_key: &[u8; 32], now: i64) -> StoreResult<()> {
    let hex_key = models::to_hex(public_key);
    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(
            "UPDATE signer SET messages_retained = messages_retained - 1, \
             last_message_deleted = CASE WHEN messages_retained - 1 <= 0 THEN ? ELSE last_message_deleted END \
             WHERE public_key = ? AND messages_retained > 0",
        )
        .bind::<BigInt, _>(now)
        .bind::<Text, _>(hex_key)
        .execute(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "UPDATE signer SET messages_retained = messages_retained - 1, \
             last_message_deleted = CASE WHEN messages_retained - 1 <= 0 THEN $1 ELSE last_message_deleted END \
             WHERE public_key = $2 AND messages_retained > 0",
        )
        .bind::<BigInt, _>(now)
        .bind::<Text, _>(hex_key)
        .execute(c)?,
    };
    if affected == 0 {
        return Err(StoreError::NoModify);
    }
    Ok(())
}
