//! Peer bookkeeping: fetch/notify cursors and error counts used to back off misbehaving peers.

use diesel::sql_query;
use diesel::sql_types::{BigInt, Text};
use diesel::{QueryableByName, RunQueryDsl};

use crate::conn::DbConn;
use crate::error::{StoreError, StoreResult};
use crate::models::{self, PeerRow};

#[derive(QueryableByName)]
struct PeerRecord {
    #[diesel(sql_type = Text)]
    auth_token: String,
    #[diesel(sql_type = BigInt)]
    last_notify_send: i64,
    #[diesel(sql_type = BigInt)]
    last_notify_from: i64,
    #[diesel(sql_type = BigInt)]
    last_fetch: i64,
    #[diesel(sql_type = BigInt)]
    error_count: i64,
    #[diesel(sql_type = BigInt)]
    last_position: i64,
}

impl From<PeerRecord> for PeerRow {
    fn from(r: PeerRecord) -> Self {
        PeerRow {
            auth_token: hex::decode(r.auth_token).unwrap_or_default(),
            last_notify_send: r.last_notify_send,
            last_notify_from: r.last_notify_from,
            last_fetch: r.last_fetch,
            error_count: r.error_count,
            last_position: r.last_position,
        }
    }
}

/// Insert a peer row if one doesn't already exist for `public_key`; ignores the duplicate
/// instead of erroring, matching how the loader re-touches every configured peer on boot.
pub fn touch_peer(conn: &mut DbConn, public_key: &[u8; 32]) -> StoreResult<()> {
    let hex_key = models::to_hex(public_key);
    let result = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query("INSERT OR IGNORE INTO peer (public_key) VALUES (?)")
            .bind::<Text, _>(hex_key)
            .execute(c),
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "INSERT INTO peer (public_key) VALUES ($1) ON CONFLICT (public_key) DO NOTHING",
        )
        .bind::<Text, _>(hex_key)
        .execute(c),
    };
    result?;
    Ok(())
}

/// Record a completed fetch cycle: how far we got and whether it ended in error. A
/// successful cycle shrinks `error_count` by 2 (floored at 0); an erroring one grows it by
/// 1, so a peer that mostly behaves recovers faster than one that mostly doesn't (§4.D).
pub fn update_peer_stats(
    conn: &mut DbConn,
    public_key: &[u8; 32],
    last_fetch: i64,
    last_position: i64,
    had_error: bool,
) -> StoreResult<()> {
    let hex_key = models::to_hex(public_key);
    let delta: i64 = if had_error { 1 } else { -2 };
    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(
            "UPDATE peer SET last_fetch = ?, last_position = ?, \
             error_count = MAX(0, error_count + ?) WHERE public_key = ?",
        )
        .bind::<BigInt, _>(last_fetch)
        .bind::<BigInt, _>(last_position)
        .bind::<BigInt, _>(delta)
        .bind::<Text, _>(hex_key)
        .execute(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "UPDATE peer SET last_fetch = $1, last_position = $2, \
             error_count = GREATEST(0, error_count + $3) WHERE public_key = $4",
        )
        .bind::<BigInt, _>(last_fetch)
        .bind::<BigInt, _>(last_position)
        .bind::<BigInt, _>(delta)
        .bind::<Text, _>(hex_key)
        .execute(c)?,
    };
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Record that we just sent (or attempted to send) a notify ping to this peer.
pub fn update_peer_notification(
    conn: &mut DbConn,
    public_key: &[u8; 32],
    now: i64,
    had_error: bool,
) -> StoreResult<()> {
    let hex_key = models::to_hex(public_key);
    let bump = if had_error { 1 } else { 0 };
    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(
            "UPDATE peer SET last_notify_send = ?, error_count = error_count + ? \
             WHERE public_key = ?",
        )
        .bind::<BigInt, _>(now)
        .bind::<BigInt, _>(bump)
        .bind::<Text, _>(hex_key)
        .execute(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "UPDATE peer SET last_notify_send = $1, error_count = error_count + $2 \
             WHERE public_key = $3",
        )
        .bind::<BigInt, _>(now)
        .bind::<BigInt, _>(bump)
        .bind::<Text, _>(hex_key)
        .execute(c)?,
    };
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Store the signed proof token a peer most recently sent us, and when it sent it.
pub fn update_peer_token(
    conn: &mut DbConn,
    public_key: &[u8; 32],
    now: i64,
    signed_token: &[u8],
) -> StoreResult<()> {
    let hex_key = models::to_hex(public_key);
    let hex_token = hex::encode(signed_token);
    let affected = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(
            "UPDATE peer SET last_notify_from = ?, auth_token = ? WHERE public_key = ?",
        )
        .bind::<BigInt, _>(now)
        .bind::<Text, _>(hex_token)
        .bind::<Text, _>(hex_key)
        .execute(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "UPDATE peer SET last_notify_from = $1, auth_token = $2 WHERE public_key = $3",
        )
        .bind::<BigInt, _>(now)
        .bind::<Text, _>(hex_token)
        .bind::<Text, _>(hex_key)
        .execute(c)?,
    };
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Look up everything we know about a peer by its identity key.
pub fn select_peer(conn: &mut DbConn, public_key: &[u8; 32]) -> StoreResult<Option<PeerRow>> {
    let hex_key = models::to_hex(public_key);
    let rows: Vec<PeerRecord> = match conn {
        #[cfg(feature = "sqlite")]
        DbConn::Sqlite(c) => sql_query(
            "SELECT auth_token, last_notify_send, last_notify_from, last_fetch, error_count, \
             last_position FROM peer WHERE public_key = ?",
        )
        .bind::<Text, _>(hex_key)
        .get_results(c)?,
        #[cfg(feature = "postgres")]
        DbConn::Postgres(c) => sql_query(
            "SELECT auth_token, last_notify_send, last_notify_from, last_fetch, error_count, \
             last_position FROM peer WHERE public_key = $1",
        )
        .bind::<Text, _>(hex_key)
        .get_results(c)?,
    };
    Ok(rows.into_iter().next().map(Into::into))
}
