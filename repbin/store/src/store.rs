//! `Store` is the single entry point the rest of the server talks to; it owns the
//! connection pool, the blob backend, and the shard lock table, and re-exports every CRUD
//! module as a method so callers never touch a raw [`DbConn`] directly.

use std::path::PathBuf;

use crate::blob::BlobBackend;
use crate::conn::DbPool;
use crate::error::StoreResult;
use crate::models::{ExpireCandidate, MessageBlob, NewMessage, MessageRow, PeerRow, SignerCapability, SignerRow};
use crate::shard::ShardLocks;
use crate::{keyindex, messageexist, messages, peers, schema_sql, signers};

pub struct Store {
    pool: DbPool,
    shards: ShardLocks,
    blobs: BlobBackend,
}

impl Store {
    /// Open (and migrate) a store against `driver`/`url`. Pass `blob_path` to keep message
    /// bodies on the filesystem instead of in the `message_blob` table.
    pub fn open(
        driver: &str,
        url: &str,
        blob_path: Option<PathBuf>,
        pool_size: u32,
        num_shards: usize,
    ) -> StoreResult<Self> {
        let pool = DbPool::connect(driver, url, pool_size)?;
        let mut conn = pool.get()?;
        schema_sql::ensure_schema(&mut conn)?;
        let blobs = match blob_path {
            Some(path) => BlobBackend::Filesystem(path),
            None => BlobBackend::Database,
        };
        tracing::info!(driver, num_shards, blob_backend = %blobs.kind(), "store opened");
        Ok(Self {
            pool,
            shards: ShardLocks::new(num_shards.max(1)),
            blobs,
        })
    }

    pub fn driver_name(&self) -> &'static str {
        self.pool.driver_name()
    }

    // -- signers --------------------------------------------------------

    pub fn select_signer(&self, public_key: &[u8; 32]) -> StoreResult<Option<SignerRow>> {
        signers::select_signer(&mut self.pool.get()?, public_key)
    }

    pub fn update_or_insert_signer(&self, cap: &SignerCapability) -> StoreResult<()> {
        signers::update_or_insert_signer(&mut self.pool.get()?, cap)
    }

    pub fn add_message_signer(&self, public_key: &[u8; 32]) -> StoreResult<bool> {
        signers::add_message_signer(&mut self.pool.get()?, public_key)
    }

    pub fn del_message_signer(&self, public_key: &[u8; 32], now: i64) -> StoreResult<()> {
        signers::del_message_signer(&mut self.pool.get()?, public_key, now)
    }

    pub fn expire_signers(&self, now: i64, max_age: i64) -> StoreResult<u64> {
        signers::expire_signers(&mut self.pool.get()?, now, max_age)
    }

    // -- messages ---------------------------------------------------------

    pub fn next_counter(&self, receiver_constant_pub_key: &[u8; 32]) -> StoreResult<i64> {
        messages::next_counter(&mut self.pool.get()?, &self.shards, receiver_constant_pub_key)
    }

    pub fn insert_message(
        &self,
        msg: &NewMessage,
        counter: i64,
        post_time: i64,
        expire_time: i64,
    ) -> StoreResult<i64> {
        messages::insert_message(&mut self.pool.get()?, msg, counter, post_time, expire_time)
    }

    pub fn select_message(&self, message_id: &[u8; 32]) -> StoreResult<Option<MessageRow>> {
        messages::select_message(&mut self.pool.get()?, message_id)
    }

    pub fn delete_message(&self, id: i64) -> StoreResult<()> {
        messages::delete_message(&mut self.pool.get()?, id)
    }

    pub fn update_expire_message(&self, id: i64, expire_time: i64) -> StoreResult<()> {
        messages::update_expire_message(&mut self.pool.get()?, id, expire_time)
    }

    pub fn select_expired(&self, now: i64, limit: i64) -> StoreResult<Vec<ExpireCandidate>> {
        messages::select_expired(&mut self.pool.get()?, now, limit)
    }

    pub fn expire_message_counter(&self, now: i64, max_age: i64) -> StoreResult<u64> {
        messages::expire_message_counter(&mut self.pool.get()?, now, max_age)
    }

    // -- blobs --------------------------------------------------------------

    pub fn insert_blob(
        &self,
        message_row_id: i64,
        envelope_id: &[u8; 32],
        signer_pub: &[u8; 32],
        one_time: bool,
        data: &[u8],
    ) -> StoreResult<()> {
        self.blobs
            .insert(&mut self.pool.get()?, message_row_id, envelope_id, signer_pub, one_time, data)
    }

    pub fn get_blob(&self, envelope_id: &[u8; 32]) -> StoreResult<Option<MessageBlob>> {
        self.blobs.get(&mut self.pool.get()?, envelope_id)
    }

    pub fn delete_blob(&self, envelope_id: &[u8; 32]) -> StoreResult<()> {
        self.blobs.delete(&mut self.pool.get()?, envelope_id)
    }

    // -- indices --------------------------------------------------------------

    pub fn add_to_global_index(&self, message_row_id: i64, now: i64) -> StoreResult<()> {
        keyindex::add_to_global_index(&mut self.pool.get()?, message_row_id, now)
    }

    pub fn get_key_index(
        &self,
        receiver_constant_pub_key: &[u8; 32],
        start: i64,
        count: i64,
    ) -> StoreResult<Vec<MessageRow>> {
        keyindex::get_key_index(&mut self.pool.get()?, receiver_constant_pub_key, start, count)
    }

    pub fn get_global_index(&self, start: i64, count: i64) -> StoreResult<Vec<MessageRow>> {
        keyindex::get_global_index(&mut self.pool.get()?, start, count)
    }

    // -- peers --------------------------------------------------------------

    pub fn touch_peer(&self, public_key: &[u8; 32]) -> StoreResult<()> {
        peers::touch_peer(&mut self.pool.get()?, public_key)
    }

    pub fn update_peer_stats(
        &self,
        public_key: &[u8; 32],
        last_fetch: i64,
        last_position: i64,
        had_error: bool,
    ) -> StoreResult<()> {
        peers::update_peer_stats(&mut self.pool.get()?, public_key, last_fetch, last_position, had_error)
    }

    pub fn update_peer_notification(
        &self,
        public_key: &[u8; 32],
        now: i64,
        had_error: bool,
    ) -> StoreResult<()> {
        peers::update_peer_notification(&mut self.pool.get()?, public_key, now, had_error)
    }

    pub fn update_peer_token(&self, public_key: &[u8; 32], now: i64, signed_token: &[u8]) -> StoreResult<()> {
        peers::update_peer_token(&mut self.pool.get()?, public_key, now, signed_token)
    }

    pub fn select_peer(&self, public_key: &[u8; 32]) -> StoreResult<Option<PeerRow>> {
        peers::select_peer(&mut self.pool.get()?, public_key)
    }

    // -- replay suppression --------------------------------------------------

    pub fn learn_message(&self, envelope_id: &[u8; 32], expire_time: i64) -> StoreResult<()> {
        messageexist::learn_message(&mut self.pool.get()?, envelope_id, expire_time)
    }

    pub fn message_known(&self, envelope_id: &[u8; 32]) -> StoreResult<bool> {
        messageexist::message_known(&mut self.pool.get()?, envelope_id)
    }

    pub fn forget_messages(&self, now: i64) -> StoreResult<u64> {
        messageexist::forget_messages(&mut self.pool.get()?, now)
    }
}
