// Copyright (c) 2024 Botho Foundation

//! Business logic layered over `bth-repbin-store`: admission, fetch, deletion-on-read, and
//! expiry. None of the relational or blob details leak through this API — callers hand over
//! parsed, verified structs and get back outcomes or `MessageStoreError`.

mod error;

use std::sync::Arc;

use bth_repbin_store::{NewMessage, SignerCapability, Store};
use tokio::sync::mpsc;

pub use error::{MessageStoreError, MessageStoreResult};

/// Capacity of the put-notify channel. A burst of admissions collapses into "something
/// changed" rather than queuing one wakeup per message; the timer loop only cares whether
/// the channel has anything in it at all.
const NOTIFY_CHANNEL_CAPACITY: usize = 3;

/// What a successful `put` allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    pub row_id: i64,
    pub counter: i64,
    pub post_time: i64,
    pub expire_time: i64,
}

/// Counts produced by one `expire_from_index` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpireSummary {
    pub messages_expired: u64,
    pub signers_expired: u64,
    pub counters_expired: u64,
    pub known_forgotten: u64,
}

/// Business-logic wrapper around a [`Store`]. Cheap to clone: internally an `Arc`.
pub struct MessageStore {
    store: Arc<Store>,
    notify_tx: mpsc::Sender<()>,
}

impl MessageStore {
    /// Wrap `store`, returning both the handle and the receiving end of its notify channel
    /// (the timer loop holds the receiver; `put_notify` holds the sender).
    pub fn new(store: Arc<Store>) -> (Self, mpsc::Receiver<()>) {
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_CHANNEL_CAPACITY);
        (Self { store, notify_tx }, notify_rx)
    }

    /// Admit a message. See the module docs for the ten-step contract; in short: reject
    /// duplicates and quota violations, merge signer capability, allocate a counter, write
    /// the row, then best-effort write the blob and (if eligible) the global index entry.
    /// Failures in the best-effort tail are logged, not propagated — the row already exists
    /// and counts against the signer's quota regardless of whether the blob lands.
    pub fn put(
        &self,
        msg: &NewMessage,
        signer: &SignerCapability,
        blob: &[u8],
    ) -> MessageStoreResult<PutOutcome> {
        if self.store.message_known(&msg.message_id)? {
            return Err(MessageStoreError::Duplicate);
        }

        let existing = self.store.select_signer(&msg.signer_pub)?;
        let cap = match &existing {
            Some(e) if e.bits > signer.bits => SignerCapability {
                public_key: msg.signer_pub,
                nonce: e.nonce,
                bits: e.bits,
                max_messages_posted: e.max_messages_posted,
                max_messages_retained: e.max_messages_retained,
                expire_target: e.expire_target,
            },
            _ => SignerCapability {
                public_key: msg.signer_pub,
                ..signer.clone()
            },
        };

        if let Some(e) = &existing {
            if e.messages_posted >= cap.max_messages_posted || e.messages_retained >= cap.max_messages_retained {
                return Err(MessageStoreError::PostLimit);
            }
        }

        let now = now();
        let post_time = now;
        let expire_time = std::cmp::max(now + cap.expire_target, msg.expire_request);

        self.store.update_or_insert_signer(&cap)?;

        if !self.store.add_message_signer(&msg.signer_pub)? {
            return Err(MessageStoreError::PostLimit);
        }

        let counter = self.store.next_counter(&msg.receiver_constant_pub_key)?;
        let row_id = self.store.insert_message(msg, counter, post_time, expire_time)?;
        self.store.learn_message(&msg.message_id, expire_time)?;

        if let Err(err) = self
            .store
            .insert_blob(row_id, &msg.message_id, &msg.signer_pub, msg.one_time, blob)
        {
            tracing::warn!(row_id, %err, "blob write failed after admission");
        }

        if msg.sync && !msg.one_time {
            if let Err(err) = self.store.add_to_global_index(row_id, now) {
                tracing::warn!(row_id, %err, "global index append failed after admission");
            }
        }

        Ok(PutOutcome {
            row_id,
            counter,
            post_time,
            expire_time,
        })
    }

    /// `put`, then best-effort wake up the timer loop. A full notify channel means a wakeup
    /// is already pending, so the drop is harmless.
    pub fn put_notify(
        &self,
        msg: &NewMessage,
        signer: &SignerCapability,
        blob: &[u8],
    ) -> MessageStoreResult<PutOutcome> {
        let outcome = self.put(msg, signer, blob)?;
        let _ = self.notify_tx.try_send(());
        Ok(outcome)
    }

    /// Fetch a message's body. One-time messages are deleted (blob, signer quota, row) right
    /// after the read; all three deletions are best-effort since the caller already has the
    /// bytes and a failed cleanup is a future expiry sweep's problem, not the fetcher's.
    pub fn fetch(&self, message_id: &[u8; 32]) -> MessageStoreResult<Vec<u8>> {
        let row = self
            .store
            .select_message(message_id)?
            .ok_or(MessageStoreError::NotFound)?;
        let blob = self
            .store
            .get_blob(message_id)?
            .ok_or(MessageStoreError::NotFound)?;

        if row.one_time {
            let now = now();
            if let Err(err) = self.store.delete_blob(message_id) {
                tracing::warn!(%err, "one-time blob cleanup failed");
            }
            if let Err(err) = self.store.del_message_signer(&row.signer_pub, now) {
                tracing::warn!(%err, "one-time signer cleanup failed");
            }
            if let Err(err) = self.store.delete_message(row.id) {
                tracing::warn!(%err, "one-time row cleanup failed");
            }
        }

        Ok(blob.data)
    }

    /// Whether `message_id` has already been admitted, for admission-side duplicate checks
    /// that don't need the full row (e.g. peer fetch loops skipping entries they already hold).
    pub fn message_exists(&self, message_id: &[u8; 32]) -> MessageStoreResult<bool> {
        Ok(self.store.message_known(message_id)?)
    }

    /// Deletion request: move a message's expiry to "now" if `private_key` derives the
    /// recipient key the message was addressed to. Actual removal happens on the next
    /// `expire_from_index` sweep, not here. Callers that must keep failure and success
    /// timing-indistinguishable add their own delay around this call; this function itself
    /// performs no intentional delay.
    pub fn pre_expire(&self, message_id: &[u8; 32], private_key: &[u8; 32]) -> MessageStoreResult<()> {
        let row = self
            .store
            .select_message(message_id)?
            .ok_or(MessageStoreError::NotFound)?;
        let derived_pub = bth_repbin_crypto::keys::gen_pub_key(private_key);
        if row.receiver_constant_pub_key != derived_pub {
            return Err(MessageStoreError::WrongRecipient);
        }
        self.store.update_expire_message(row.id, now())?;
        Ok(())
    }

    /// One expiry pass: delete every row whose `expire_time` has passed (blob first, then
    /// row, then release the signer's retained-quota unit), then sweep dormant signers,
    /// stale per-recipient counters, and the replay-suppression set.
    pub fn expire_from_index(
        &self,
        max_age_signers: i64,
        max_age_recipients: i64,
        limit: i64,
    ) -> MessageStoreResult<ExpireSummary> {
        let now = now();
        let candidates = self.store.select_expired(now, limit)?;
        let messages_expired = candidates.len() as u64;

        for candidate in &candidates {
            if let Err(err) = self.store.delete_blob(&candidate.message_id) {
                tracing::warn!(%err, "expiry blob cleanup failed");
            }
            if let Err(err) = self.store.delete_message(candidate.id) {
                tracing::warn!(%err, "expiry row cleanup failed");
            }
            if let Err(err) = self.store.del_message_signer(&candidate.signer_pub, now) {
                tracing::warn!(%err, "expiry signer quota release failed");
            }
        }

        let signers_expired = self.store.expire_signers(now, max_age_signers)?;
        let counters_expired = self.store.expire_message_counter(now, max_age_recipients)?;
        let known_forgotten = self.store.forget_messages(now - max_age_recipients)?;

        Ok(ExpireSummary {
            messages_expired,
            signers_expired,
            counters_expired,
            known_forgotten,
        })
    }
}

/// Current unix time, in seconds. The only place `SystemTime::now()` is read inside this
/// crate; admission and expiry both take it from here so a single call sees one consistent
/// value across its steps.
fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bth_repbin_crypto::keys;

    fn open() -> (MessageStore, mpsc::Receiver<()>) {
        let store = Store::open("sqlite", ":memory:", None, 1, 4).expect("opens");
        MessageStore::new(Arc::new(store))
    }

    fn signer(bits: i32) -> SignerCapability {
        SignerCapability {
            public_key: [1u8; 32],
            nonce: [0u8; 8],
            bits,
            max_messages_posted: 2,
            max_messages_retained: 2,
            expire_target: 86_400,
        }
    }

    fn message(message_id: [u8; 32], recipient: [u8; 32]) -> NewMessage {
        NewMessage {
            message_id,
            receiver_constant_pub_key: recipient,
            signer_pub: [1u8; 32],
            expire_request: 0,
            distance: 0,
            one_time: false,
            sync: true,
            hidden: false,
        }
    }

    #[test]
    fn put_then_fetch_round_trips_the_body() {
        let (ms, _rx) = open();
        let msg = message([9u8; 32], [2u8; 32]);
        ms.put(&msg, &signer(8), b"hello").expect("admits");

        let body = ms.fetch(&[9u8; 32]).expect("fetches");
        assert_eq!(body, b"hello");
    }

    #[test]
    fn duplicate_message_id_is_rejected() {
        let (ms, _rx) = open();
        let msg = message([9u8; 32], [2u8; 32]);
        ms.put(&msg, &signer(8), b"hello").expect("admits");

        let again = ms.put(&msg, &signer(8), b"hello again");
        assert!(matches!(again, Err(MessageStoreError::Duplicate)));
    }

    #[test]
    fn quota_exhaustion_rejects_further_posts() {
        let (ms, _rx) = open();
        let cap = SignerCapability {
            max_messages_posted: 1,
            max_messages_retained: 1,
            ..signer(8)
        };
        ms.put(&message([1u8; 32], [2u8; 32]), &cap, b"one")
            .expect("first admits");

        let second = ms.put(&message([2u8; 32], [2u8; 32]), &cap, b"two");
        assert!(matches!(second, Err(MessageStoreError::PostLimit)));
    }

    #[test]
    fn one_time_message_is_gone_after_first_fetch() {
        let (ms, _rx) = open();
        let mut msg = message([3u8; 32], [2u8; 32]);
        msg.one_time = true;
        ms.put(&msg, &signer(8), b"burn").expect("admits");

        assert_eq!(ms.fetch(&[3u8; 32]).expect("first fetch"), b"burn");
        assert!(matches!(ms.fetch(&[3u8; 32]), Err(MessageStoreError::NotFound)));
    }

    #[test]
    fn pre_expire_requires_matching_recipient_key() {
        let (ms, _rx) = open();
        let recipient_priv = keys::gen_random_key();
        let recipient_pub = keys::gen_pub_key(&recipient_priv);
        let other_priv = keys::gen_random_key();

        ms.put(&message([4u8; 32], recipient_pub), &signer(8), b"x")
            .expect("admits");

        assert!(matches!(
            ms.pre_expire(&[4u8; 32], &other_priv),
            Err(MessageStoreError::WrongRecipient)
        ));
        ms.pre_expire(&[4u8; 32], &recipient_priv).expect("matches");
    }

    #[test]
    fn expire_from_index_clears_past_due_rows() {
        let (ms, _rx) = open();
        let msg = message([5u8; 32], [2u8; 32]);
        let cap = SignerCapability {
            expire_target: -1_000_000,
            ..signer(8)
        };
        ms.put(&msg, &cap, b"soon-gone").expect("admits already past expiry");

        let summary = ms
            .expire_from_index(i64::MAX, i64::MAX, 100)
            .expect("sweeps");
        assert_eq!(summary.messages_expired, 1);
        assert!(matches!(ms.fetch(&[5u8; 32]), Err(MessageStoreError::NotFound)));
    }

    #[test]
    fn put_notify_wakes_the_receiver() {
        let (ms, mut rx) = open();
        ms.put_notify(&message([6u8; 32], [2u8; 32]), &signer(8), b"x")
            .expect("admits");
        assert!(rx.try_recv().is_ok());
    }
}
