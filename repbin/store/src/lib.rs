// Copyright (c) 2024 Botho Foundation

//! Dual-backend (sqlite/postgres) relational storage for the repbin message store: signer
//! accounting, message rows, per-recipient counters, the global index, peer bookkeeping,
//! blob storage, and duplicate-post suppression.

mod blob;
mod conn;
mod error;
mod keyindex;
mod messageexist;
mod messages;
mod models;
mod peers;
mod schema_sql;
mod shard;
mod signers;
mod store;

pub use error::{StoreError, StoreResult};
pub use models::{ExpireCandidate, MessageBlob, MessageRow, NewMessage, PeerRow, SignerCapability, SignerRow};
pub use store::Store;

/// Current unix time, in seconds. The only place `SystemTime::now()` is read inside this
/// crate; every other function takes `now` as a parameter so tests can control it.
pub(crate) fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{NewMessage, SignerCapability};

    fn open_memory() -> Store {
        Store::open("sqlite", ":memory:", None, 1, 4).expect("opens")
    }

    #[test]
    fn signer_insert_then_update_preserves_counts() {
        let store = open_memory();
        let key = [1u8; 32];
        let cap = SignerCapability {
            public_key: key,
            nonce: [0u8; 8],
            bits: 8,
            max_messages_posted: 1,
            max_messages_retained: 1,
            expire_target: 86_400,
        };
        store.update_or_insert_signer(&cap).expect("inserts");
        assert!(store.add_message_signer(&key).expect("admits"));

        let stronger = SignerCapability {
            bits: 16,
            max_messages_posted: 5,
            max_messages_retained: 5,
            ..cap
        };
        store.update_or_insert_signer(&stronger).expect("updates");

        let row = store.select_signer(&key).expect("query").expect("exists");
        assert_eq!(row.bits, 16);
        assert_eq!(row.max_messages_posted, 5);
        assert_eq!(row.messages_posted, 1, "posted count must survive the capability update");
    }

    #[test]
    fn counter_allocation_is_monotone_per_recipient() {
        let store = open_memory();
        let recipient = [7u8; 32];
        let first = store.next_counter(&recipient).expect("allocates");
        let second = store.next_counter(&recipient).expect("allocates");
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn message_round_trips_through_insert_and_select() {
        let store = open_memory();
        let msg = NewMessage {
            message_id: [9u8; 32],
            receiver_constant_pub_key: [2u8; 32],
            signer_pub: [3u8; 32],
            expire_request: 0,
            distance: 0,
            one_time: false,
            sync: true,
            hidden: false,
        };
        let counter = store.next_counter(&msg.receiver_constant_pub_key).expect("counter");
        let row_id = store
            .insert_message(&msg, counter, 100, 200)
            .expect("inserts");
        assert!(row_id > 0);

        let fetched = store.select_message(&msg.message_id).expect("query").expect("exists");
        assert_eq!(fetched.counter, counter);
        assert_eq!(fetched.post_time, 100);
        assert_eq!(fetched.expire_time, 200);
    }

    #[test]
    fn known_message_dedup_round_trips() {
        let store = open_memory();
        let id = [5u8; 32];
        assert!(!store.message_known(&id).expect("query"));
        store.learn_message(&id, now() + 10).expect("learns");
        assert!(store.message_known(&id).expect("query"));
    }

    #[test]
    fn global_index_counter_tracks_entry_id_not_message_counter() {
        let store = open_memory();
        // Two different recipients so each message's own `counter` column starts at 1 —
        // distinct from the global index's own monotone `id`, which is what a peer must
        // paginate against.
        for i in 0..3u8 {
            let msg = NewMessage {
                message_id: [10 + i; 32],
                receiver_constant_pub_key: [i; 32],
                signer_pub: [0u8; 32],
                expire_request: 0,
                distance: 0,
                one_time: false,
                sync: true,
                hidden: false,
            };
            let counter = store.next_counter(&msg.receiver_constant_pub_key).expect("counter");
            let row_id = store.insert_message(&msg, counter, 100, 200).expect("inserts");
            store.add_to_global_index(row_id, 100).expect("indexes");
        }

        let first_page = store.get_global_index(0, 10).expect("reads");
        assert_eq!(first_page.len(), 3);
        assert_eq!(
            first_page.iter().map(|r| r.counter).collect::<Vec<_>>(),
            vec![1, 2, 3],
            "global index counter must be the entry's own monotone id"
        );

        // A peer that stopped at `last_position = 1` resumes at `start = 1`, matching the
        // original's `WHERE i.ID > ?` with no `+1` offset (id 1 must not be skipped on a
        // fresh peer whose `last_position` defaults to 0).
        let resumed = store.get_global_index(1, 10).expect("reads");
        assert_eq!(resumed.len(), 2);
        assert_eq!(resumed[0].counter, 2);
    }
}
