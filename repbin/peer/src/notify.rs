// Copyright (c) 2024 Botho Foundation

//! Notification cycle: tell every known peer a new message has arrived so it pulls from us
//! on its next fetch cycle (§4.D). One task per peer; a peer that is slow or unreachable
//! never holds up the others.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use rand::Rng;
use reqwest::Client;

use bth_repbin_store::Store;

use crate::auth;
use crate::descriptor::{PeerEntry, PeerSnapshot};

/// Fire one notify attempt at every peer in `snapshot`. `our_pub`/`our_key` identify this
/// server; `client` already carries the configured SOCKS proxy and connect timeout.
/// `notify_duration` is the tick interval this cycle runs on; each peer's attempt is spread
/// randomly across it (minus `timeout`) so peers don't all see us at the same instant.
pub async fn notify_peers(
    store: Arc<Store>,
    client: Client,
    snapshot: Arc<PeerSnapshot>,
    our_pub: [u8; 32],
    our_key: Arc<SigningKey>,
    notify_duration: Duration,
    timeout: Duration,
) {
    let mut tasks = Vec::with_capacity(snapshot.gossip.len());
    for peer in snapshot.gossip.values().cloned() {
        let store = store.clone();
        let client = client.clone();
        let our_key = our_key.clone();
        tasks.push(tokio::spawn(async move {
            notify_one(&store, &client, &peer, our_pub, &our_key, notify_duration, timeout).await;
        }));
    }
    for task in tasks {
        let _ = task.await;
    }
}

async fn notify_one(
    store: &Store,
    client: &Client,
    peer: &PeerEntry,
    our_pub: [u8; 32],
    our_key: &SigningKey,
    notify_duration: Duration,
    timeout: Duration,
) {
    let sleep_window = notify_duration.saturating_sub(timeout);
    if !sleep_window.is_zero() {
        let jitter_ms = rand::thread_rng().gen_range(0..=sleep_window.as_millis() as u64);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
    }

    let now = now();
    let token = auth::sign_proof_token(now, &peer.public_key, &our_pub, our_key);
    let encoded = auth::encode_token(&token);
    let url = format!("{}/notify?auth={}", peer.url.trim_end_matches('/'), encoded);

    let had_error = match client.get(&url).timeout(timeout).send().await {
        Ok(resp) if resp.status().is_success() => false,
        Ok(resp) => {
            tracing::warn!(url = %peer.url, status = %resp.status(), "peer rejected notify");
            true
        }
        Err(err) => {
            tracing::warn!(url = %peer.url, %err, "notify request failed");
            true
        }
    };

    if let Err(err) = store.update_peer_notification(&peer.public_key, now, had_error) {
        tracing::warn!(url = %peer.url, %err, "failed to record notify attempt");
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
