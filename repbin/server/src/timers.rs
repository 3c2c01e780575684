// Copyright (c) 2024 Botho Foundation

//! The cooperative scheduler (§4.F): one `tokio::select!` loop driving notify, fetch, and
//! expiry cycles off their own intervals, reacting opportunistically to a cross-task "new
//! message" signal, and draining the stats actor every minute. Never blocks — every tick
//! spawns its cycle as its own task and returns straight to the select.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::interval;

use bth_repbin_peer::{fetch_peers, load_peer_file, notify_peers, AdmitFn};
use bth_repbin_store::Store;

use crate::admission;
use crate::http::ServerState;

/// Two sweep passes per `expire_tick`, mirroring the reference implementation's
/// `ExpireFromIndex(2)` bound on how far behind a single pass is allowed to fall.
const EXPIRE_PASSES_PER_TICK: usize = 2;

pub async fn run(state: Arc<ServerState>, client: Client, mut notify_rx: mpsc::Receiver<()>) {
    let mut notify_interval = interval(Duration::from_secs(state.config.notify_duration_secs.max(1)));
    let mut fetch_interval = interval(Duration::from_secs(state.config.fetch_duration_secs.max(1)));
    let mut expire_interval = interval(Duration::from_secs(state.config.expire_duration_secs.max(1)));
    let mut expire_fs_interval = interval(Duration::from_secs(state.config.expire_fs_duration_secs.max(1)));
    let mut stat_interval = interval(Duration::from_secs(60));

    let mut pending_notify = false;

    loop {
        tokio::select! {
            _ = notify_interval.tick() => {
                if pending_notify {
                    pending_notify = false;
                    spawn_notify(state.clone(), client.clone());
                }
            }
            maybe = notify_rx.recv() => {
                if maybe.is_some() {
                    pending_notify = true;
                }
            }
            _ = fetch_interval.tick() => {
                spawn_fetch(state.clone(), client.clone());
            }
            _ = expire_interval.tick() => {
                spawn_expire(state.clone());
            }
            _ = expire_fs_interval.tick() => {
                spawn_expire_fs(state.clone());
            }
            _ = stat_interval.tick() => {
                state.stats.log();
            }
        }
    }
}

fn spawn_notify(state: Arc<ServerState>, client: Client) {
    tokio::spawn(async move {
        let snapshot = state.peer_snapshot().await;
        let our_pub = state.peering_pub;
        let our_key = state.peering_key.clone();
        let notify_duration = Duration::from_secs(state.config.notify_duration_secs);
        let timeout = Duration::from_secs(state.config.peer_timeout_secs);
        notify_peers(state.store.clone(), client, snapshot, our_pub, our_key, notify_duration, timeout).await;
    });
}

fn spawn_fetch(state: Arc<ServerState>, client: Client) {
    tokio::spawn(async move {
        let snapshot = match load_peer_file(
            &state.config.peer_file,
            &state.peering_pub,
            state.config.include_self_peer,
            state.config.advertise_url.as_deref(),
        ) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(err) => {
                tracing::warn!(%err, "could not reload peer file before fetch_tick");
                state.peer_snapshot().await
            }
        };
        *state.peers.write().await = snapshot.clone();

        let admit: AdmitFn = {
            let state = state.clone();
            Arc::new(move |envelope: Vec<u8>| {
                let state = state.clone();
                Box::pin(async move {
                    match admission::admit(&state.message_store, &state.config, &envelope, false, 0, 1) {
                        Ok(_) => state.stats.record_admitted(),
                        Err(err) => tracing::debug!(%err, "peer-fetched envelope rejected on re-admission"),
                    }
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            })
        };

        let timeout = Duration::from_secs(state.config.peer_timeout_secs);
        let fetch_duration = Duration::from_secs(state.config.fetch_duration_secs);
        let summary = fetch_peers(
            state.store.clone(),
            state.message_store.clone(),
            client,
            snapshot,
            admit,
            state.config.hub_mode,
            fetch_duration,
            timeout,
            state.config.fetch_max,
        )
        .await;
        state.stats.record_peer_fetched(summary.entries_admitted);
        tracing::debug!(
            peers = summary.peers_fetched,
            seen = summary.entries_seen,
            admitted = summary.entries_admitted,
            "fetch_tick complete"
        );
    });
}

fn spawn_expire(state: Arc<ServerState>) {
    tokio::spawn(async move {
        for _ in 0..EXPIRE_PASSES_PER_TICK {
            match state.message_store.expire_from_index(
                state.config.max_age_signers,
                state.config.max_age_recipients,
                state.config.expire_limit,
            ) {
                Ok(summary) => {
                    state.stats.record_expired(summary.messages_expired);
                    if summary.messages_expired == 0 {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "expire_tick pass failed");
                    break;
                }
            }
        }
    });
}

fn spawn_expire_fs(state: Arc<ServerState>) {
    tokio::spawn(async move {
        let Some(root) = state.config.storage_path.clone() else {
            return;
        };
        if let Err(err) = sweep_orphan_blobs(&root, &state.store) {
            tracing::warn!(%err, "expire_fs_tick sweep failed");
        }
    });
}

/// Walk the hex-sharded blob tree, deleting any file whose message row no longer exists —
/// the filesystem-side counterpart to `expire_from_index`'s row/blob deletion, for the case
/// a blob write outlived its row (crash between the two deletes in `fetch`/expiry cleanup).
fn sweep_orphan_blobs(root: &Path, store: &Store) -> std::io::Result<()> {
    for level1 in read_dir_sorted(root)? {
        if !level1.path().is_dir() {
            continue;
        }
        for level2 in read_dir_sorted(&level1.path())? {
            if !level2.path().is_dir() {
                continue;
            }
            for entry in read_dir_sorted(&level2.path())? {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(id) = reconstruct_id(root, &path) else {
                    continue;
                };
                match store.select_message(&id) {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        if let Err(err) = std::fs::remove_file(&path) {
                            tracing::warn!(path = %path.display(), %err, "failed to remove orphaned blob");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "failed to look up blob's message row");
                    }
                }
            }
        }
    }
    Ok(())
}

fn read_dir_sorted(path: &Path) -> std::io::Result<Vec<std::fs::DirEntry>> {
    let mut entries: Vec<_> = std::fs::read_dir(path)?.filter_map(Result::ok).collect();
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

fn reconstruct_id(root: &Path, path: &Path) -> Option<[u8; 32]> {
    let rel = path.strip_prefix(root).ok()?;
    let hex_id: String = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
    let bytes = hex::decode(hex_id).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let mut id = [0u8; 32];
    id.copy_from_slice(&bytes);
    Some(id)
}
