// Copyright (c) 2024 Botho Foundation

//! Fetch cycle: pull each peer's global index, download anything we don't already hold,
//! and run it through the caller-supplied admission pipeline (§4.D). Admission itself lives
//! a layer up (`repbin-server`), so it is threaded in as a callback rather than a dependency
//! — this crate never needs to know how a message is validated, only that it must be handed
//! off before the fetch cycle can count it as seen.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::Client;

use bth_repbin_crypto::b58;
use bth_repbin_messagestore::MessageStore;
use bth_repbin_store::Store;

use crate::auth;
use crate::descriptor::{PeerEntry, PeerSnapshot};
use crate::error::{PeerError, PeerResult};

/// Hands a freshly-downloaded envelope to the server's admission pipeline. Takes ownership
/// of the bytes since the caller has no further use for them once admission returns.
pub type AdmitFn = Arc<dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Aggregate counts from one fetch cycle across every known peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchSummary {
    pub peers_fetched: u64,
    pub entries_seen: u64,
    pub entries_admitted: u64,
}

/// Run `fetch_peer` against every peer in `snapshot` concurrently. One peer stalling (a
/// slow Tor circuit, an unreachable hub) never delays the others.
#[allow(clippy::too_many_arguments)]
pub async fn fetch_peers(
    store: Arc<Store>,
    message_store: Arc<MessageStore>,
    client: Client,
    snapshot: Arc<PeerSnapshot>,
    admit: AdmitFn,
    we_are_hub: bool,
    fetch_duration: Duration,
    timeout: Duration,
    fetch_max: i64,
) -> FetchSummary {
    let mut tasks = Vec::with_capacity(snapshot.gossip.len());
    for peer in snapshot.gossip.values().cloned() {
        let store = store.clone();
        let message_store = message_store.clone();
        let client = client.clone();
        let admit = admit.clone();
        tasks.push(tokio::spawn(async move {
            fetch_peer(
                &store,
                &message_store,
                &client,
                &peer,
                admit,
                we_are_hub,
                fetch_duration,
                timeout,
                fetch_max,
            )
            .await
        }));
    }

    let mut summary = FetchSummary::default();
    for task in tasks {
        if let Ok((seen, admitted)) = task.await {
            summary.peers_fetched += 1;
            summary.entries_seen += seen;
            summary.entries_admitted += admitted;
        }
    }
    summary
}

/// One peer's fetch cycle. Returns `(entries_seen, entries_admitted)`; all failures are
/// logged and swallowed here so a single bad peer never aborts the caller's loop over the
/// rest — matching the propagation policy for background cycles (§7).
#[allow(clippy::too_many_arguments)]
async fn fetch_peer(
    store: &Store,
    message_store: &MessageStore,
    client: &Client,
    peer: &PeerEntry,
    admit: AdmitFn,
    we_are_hub: bool,
    fetch_duration: Duration,
    timeout: Duration,
    fetch_max: i64,
) -> (u64, u64) {
    let state = match store.select_peer(&peer.public_key) {
        Ok(Some(row)) => row,
        Ok(None) => return (0, 0),
        Err(err) => {
            tracing::warn!(url = %peer.url, %err, "could not load peer state before fetch");
            return (0, 0);
        }
    };

    // We've never been told this peer has anything for us.
    if state.last_notify_from == 0 {
        return (0, 0);
    }

    let now_i = now_i64();
    let fetch_secs = fetch_duration.as_secs() as i64;
    let should_fetch = if we_are_hub {
        state.last_fetch < state.last_notify_from || state.last_fetch < now_i - 4 * fetch_secs
    } else {
        state.last_fetch <= state.last_notify_from
    };
    if !should_fetch {
        return (0, 0);
    }

    let sleep_window = fetch_duration.saturating_sub(timeout);
    if !sleep_window.is_zero() {
        let jitter_ms = rand::thread_rng().gen_range(0..=sleep_window.as_millis() as u64);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
    }

    let auth_token = b58::encode(&state.auth_token);
    let started = tokio::time::Instant::now();
    let mut position = state.last_position;
    let mut entries_seen = 0u64;
    let mut entries_admitted = 0u64;
    let mut had_error = false;
    let mut proxy_failure = false;

    loop {
        if started.elapsed() >= fetch_duration {
            break;
        }

        let url = format!(
            "{}/globalindex?auth={}&start={}&count={}",
            peer.url.trim_end_matches('/'),
            auth_token,
            position,
            fetch_max,
        );
        let body = match client.get(&url).timeout(timeout).send().await {
            Ok(resp) => match resp.text().await {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(url = %peer.url, %err, "globalindex response unreadable");
                    had_error = true;
                    break;
                }
            },
            Err(err) if err.is_connect() || err.is_timeout() => {
                tracing::warn!(url = %peer.url, %err, "proxy: globalindex request failed");
                proxy_failure = true;
                break;
            }
            Err(err) => {
                tracing::warn!(url = %peer.url, %err, "globalindex request failed");
                had_error = true;
                break;
            }
        };

        let (entries, more) = match parse_index_response(&body) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(url = %peer.url, %err, "globalindex response malformed");
                had_error = true;
                break;
            }
        };

        entries_seen += entries.len() as u64;
        for (_, id) in &entries {
            match message_store.message_exists(id) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(url = %peer.url, %err, "message_exists check failed");
                    had_error = true;
                    continue;
                }
            }
            match fetch_one(client, peer, id, &auth_token, timeout).await {
                Ok(envelope) => {
                    admit(envelope).await;
                    entries_admitted += 1;
                }
                Err(err) => {
                    tracing::warn!(url = %peer.url, %err, "fetch of one message failed");
                    had_error = true;
                }
            }
        }

        if let Some((last_counter, _)) = entries.last() {
            position = *last_counter;
        }
        if entries.is_empty() || !more {
            break;
        }
    }

    if !proxy_failure {
        if let Err(err) = store.update_peer_stats(&peer.public_key, now_i64(), position, had_error) {
            tracing::warn!(url = %peer.url, %err, "failed to persist peer fetch state");
        }
    }

    (entries_seen, entries_admitted)
}

async fn fetch_one(
    client: &Client,
    peer: &PeerEntry,
    message_id: &[u8; 32],
    auth_token: &str,
    timeout: Duration,
) -> PeerResult<Vec<u8>> {
    let url = format!(
        "{}/fetch?messageid={}&auth={}",
        peer.url.trim_end_matches('/'),
        b58::encode(message_id),
        auth_token,
    );
    let resp = client.get(&url).timeout(timeout).send().await?;
    let bytes = resp.bytes().await?;
    const PREFIX: &[u8] = b"SUCCESS: Data follows\n";
    if bytes.starts_with(PREFIX) {
        Ok(bytes[PREFIX.len()..].to_vec())
    } else {
        Err(PeerError::PeerRejected(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Parse a `/globalindex` (or `/keyindex`) response body: the leading `SUCCESS:`/`ERROR:`
/// line, zero or more `IDX: ` lines (counter is the first field, message id is the fifth
/// space-separated field), and a trailing `CMD: Continue`/`CMD: Exceeded` marker.
///
/// The returned counter is whatever the server put in that position — for `/globalindex`
/// that's `global_index.id`, the cursor the caller must advance `last_position` to (§4.D);
/// using a count-based advance instead would drift from `global_index.id` the moment
/// expiry creates gaps in the sequence.
fn parse_index_response(body: &str) -> PeerResult<(Vec<(i64, [u8; 32])>, bool)> {
    let mut lines = body.split('\n');
    let head = lines.next().unwrap_or_default();
    if let Some(reason) = head.strip_prefix("ERROR: ") {
        return Err(PeerError::PeerRejected(reason.to_string()));
    }
    if !head.starts_with("SUCCESS:") {
        return Err(PeerError::BadResponse);
    }

    let mut entries = Vec::new();
    let mut more = false;
    for line in lines {
        if let Some(rest) = line.strip_prefix("IDX: ") {
            let mut fields = rest.split(' ');
            let counter: i64 = fields
                .next()
                .ok_or(PeerError::BadResponse)?
                .parse()
                .map_err(|_| PeerError::BadResponse)?;
            let field = fields.nth(3).ok_or(PeerError::BadResponse)?;
            let bytes = b58::decode(field).map_err(|_| PeerError::BadResponse)?;
            if bytes.len() != 32 {
                return Err(PeerError::BadResponse);
            }
            let mut id = [0u8; 32];
            id.copy_from_slice(&bytes);
            entries.push((counter, id));
        } else if line.trim() == "CMD: Continue" {
            more = true;
        } else if line.trim() == "CMD: Exceeded" {
            more = false;
        }
    }
    Ok((entries, more))
}

fn now_i64() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_with_entries_and_continue() {
        let id = [7u8; 32];
        let line = format!(
            "IDX: 1 100 200 0 {} {} {} 0 false true false",
            b58::encode(&id),
            b58::encode(&[1u8; 32]),
            b58::encode(&[2u8; 32]),
        );
        let body = format!("SUCCESS: Data follows\n{line}\nCMD: Continue");
        let (entries, more) = parse_index_response(&body).expect("parses");
        assert_eq!(entries, vec![(1, id)]);
        assert!(more);
    }

    #[test]
    fn parses_exceeded_as_no_more() {
        let body = "SUCCESS: Data follows\nCMD: Exceeded".to_string();
        let (entries, more) = parse_index_response(&body).expect("parses");
        assert!(entries.is_empty());
        assert!(!more);
    }

    #[test]
    fn rejects_error_body() {
        let body = "ERROR: Authentication required".to_string();
        assert!(matches!(parse_index_response(&body), Err(PeerError::PeerRejected(_))));
    }
}
