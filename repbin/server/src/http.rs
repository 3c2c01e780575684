// Copyright (c) 2024 Botho Foundation

//! The client- and peer-facing HTTP surface (§4.E). A raw `hyper` server, grounded on the
//! same `TcpListener` / `TokioIo` / `service_fn` pattern the teacher's JSON-RPC surface uses
//! (`botho::rpc`), dispatching by path to plain-text handlers instead of a JSON-RPC method
//! table. Every response is `text/plain`, `SUCCESS:`/`ERROR:` framed, and returned with HTTP
//! 200 regardless of outcome — the wire protocol carries its own success/failure tag.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use bth_repbin_crypto::{b58, keyauth, keys};
use bth_repbin_messagestore::MessageStore;
use bth_repbin_peer::{self as peer, PeerSnapshot};
use bth_repbin_store::{MessageRow, Store};

use crate::admission;
use crate::config::ServerConfig;
use crate::error::HandlerError;
use crate::stats::Stats;

/// Shared state every request handler reads; cheap to clone (an `Arc` bundle).
pub struct ServerState {
    pub message_store: Arc<MessageStore>,
    pub store: Arc<Store>,
    pub config: Arc<ServerConfig>,
    pub peering_key: Arc<SigningKey>,
    pub peering_pub: [u8; 32],
    pub challenge_secret: [u8; 32],
    pub peers: RwLock<Arc<PeerSnapshot>>,
    pub stats: Arc<Stats>,
    /// Random per-startup offset applied to every outbound timestamp (§4.C freshness
    /// discipline); incoming timestamps are checked against `now ± age ± time_skew`.
    pub time_skew: u64,
}

impl ServerState {
    pub async fn peer_snapshot(&self) -> Arc<PeerSnapshot> {
        self.peers.read().await.clone()
    }
}

/// Accept connections on `addr` until the process is told to stop. Each connection gets its
/// own task and its own `http1` connection builder with fixed read/write deadlines.
pub async fn serve(addr: SocketAddr, state: Arc<ServerState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http surface listening");
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, state.clone()));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(%peer_addr, %err, "connection ended with an error");
            }
        });
    }
}

async fn handle(req: Request<Incoming>, state: Arc<ServerState>) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = query_map(req.uri());

    let response = match (method, path.as_str()) {
        (Method::GET, "/id") => handle_id(&state).await,
        (Method::POST, "/post") => handle_post(req, &state, false).await,
        (Method::POST, "/local/post") => handle_post(req, &state, true).await,
        (Method::GET, "/fetch") => handle_fetch(&state, &query).await,
        (Method::GET, "/keyindex") => handle_keyindex(&state, &query).await,
        (Method::GET, "/globalindex") => handle_globalindex(&state, &query).await,
        (Method::GET, "/notify") => handle_notify(&state, &query).await,
        (Method::GET, "/delete") => handle_delete(&state, &query).await,
        _ => Err(HandlerError::BadParam),
    };

    Ok(match response {
        Ok(body) => text_response(StatusCode::OK, body),
        Err(err) => {
            state.stats.record_rejected();
            text_response(StatusCode::OK, format!("ERROR: {}", err.wire_reason()))
        }
    })
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=us-ascii")
        .body(Full::new(Bytes::from(body)))
        .expect("static response is always well-formed")
}

fn query_map(uri: &Uri) -> HashMap<String, String> {
    uri.query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

async fn jitter_sleep(max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let ms = rand::thread_rng().gen_range(0..=max_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// -- /id ----------------------------------------------------------------------------------

#[derive(serde::Serialize)]
struct IdResponse {
    #[serde(rename = "Time")]
    time: i64,
    #[serde(rename = "AuthPubKey")]
    auth_pub_key: String,
    #[serde(rename = "AuthChallenge")]
    auth_challenge: String,
    #[serde(rename = "MaxPostSize")]
    max_post_size: usize,
    #[serde(rename = "MinPostSize")]
    min_post_size: usize,
    #[serde(rename = "MinHashCashBits")]
    min_hashcash_bits: u8,
    #[serde(rename = "Peers", skip_serializing_if = "Option::is_none")]
    peers: Option<Vec<String>>,
}

async fn handle_id(state: &ServerState) -> Result<String, HandlerError> {
    let now = now();
    let server_pub = keys::gen_pub_key(&state.challenge_secret);
    let (_, _, challenge) = keyauth::gen_temp_key_time(now as u64 + state.time_skew, &state.challenge_secret);

    let peers = if state.config.enable_peer_discovery {
        Some(state.peer_snapshot().await.advertise_urls.clone())
    } else {
        None
    };

    let body = IdResponse {
        time: now,
        auth_pub_key: b58::encode(&server_pub),
        auth_challenge: b58::encode(&challenge),
        max_post_size: state.config.max_post_size,
        min_post_size: state.config.min_post_size,
        min_hashcash_bits: state.config.min_hashcash_bits,
        peers,
    };
    serde_json::to_string(&body).map_err(|err| HandlerError::Internal(err.to_string()))
}

// -- /post, /local/post ---------------------------------------------------------------------

async fn handle_post(req: Request<Incoming>, state: &ServerState, one_time: bool) -> Result<String, HandlerError> {
    if one_time && !state.config.enable_one_time {
        return Err(HandlerError::BadParam);
    }
    let query = query_map(req.uri());
    let expire_request = query
        .get("expire")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);

    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|_| HandlerError::BadParam)?
        .to_bytes();

    jitter_sleep(state.config.max_sleep_ms).await;
    let outcome = admission::admit(&state.message_store, &state.config, &body, one_time, expire_request, 0);
    jitter_sleep(state.config.max_sleep_ms).await;

    outcome?;
    state.stats.record_admitted();
    Ok("SUCCESS: Connection close".to_string())
}

// -- /fetch -----------------------------------------------------------------------------------

async fn handle_fetch(state: &ServerState, query: &HashMap<String, String>) -> Result<String, HandlerError> {
    let message_id = decode_id_param(query, "messageid")?;

    if state.config.hub_mode {
        let auth = query.get("auth").ok_or(HandlerError::AuthRequired)?;
        authenticate_peer(state, auth).await?;
    }

    jitter_sleep(state.config.max_sleep_ms).await;
    let data = state.message_store.fetch(&message_id).map_err(HandlerError::from);
    jitter_sleep(state.config.max_sleep_ms).await;

    let data = data?;
    state.stats.record_fetched();
    let mut out = String::from("SUCCESS: Data follows\n");
    out.push_str(&String::from_utf8_lossy(&data));
    Ok(out)
}

// -- /keyindex, /globalindex ------------------------------------------------------------------

async fn handle_keyindex(state: &ServerState, query: &HashMap<String, String>) -> Result<String, HandlerError> {
    let key_b58 = query.get("key").ok_or(HandlerError::BadParam)?;
    let key_bytes = b58::decode(key_b58).map_err(|_| HandlerError::BadParam)?;
    if key_bytes.len() != 32 {
        return Err(HandlerError::BadParam);
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&key_bytes);

    if keys::key_is_hidden(&key) {
        let answer = query.get("auth").ok_or(HandlerError::AuthRequired)?;
        authenticate_hidden_key(state, answer, &key)?;
    }

    let (start, count) = paging_params(query, state.config.index_count_cap);

    jitter_sleep(state.config.max_sleep_ms).await;
    let rows = state
        .store
        .get_key_index(&key, start, count)
        .map_err(HandlerError::from)?;
    jitter_sleep(state.config.max_sleep_ms).await;

    Ok(render_index_page(&rows, count))
}

async fn handle_globalindex(state: &ServerState, query: &HashMap<String, String>) -> Result<String, HandlerError> {
    let auth = query.get("auth").ok_or(HandlerError::AuthRequired)?;
    authenticate_peer(state, auth).await?;

    let (start, count) = paging_params(query, state.config.index_count_cap);

    jitter_sleep(state.config.max_sleep_ms).await;
    let rows = state
        .store
        .get_global_index(start, count)
        .map_err(HandlerError::from)?;
    jitter_sleep(state.config.max_sleep_ms).await;

    Ok(render_index_page(&rows, count))
}

fn paging_params(query: &HashMap<String, String>, cap: i64) -> (i64, i64) {
    let start = query.get("start").and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
    let requested = query.get("count").and_then(|v| v.parse::<i64>().ok()).unwrap_or(cap);
    (start, requested.clamp(1, cap))
}

fn render_index_page(rows: &[MessageRow], requested_count: i64) -> String {
    let mut out = String::from("SUCCESS: Data follows\n");
    for row in rows {
        out.push_str("IDX: ");
        out.push_str(&encode_index_line(row));
        out.push('\n');
    }
    if (rows.len() as i64) < requested_count {
        out.push_str("CMD: Exceeded");
    } else {
        out.push_str("CMD: Continue");
    }
    out
}

/// One space-separated index record (§4.E wire format).
fn encode_index_line(row: &MessageRow) -> String {
    format!(
        "{} {} {} {} {} {} {} {} {} {} {}",
        row.counter,
        row.post_time,
        row.expire_time,
        row.expire_request,
        b58::encode(&row.message_id),
        b58::encode(&row.receiver_constant_pub_key),
        b58::encode(&row.signer_pub),
        row.distance,
        row.one_time,
        row.sync,
        row.hidden,
    )
}

fn authenticate_hidden_key(state: &ServerState, answer_b58: &str, claimed_key: &[u8; 32]) -> Result<(), HandlerError> {
    let bytes = b58::decode(answer_b58).map_err(|_| HandlerError::AuthFailed)?;
    if bytes.len() != keyauth::ANSWER_SIZE {
        return Err(HandlerError::AuthFailed);
    }
    let mut answer = [0u8; keyauth::ANSWER_SIZE];
    answer.copy_from_slice(&bytes);

    if !keyauth::verify_time(&answer, now(), state.config.max_answer_age) {
        return Err(HandlerError::AuthFailed);
    }
    if !keyauth::verify(&answer, &state.challenge_secret, claimed_key) {
        return Err(HandlerError::AuthFailed);
    }
    Ok(())
}

async fn authenticate_peer(state: &ServerState, token_b58: &str) -> Result<(), HandlerError> {
    let (time, sender_pub) = peer::auth::authenticate_peer(token_b58, &state.peering_pub)?;
    let snapshot = state.peer_snapshot().await;
    if !snapshot.is_known(&sender_pub) {
        return Err(HandlerError::UnknownPeer);
    }
    peer::auth::check_freshness(time, now() as u64, state.config.max_auth_token_age, state.config.max_time_skew)?;
    Ok(())
}

// -- /notify ------------------------------------------------------------------------------

async fn handle_notify(state: &ServerState, query: &HashMap<String, String>) -> Result<String, HandlerError> {
    let token_b58 = query.get("auth").ok_or(HandlerError::BadParam)?;

    let (signed, sender_pub) = peer::auth::receive_notify(token_b58, &state.peering_pub, &state.peering_key)?;

    let snapshot = state.peer_snapshot().await;
    if !snapshot.is_known(&sender_pub) {
        return Err(HandlerError::UnknownPeer);
    }

    let now = now();
    state
        .store
        .update_peer_token(&sender_pub, now, &signed)
        .map_err(HandlerError::from)?;

    Ok("SUCCESS: Notified".to_string())
}

// -- /delete --------------------------------------------------------------------------------

async fn handle_delete(state: &ServerState, query: &HashMap<String, String>) -> Result<String, HandlerError> {
    if !state.config.enable_delete {
        return Err(HandlerError::BadParam);
    }

    // Four random pauses regardless of outcome, taken *before* parsing parameters, so
    // success and every failure mode are timing-indistinguishable (§4.B, §7).
    for _ in 0..4 {
        jitter_sleep(state.config.max_sleep_ms).await;
    }

    let result = (|| -> Result<(), HandlerError> {
        let message_id = decode_id_param(query, "messageid")?;
        let privkey_b58 = query.get("privkey").ok_or(HandlerError::BadParam)?;
        let priv_bytes = b58::decode(privkey_b58).map_err(|_| HandlerError::BadParam)?;
        if priv_bytes.len() != 32 {
            return Err(HandlerError::BadParam);
        }
        let mut private_key = [0u8; 32];
        private_key.copy_from_slice(&priv_bytes);

        state.message_store.pre_expire(&message_id, &private_key)?;
        Ok(())
    })();

    match result {
        Ok(()) | Err(_) => Ok("SUCCESS: If you want to call it that".to_string()),
    }
}

fn decode_id_param(query: &HashMap<String, String>, name: &str) -> Result<[u8; 32], HandlerError> {
    let raw = query.get(name).ok_or(HandlerError::BadParam)?;
    let bytes = b58::decode(raw).map_err(|_| HandlerError::BadParam)?;
    if bytes.len() != 32 {
        return Err(HandlerError::BadParam);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
