// Copyright (c) 2024 Botho Foundation

//! On-disk TOML configuration, mirroring the original's self-describing config record.
//! Every field carries a `serde(default = ...)` so a partial or empty file still produces a
//! runnable server, and `--showconfig` can print a complete default instance.

use std::path::PathBuf;

use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

use bth_repbin_crypto::b58;

/// Server configuration, loaded from a TOML file named by `--configfile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Database driver: `sqlite` or `postgres`.
    #[serde(default = "default_db_driver")]
    pub db_driver: String,
    /// Driver-specific connection string (a file path for sqlite, a URL for postgres).
    #[serde(default = "default_db_dsn")]
    pub db_dsn: String,
    /// Pool size handed to `r2d2`.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Number of recipient counter shard locks.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Optional on-disk blob directory; when unset, bodies live in `messageblob`.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    /// TCP port the HTTP surface listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to the peer descriptor JSON file.
    #[serde(default = "default_peer_file")]
    pub peer_file: PathBuf,
    /// Whether this server runs in hub mode (preemptive periodic peer pulls).
    #[serde(default)]
    pub hub_mode: bool,
    /// Whether other servers should see our own entry when we load our own peer file
    /// (debug/self-test convenience; production deployments leave this false).
    #[serde(default)]
    pub include_self_peer: bool,
    /// Our own URL, advertised via `/id` when set.
    #[serde(default)]
    pub advertise_url: Option<String>,

    /// Minimum hashcash bits a signature header must present.
    #[serde(default = "default_min_hashcash_bits")]
    pub min_hashcash_bits: u8,
    /// Width of the flat-quota band above `min_hashcash_bits` (§4.G).
    #[serde(default = "default_step_limit")]
    pub step_limit: i32,
    /// Baseline per-message TTL in seconds, granted at `extra < step_limit`.
    #[serde(default = "default_min_store_time")]
    pub min_store_time: i64,
    /// Ceiling on the boosted TTL a strong hashcash submission can buy.
    #[serde(default = "default_max_store_time")]
    pub max_store_time: i64,

    /// Smallest accepted envelope size in bytes.
    #[serde(default = "default_min_post_size")]
    pub min_post_size: usize,
    /// Largest accepted envelope size in bytes.
    #[serde(default = "default_max_post_size")]
    pub max_post_size: usize,

    /// Whether `/delete` is enabled.
    #[serde(default = "default_true")]
    pub enable_delete: bool,
    /// Whether `/local/post` (one-time messages) is enabled.
    #[serde(default = "default_true")]
    pub enable_one_time: bool,
    /// Whether `/id`'s peer list is populated.
    #[serde(default = "default_true")]
    pub enable_peer_discovery: bool,

    /// Seconds between `notify_tick`.
    #[serde(default = "default_notify_duration")]
    pub notify_duration_secs: u64,
    /// Seconds between `fetch_tick`.
    #[serde(default = "default_fetch_duration")]
    pub fetch_duration_secs: u64,
    /// Seconds between `expire_tick`.
    #[serde(default = "default_expire_duration")]
    pub expire_duration_secs: u64,
    /// Seconds between `expire_fs_tick`.
    #[serde(default = "default_expire_fs_duration")]
    pub expire_fs_duration_secs: u64,
    /// Per-peer connect/request timeout, in seconds.
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout_secs: u64,
    /// SOCKS proxy every outbound peer call is routed through.
    #[serde(default = "default_socks_proxy")]
    pub socks_proxy: String,
    /// Page size requested on each `/globalindex` pull.
    #[serde(default = "default_fetch_max")]
    pub fetch_max: i64,
    /// Server-side cap on `count` for `/keyindex` and `/globalindex`.
    #[serde(default = "default_index_count_cap")]
    pub index_count_cap: i64,

    /// `max_age_signers` for the expiry sweep (kept independent of `max_age_recipients`
    /// rather than aliased, see DESIGN.md).
    #[serde(default = "default_max_age_signers")]
    pub max_age_signers: i64,
    /// `max_age_recipients` for the expiry sweep and known-message eviction.
    #[serde(default = "default_max_age_recipients")]
    pub max_age_recipients: i64,
    /// Per expiry pass, the cap on rows swept (mirrors `ExpireFromIndex(2)`'s bound).
    #[serde(default = "default_expire_limit")]
    pub expire_limit: i64,

    /// Freshness window applied to peer auth tokens.
    #[serde(default = "default_max_auth_token_age")]
    pub max_auth_token_age: u64,
    /// Maximum clock skew tolerated on top of `max_auth_token_age`.
    #[serde(default = "default_max_time_skew")]
    pub max_time_skew: u64,
    /// Freshness window applied to hidden-key challenge answers.
    #[serde(default = "default_max_answer_age")]
    pub max_answer_age: u64,

    /// Upper bound, in milliseconds, of the random pre/post-work sleep every storage-
    /// touching handler takes.
    #[serde(default = "default_max_sleep_ms")]
    pub max_sleep_ms: u64,

    /// Base58-encoded ed25519 peering keypair (seed bytes). Generated by `--showconfig`
    /// when empty.
    #[serde(default)]
    pub peering_seed_b58: String,
    /// Curve25519 server secret used to derive hidden-key challenges.
    #[serde(default)]
    pub challenge_secret_b58: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            db_driver: default_db_driver(),
            db_dsn: default_db_dsn(),
            pool_size: default_pool_size(),
            workers: default_workers(),
            storage_path: None,
            port: default_port(),
            peer_file: default_peer_file(),
            hub_mode: false,
            include_self_peer: false,
            advertise_url: None,
            min_hashcash_bits: default_min_hashcash_bits(),
            step_limit: default_step_limit(),
            min_store_time: default_min_store_time(),
            max_store_time: default_max_store_time(),
            min_post_size: default_min_post_size(),
            max_post_size: default_max_post_size(),
            enable_delete: true,
            enable_one_time: true,
            enable_peer_discovery: true,
            notify_duration_secs: default_notify_duration(),
            fetch_duration_secs: default_fetch_duration(),
            expire_duration_secs: default_expire_duration(),
            expire_fs_duration_secs: default_expire_fs_duration(),
            peer_timeout_secs: default_peer_timeout(),
            socks_proxy: default_socks_proxy(),
            fetch_max: default_fetch_max(),
            index_count_cap: default_index_count_cap(),
            max_age_signers: default_max_age_signers(),
            max_age_recipients: default_max_age_recipients(),
            expire_limit: default_expire_limit(),
            max_auth_token_age: default_max_auth_token_age(),
            max_time_skew: default_max_time_skew(),
            max_answer_age: default_max_answer_age(),
            max_sleep_ms: default_max_sleep_ms(),
            peering_seed_b58: String::new(),
            challenge_secret_b58: String::new(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file, falling back to field defaults for anything unset.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("reading {}: {err}", path.display()))?;
        let cfg: ServerConfig = toml::from_str(&text)
            .map_err(|err| anyhow::anyhow!("parsing {}: {err}", path.display()))?;
        Ok(cfg)
    }

    /// The peering signing key, generating and filling one in if none is configured yet.
    /// Returns the key plus whether a fresh one was generated (so `--showconfig` can print
    /// it back for the operator to persist).
    pub fn peering_key(&self) -> (SigningKey, bool) {
        if self.peering_seed_b58.is_empty() {
            let key = SigningKey::generate(&mut OsRng);
            return (key, true);
        }
        match b58::decode(&self.peering_seed_b58) {
            Ok(bytes) if bytes.len() == 32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes);
                (SigningKey::from_bytes(&seed), false)
            }
            _ => (SigningKey::generate(&mut OsRng), true),
        }
    }

    /// The curve25519 secret used for hidden-key challenges, generating one if unset.
    pub fn challenge_secret(&self) -> ([u8; 32], bool) {
        if self.challenge_secret_b58.is_empty() {
            return (bth_repbin_crypto::keys::gen_random_key(), true);
        }
        match b58::decode(&self.challenge_secret_b58) {
            Ok(bytes) if bytes.len() == 32 => {
                let mut out = [0u8; 32];
                out.copy_from_slice(&bytes);
                (out, false)
            }
            _ => (bth_repbin_crypto::keys::gen_random_key(), true),
        }
    }

    /// Fill in freshly generated secrets (used by `--showconfig` so the printed config is
    /// runnable as-is, matching the original's "generate an ed25519 peering keypair if the
    /// configured one is empty" behavior).
    pub fn with_generated_secrets(mut self) -> Self {
        let (peering, _) = self.peering_key();
        self.peering_seed_b58 = b58::encode(&peering.to_bytes());
        let (challenge, _) = self.challenge_secret();
        self.challenge_secret_b58 = b58::encode(&challenge);
        self
    }
}

fn default_db_driver() -> String {
    "sqlite".to_string()
}
fn default_db_dsn() -> String {
    "repbin.sqlite3".to_string()
}
fn default_pool_size() -> u32 {
    8
}
fn default_workers() -> usize {
    100
}
fn default_port() -> u16 {
    8080
}
fn default_peer_file() -> PathBuf {
    PathBuf::from("peers.json")
}
fn default_min_hashcash_bits() -> u8 {
    20
}
fn default_step_limit() -> i32 {
    2
}
fn default_min_store_time() -> i64 {
    86_400
}
fn default_max_store_time() -> i64 {
    86_400 * 30
}
fn default_min_post_size() -> usize {
    512
}
fn default_max_post_size() -> usize {
    512 * 1024
}
fn default_notify_duration() -> u64 {
    60
}
fn default_fetch_duration() -> u64 {
    300
}
fn default_expire_duration() -> u64 {
    600
}
fn default_expire_fs_duration() -> u64 {
    3_600
}
fn default_peer_timeout() -> u64 {
    30
}
fn default_socks_proxy() -> String {
    "socks5://127.0.0.1:9050/".to_string()
}
fn default_fetch_max() -> i64 {
    100
}
fn default_index_count_cap() -> i64 {
    500
}
fn default_max_age_signers() -> i64 {
    86_400 * 30
}
fn default_max_age_recipients() -> i64 {
    86_400 * 30
}
fn default_expire_limit() -> i64 {
    1_000
}
fn default_max_auth_token_age() -> u64 {
    600
}
fn default_max_time_skew() -> u64 {
    30
}
fn default_max_answer_age() -> u64 {
    300
}
fn default_max_sleep_ms() -> u64 {
    250
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = ServerConfig::default();
        let text = toml::to_string(&cfg).expect("serializes");
        let back: ServerConfig = toml::from_str(&text).expect("parses");
        assert_eq!(back.db_driver, cfg.db_driver);
        assert_eq!(back.min_hashcash_bits, cfg.min_hashcash_bits);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let text = "db_driver = \"postgres\"\n";
        let cfg: ServerConfig = toml::from_str(text).expect("parses");
        assert_eq!(cfg.db_driver, "postgres");
        assert_eq!(cfg.port, default_port());
    }

    #[test]
    fn empty_peering_seed_generates_a_fresh_key() {
        let cfg = ServerConfig::default();
        let (_key, generated) = cfg.peering_key();
        assert!(generated);
    }
}
