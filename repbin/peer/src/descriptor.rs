//! Peer descriptor file: a JSON list of `{public_key, url, is_hub}` records loaded at
//! startup and on every `fetch_tick`, producing one immutable [`PeerSnapshot`].

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use bth_repbin_crypto::b58;

use crate::error::{PeerError, PeerResult};

/// One entry as it appears in the descriptor file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub public_key: String,
    pub url: String,
    #[serde(default)]
    pub is_hub: bool,
}

/// A peer entry resolved to its binary key, kept in the gossip map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub public_key: [u8; 32],
    pub url: String,
    pub is_hub: bool,
}

/// One immutable view of the peer list: the full gossip set (for notify/fetch/auth) and the
/// flat list of non-hub URLs advertised to clients via `/id`.
#[derive(Debug, Clone, Default)]
pub struct PeerSnapshot {
    pub gossip: HashMap<[u8; 32], PeerEntry>,
    pub advertise_urls: Vec<String>,
}

impl PeerSnapshot {
    pub fn peer(&self, public_key: &[u8; 32]) -> Option<&PeerEntry> {
        self.gossip.get(public_key)
    }

    pub fn is_known(&self, public_key: &[u8; 32]) -> bool {
        self.gossip.contains_key(public_key)
    }
}

/// Load a descriptor file into a snapshot. Skips the entry matching `own_public_key` unless
/// `include_self` (debug mode) is set; optionally appends `advertise_self_url` so clients
/// learn of this server even though it never gossips to itself.
///
/// On first run, when `path` does not exist yet, writes a single-element example file and
/// returns an empty snapshot without attempting to parse anything — the operator is expected
/// to edit the generated file and restart.
pub fn load_peer_file(
    path: &Path,
    own_public_key: &[u8; 32],
    include_self: bool,
    advertise_self_url: Option<&str>,
) -> PeerResult<PeerSnapshot> {
    if !path.exists() {
        write_example_file(path)?;
        tracing::warn!(path = %path.display(), "peer descriptor file did not exist; wrote an example");
        return Ok(PeerSnapshot::default());
    }

    let text = std::fs::read_to_string(path)?;
    let descriptors: Vec<PeerDescriptor> = serde_json::from_str(&text)?;

    let mut gossip = HashMap::with_capacity(descriptors.len());
    let mut advertise_urls = Vec::new();

    for d in descriptors {
        let key_bytes = match b58::decode(&d.public_key) {
            Ok(b) if b.len() == 32 => b,
            _ => {
                tracing::warn!(url = %d.url, "skipping peer descriptor with malformed public key");
                continue;
            }
        };
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&key_bytes);

        if &public_key == own_public_key && !include_self {
            continue;
        }
        if !d.is_hub {
            advertise_urls.push(d.url.clone());
        }
        gossip.insert(
            public_key,
            PeerEntry {
                public_key,
                url: d.url,
                is_hub: d.is_hub,
            },
        );
    }

    if let Some(self_url) = advertise_self_url {
        advertise_urls.push(self_url.to_string());
    }

    Ok(PeerSnapshot { gossip, advertise_urls })
}

/// Write a single-element example descriptor file so an operator has a template to edit.
fn write_example_file(path: &Path) -> PeerResult<()> {
    let example = vec![PeerDescriptor {
        public_key: b58::encode(&[0u8; 32]),
        url: "https://example.invalid:8080".to_string(),
        is_hub: false,
    }];
    let json = serde_json::to_string_pretty(&example)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_key_is_skipped_unless_debug() {
        let tmp = tempfile::NamedTempFile::new().expect("tmp file");
        let own = [9u8; 32];
        let own_b58 = b58::encode(&own);
        let other = [1u8; 32];
        let other_b58 = b58::encode(&other);
        let json = format!(
            r#"[{{"public_key":"{own_b58}","url":"http://self","is_hub":false}},
                {{"public_key":"{other_b58}","url":"http://other","is_hub":false}}]"#
        );
        std::fs::write(tmp.path(), json).expect("writes");

        let snap = load_peer_file(tmp.path(), &own, false, None).expect("loads");
        assert!(!snap.is_known(&own));
        assert!(snap.is_known(&other));
        assert_eq!(snap.advertise_urls, vec!["http://other".to_string()]);
    }

    #[test]
    fn hub_peers_are_gossiped_but_not_advertised() {
        let tmp = tempfile::NamedTempFile::new().expect("tmp file");
        let hub = [2u8; 32];
        let json = format!(
            r#"[{{"public_key":"{}","url":"http://hub","is_hub":true}}]"#,
            b58::encode(&hub)
        );
        std::fs::write(tmp.path(), json).expect("writes");

        let snap = load_peer_file(tmp.path(), &[0u8; 32], false, None).expect("loads");
        assert!(snap.is_known(&hub));
        assert!(snap.advertise_urls.is_empty());
    }

    #[test]
    fn missing_file_writes_example_and_returns_empty_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("peers.json");
        assert!(!path.exists());

        let snap = load_peer_file(&path, &[0u8; 32], false, None).expect("loads");
        assert!(snap.gossip.is_empty());
        assert!(path.exists());

        let written: Vec<PeerDescriptor> =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("reads")).expect("parses");
        assert_eq!(written.len(), 1);
    }
}
