// Copyright (c) 2024 Botho Foundation

//! Federation between servers: a peer descriptor file, the two auth schemes peers use on
//! each other, and the notify/fetch cycles that keep a server's index in sync with its
//! peers'. Outbound calls run through the configured SOCKS proxy so peer-to-peer traffic
//! never touches the clearnet directly.

pub mod auth;
pub mod descriptor;
mod error;
pub mod fetch;
pub mod notify;

pub use descriptor::{load_peer_file, PeerDescriptor, PeerEntry, PeerSnapshot};
pub use error::{PeerError, PeerResult};
pub use fetch::{fetch_peers, AdmitFn, FetchSummary};
pub use notify::notify_peers;
