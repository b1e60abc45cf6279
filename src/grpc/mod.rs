//! gRPC transport integration
//!
//! This module provides:
//! - Peer credential extraction on accepted Unix socket connections
//! - A tonic `Connected` stream exposing the identity to request handlers

pub mod peer_creds;

pub use peer_creds::{
    server_handshake, with_unix_peer_creds, HandshakeError, PeerCredsInfo, UnixPeerCredsStream,
};
