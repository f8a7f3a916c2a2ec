//! PeerMesh signaling relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The server
//! accepts WebSocket connections, tracks room membership, introduces peers
//! that share a room, and forwards addressed handshake payloads between
//! them. It never carries media and never inspects the payloads it routes.

pub mod config;
pub mod relay;
pub mod rooms;
