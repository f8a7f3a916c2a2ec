//! Shared protocol definitions for the PeerMesh signaling wire format.

pub mod signal;
