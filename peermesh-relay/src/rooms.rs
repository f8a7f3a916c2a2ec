//! Room membership store for the relay server.
//!
//! Maintains the in-memory many-to-many relation between connections and
//! rooms. A room is purely a derived view over this relation: it exists
//! while it has members and vanishes when the last one leaves. Membership
//! is ephemeral — lost on relay restart, same as the connection registry.
//!
//! All mutations go through a single async mutex, so concurrent joins and
//! leaves on the same room can never observe a half-applied snapshot (two
//! simultaneous joiners both missing each other, say).

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use uuid::Uuid;

/// Result of a join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection was already a member; nothing changed.
    AlreadyJoined,
    /// The connection was added to the room.
    Joined {
        /// Members present before the join, excluding the joiner. The
        /// snapshot is taken in the same critical section as the insertion.
        existing: Vec<String>,
    },
}

/// One room a connection was removed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// The room that was left.
    pub room_id: String,
    /// The other members at the moment of removal.
    pub remaining: Vec<String>,
}

#[derive(Default)]
struct Tables {
    /// Room id to its member connection ids.
    members: HashMap<String, HashSet<String>>,
    /// Connection id to the rooms it has joined.
    joined: HashMap<String, HashSet<String>>,
}

/// In-memory room membership tables.
///
/// The [`Mutex`] is the serialization point for every membership mutation;
/// readers that only need the connection registry never touch it.
pub struct RoomRegistry {
    tables: Mutex<Tables>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Adds a connection to a room.
    ///
    /// Duplicate joins are a no-op and reported as
    /// [`JoinOutcome::AlreadyJoined`]; otherwise the returned snapshot
    /// lists the members that were present before the join, sorted for
    /// deterministic fan-out. The room id format is not validated here —
    /// an arbitrary id may hold members, it just never becomes
    /// discoverable.
    pub async fn join(&self, conn_id: &str, room_id: &str) -> JoinOutcome {
        let mut tables = self.tables.lock().await;

        if tables
            .joined
            .get(conn_id)
            .is_some_and(|rooms| rooms.contains(room_id))
        {
            return JoinOutcome::AlreadyJoined;
        }

        let members = tables.members.entry(room_id.to_string()).or_default();
        let mut existing: Vec<String> = members.iter().cloned().collect();
        existing.sort();
        members.insert(conn_id.to_string());

        tables
            .joined
            .entry(conn_id.to_string())
            .or_default()
            .insert(room_id.to_string());

        JoinOutcome::Joined { existing }
    }

    /// Removes a connection from rooms.
    ///
    /// `rooms` limits the operation to the given ids; `None` leaves every
    /// room the connection has joined — the form used by the `leave` event
    /// and by disconnect teardown. Rooms the connection is not a member of
    /// are skipped silently. Each [`Departure`] carries the other members
    /// at removal time, sorted; a room left empty is dropped entirely.
    pub async fn leave(&self, conn_id: &str, rooms: Option<&[String]>) -> Vec<Departure> {
        let mut tables = self.tables.lock().await;

        let targets: Vec<String> = match rooms {
            Some(ids) => ids.to_vec(),
            None => tables
                .joined
                .get(conn_id)
                .map(|joined| joined.iter().cloned().collect())
                .unwrap_or_default(),
        };

        let mut departures = Vec::new();
        for room_id in targets {
            let remaining = {
                let Some(members) = tables.members.get_mut(&room_id) else {
                    continue;
                };
                if !members.remove(conn_id) {
                    continue;
                }
                let mut remaining: Vec<String> = members.iter().cloned().collect();
                remaining.sort();
                remaining
            };

            if remaining.is_empty() {
                tables.members.remove(&room_id);
            }
            if let Some(joined) = tables.joined.get_mut(conn_id) {
                joined.remove(&room_id);
                if joined.is_empty() {
                    tables.joined.remove(conn_id);
                }
            }

            departures.push(Departure { room_id, remaining });
        }
        departures
    }

    /// Returns the discoverable room directory: ids of rooms with at least
    /// one member that are syntactically valid version-4 UUIDs, sorted.
    pub async fn directory(&self) -> Vec<String> {
        let tables = self.tables.lock().await;
        let mut rooms: Vec<String> = tables
            .members
            .keys()
            .filter(|id| is_discoverable(id))
            .cloned()
            .collect();
        rooms.sort();
        rooms
    }

    /// Returns a room's current members, sorted. Empty if the room does
    /// not exist.
    pub async fn members(&self, room_id: &str) -> Vec<String> {
        let tables = self.tables.lock().await;
        let mut members: Vec<String> = tables
            .members
            .get(room_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Returns the rooms a connection has joined, sorted.
    pub async fn joined_rooms(&self, conn_id: &str) -> Vec<String> {
        let tables = self.tables.lock().await;
        let mut rooms: Vec<String> = tables
            .joined
            .get(conn_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }
}

/// A room id is discoverable when it parses as a version-4 UUID.
fn is_discoverable(room_id: &str) -> bool {
    Uuid::try_parse(room_id).is_ok_and(|id| id.get_version() == Some(uuid::Version::Random))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM_V4: &str = "1c6a3b72-5f2e-4d3a-9b8e-2f1a0c4d5e6f";
    const ROOM_V4_OTHER: &str = "0f8e2d4c-3b5a-4789-8abc-def012345678";
    const ROOM_V7: &str = "018f6d2e-9c1a-7b3d-8e4f-0a1b2c3d4e5f";

    #[tokio::test]
    async fn first_join_has_empty_snapshot() {
        let registry = RoomRegistry::new();
        let outcome = registry.join("alice", ROOM_V4).await;
        assert_eq!(outcome, JoinOutcome::Joined { existing: vec![] });
        assert_eq!(registry.members(ROOM_V4).await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn join_snapshot_lists_prior_members_only() {
        let registry = RoomRegistry::new();
        registry.join("alice", ROOM_V4).await;
        registry.join("bob", ROOM_V4).await;

        let outcome = registry.join("carol", ROOM_V4).await;
        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                existing: vec!["alice".to_string(), "bob".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn duplicate_join_is_noop() {
        let registry = RoomRegistry::new();
        registry.join("alice", ROOM_V4).await;

        let outcome = registry.join("alice", ROOM_V4).await;
        assert_eq!(outcome, JoinOutcome::AlreadyJoined);
        assert_eq!(registry.members(ROOM_V4).await, vec!["alice".to_string()]);
        assert_eq!(
            registry.joined_rooms("alice").await,
            vec![ROOM_V4.to_string()]
        );
    }

    #[tokio::test]
    async fn leave_reports_other_members() {
        let registry = RoomRegistry::new();
        registry.join("alice", ROOM_V4).await;
        registry.join("bob", ROOM_V4).await;
        registry.join("carol", ROOM_V4).await;

        let departures = registry.leave("alice", None).await;
        assert_eq!(
            departures,
            vec![Departure {
                room_id: ROOM_V4.to_string(),
                remaining: vec!["bob".to_string(), "carol".to_string()]
            }]
        );
        assert_eq!(
            registry.members(ROOM_V4).await,
            vec!["bob".to_string(), "carol".to_string()]
        );
    }

    #[tokio::test]
    async fn leave_unjoined_room_is_noop() {
        let registry = RoomRegistry::new();
        registry.join("alice", ROOM_V4).await;

        let departures = registry
            .leave("bob", Some(&[ROOM_V4.to_string(), "ghost".to_string()]))
            .await;
        assert!(departures.is_empty());
        assert_eq!(registry.members(ROOM_V4).await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn leave_all_covers_every_joined_room() {
        let registry = RoomRegistry::new();
        registry.join("alice", ROOM_V4).await;
        registry.join("alice", ROOM_V4_OTHER).await;
        registry.join("bob", ROOM_V4).await;

        let mut departures = registry.leave("alice", None).await;
        departures.sort_by(|a, b| a.room_id.cmp(&b.room_id));

        assert_eq!(departures.len(), 2);
        assert_eq!(departures[0].room_id, ROOM_V4_OTHER);
        assert!(departures[0].remaining.is_empty());
        assert_eq!(departures[1].room_id, ROOM_V4);
        assert_eq!(departures[1].remaining, vec!["bob".to_string()]);

        assert!(registry.joined_rooms("alice").await.is_empty());
        assert!(registry.members(ROOM_V4_OTHER).await.is_empty());
    }

    #[tokio::test]
    async fn emptied_room_vanishes_from_directory() {
        let registry = RoomRegistry::new();
        registry.join("alice", ROOM_V4).await;
        assert_eq!(registry.directory().await, vec![ROOM_V4.to_string()]);

        registry.leave("alice", None).await;
        assert!(registry.directory().await.is_empty());
    }

    #[tokio::test]
    async fn directory_filters_non_uuid_ids() {
        let registry = RoomRegistry::new();
        registry.join("alice", "not-a-uuid").await;
        registry.join("bob", ROOM_V4).await;

        assert_eq!(registry.directory().await, vec![ROOM_V4.to_string()]);
        // The malformed room still holds its member.
        assert_eq!(
            registry.members("not-a-uuid").await,
            vec!["alice".to_string()]
        );
    }

    #[tokio::test]
    async fn directory_excludes_non_v4_uuid() {
        let registry = RoomRegistry::new();
        registry.join("alice", ROOM_V7).await;
        assert!(registry.directory().await.is_empty());
    }

    #[tokio::test]
    async fn directory_is_sorted() {
        let registry = RoomRegistry::new();
        registry.join("alice", ROOM_V4_OTHER).await;
        registry.join("bob", ROOM_V4).await;

        assert_eq!(
            registry.directory().await,
            vec![ROOM_V4_OTHER.to_string(), ROOM_V4.to_string()]
        );
    }

    #[tokio::test]
    async fn disconnect_style_leave_clears_every_trace() {
        let registry = RoomRegistry::new();
        registry.join("alice", ROOM_V4).await;
        registry.join("alice", ROOM_V4_OTHER).await;

        registry.leave("alice", None).await;

        assert!(registry.joined_rooms("alice").await.is_empty());
        assert!(registry.members(ROOM_V4).await.is_empty());
        assert!(registry.members(ROOM_V4_OTHER).await.is_empty());
        assert!(registry.directory().await.is_empty());
    }
}
