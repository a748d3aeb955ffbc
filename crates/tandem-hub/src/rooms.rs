//! Room membership and the login-time room assignment rules.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::collab::IdentityGrants;

/// Domain category of a room pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Extensions,
    Queues,
    Trunks,
    Parkings,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Extensions,
        Category::Queues,
        Category::Trunks,
        Category::Parkings,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Category::Extensions => "extensions",
            Category::Queues => "queues",
            Category::Trunks => "trunks",
            Category::Parkings => "parkings",
        }
    }
}

/// Redaction variant of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Clear,
    Privacy,
}

/// A named broadcast group; connections join at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId {
    pub category: Category,
    pub variant: Variant,
}

impl RoomId {
    pub const fn clear(category: Category) -> Self {
        Self {
            category,
            variant: Variant::Clear,
        }
    }

    pub const fn privacy(category: Category) -> Self {
        Self {
            category,
            variant: Variant::Privacy,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self.variant {
            Variant::Clear => "clear",
            Variant::Privacy => "privacy",
        };
        write!(f, "{}:{}", self.category.as_str(), variant)
    }
}

/// Computes the rooms an identity joins, from the grants snapshotted at
/// login.
///
/// Each authorized category yields exactly one of its clear/privacy pair;
/// unauthorized categories yield nothing. The admin-queues escalation forces
/// the clear queues room regardless of the privacy flag, because queue
/// supervision is useless against masked callers.
pub fn rooms_for(grants: &IdentityGrants) -> Vec<RoomId> {
    let mut rooms = Vec::new();
    let variant_for = |privacy: bool| {
        if privacy {
            Variant::Privacy
        } else {
            Variant::Clear
        }
    };

    if grants.extensions {
        rooms.push(RoomId {
            category: Category::Extensions,
            variant: variant_for(grants.privacy_enabled),
        });
    }
    if grants.queues || grants.admin_queues {
        rooms.push(RoomId {
            category: Category::Queues,
            variant: variant_for(grants.privacy_enabled && !grants.admin_queues),
        });
    }
    if grants.trunks {
        rooms.push(RoomId {
            category: Category::Trunks,
            variant: variant_for(grants.privacy_enabled),
        });
    }
    if grants.parkings {
        rooms.push(RoomId {
            category: Category::Parkings,
            variant: variant_for(grants.privacy_enabled),
        });
    }
    rooms
}

/// Tracks which connections are members of which rooms.
///
/// Lock ordering: `rooms` before `memberships`, consistently in every
/// method, to prevent deadlocks.
#[derive(Clone, Default)]
pub struct RoomRouter {
    /// room -> member connection ids.
    rooms: Arc<RwLock<HashMap<RoomId, HashSet<Uuid>>>>,
    /// Reverse mapping: connection id -> joined rooms.
    memberships: Arc<RwLock<HashMap<Uuid, HashSet<RoomId>>>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins a connection to a set of rooms, replacing any prior
    /// memberships of the same connection.
    pub async fn join(&self, connection_id: Uuid, rooms: &[RoomId]) {
        self.leave_all(connection_id).await;

        let mut room_map = self.rooms.write().await;
        for room in rooms {
            room_map.entry(*room).or_default().insert(connection_id);
        }
        drop(room_map);

        let mut memberships = self.memberships.write().await;
        memberships
            .entry(connection_id)
            .or_default()
            .extend(rooms.iter().copied());
    }

    /// Drops every membership of a connection. No-op for unknown ids.
    pub async fn leave_all(&self, connection_id: Uuid) {
        let joined = {
            let memberships = self.memberships.read().await;
            memberships.get(&connection_id).cloned()
        };

        if let Some(ref joined) = joined {
            let mut room_map = self.rooms.write().await;
            for room in joined {
                if let Some(members) = room_map.get_mut(room) {
                    members.remove(&connection_id);
                    if members.is_empty() {
                        room_map.remove(room);
                    }
                }
            }
        }

        if joined.is_some() {
            self.memberships.write().await.remove(&connection_id);
        }
    }

    /// Current members of a room.
    pub async fn members(&self, room: RoomId) -> HashSet<Uuid> {
        self.rooms
            .read()
            .await
            .get(&room)
            .cloned()
            .unwrap_or_default()
    }

    /// Rooms a connection has joined.
    pub async fn rooms_of(&self, connection_id: Uuid) -> HashSet<RoomId> {
        self.memberships
            .read()
            .await
            .get(&connection_id)
            .cloned()
            .unwrap_or_default()
    }
}
