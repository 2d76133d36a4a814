//! Follower Graph
//!
//! Directed follow relationships between users. Indexed by followee so that
//! resolving the audience of a status update costs time proportional to that
//! user's follower count, not to the total number of edges.
//!
//! The graph itself is not synchronized. It is mutated only from the
//! sequencer's serialized path; readers elsewhere go through the
//! `parking_lot::RwLock` the dispatcher shares.

use std::collections::{HashMap, HashSet};

use crate::types::UserId;

/// Follow relationships, indexed in both directions
#[derive(Debug, Default, Clone)]
pub struct FollowerGraph {
    /// followee → followers
    followers: HashMap<UserId, HashSet<UserId>>,

    /// follower → followees
    following: HashMap<UserId, HashSet<UserId>>,

    edge_count: usize,
}

impl FollowerGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `follower` follows `followee`.
    ///
    /// Returns `false` if the edge already existed.
    pub fn add_edge(&mut self, follower: UserId, followee: UserId) -> bool {
        let inserted = self
            .followers
            .entry(followee)
            .or_default()
            .insert(follower);

        if inserted {
            self.following.entry(follower).or_default().insert(followee);
            self.edge_count += 1;
        }
        inserted
    }

    /// Remove the edge if present.
    ///
    /// Returns `false` if there was nothing to remove.
    pub fn remove_edge(&mut self, follower: UserId, followee: UserId) -> bool {
        let removed = match self.followers.get_mut(&followee) {
            Some(set) => {
                let removed = set.remove(&follower);
                if set.is_empty() {
                    self.followers.remove(&followee);
                }
                removed
            }
            None => false,
        };

        if removed {
            if let Some(set) = self.following.get_mut(&follower) {
                set.remove(&followee);
                if set.is_empty() {
                    self.following.remove(&follower);
                }
            }
            self.edge_count -= 1;
        }
        removed
    }

    /// Point-in-time snapshot of the followers of `user`
    pub fn followers_of(&self, user: UserId) -> Vec<UserId> {
        self.followers
            .get(&user)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Point-in-time snapshot of the users `user` follows
    pub fn following_of(&self, user: UserId) -> Vec<UserId> {
        self.following
            .get(&user)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Check whether an edge exists
    pub fn contains(&self, follower: UserId, followee: UserId) -> bool {
        self.followers
            .get(&followee)
            .is_some_and(|set| set.contains(&follower))
    }

    /// Total number of edges
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Check if the graph has no edges
    pub fn is_empty(&self) -> bool {
        self.edge_count == 0
    }
}
