/// Presence tracking for counterparts, fed only by push events
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Set of participant ids currently online.
///
/// An id that is not in the set is unknown or offline; neither is an error.
#[derive(Clone, Default)]
pub struct PresenceTracker {
    online: Arc<RwLock<HashSet<String>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the participant was not already online
    pub async fn set_online(&self, participant_id: &str) -> bool {
        let mut online = self.online.write().await;
        online.insert(participant_id.to_string())
    }

    /// Returns true if the participant was online
    pub async fn set_offline(&self, participant_id: &str) -> bool {
        let mut online = self.online.write().await;
        online.remove(participant_id)
    }

    /// Apply a presence change, returning whether anything changed
    pub async fn apply(&self, participant_id: &str, is_online: bool) -> bool {
        if is_online {
            self.set_online(participant_id).await
        } else {
            self.set_offline(participant_id).await
        }
    }

    pub async fn is_online(&self, participant_id: &str) -> bool {
        let online = self.online.read().await;
        online.contains(participant_id)
    }

    pub async fn online_ids(&self) -> Vec<String> {
        let online = self.online.read().await;
        let mut ids: Vec<String> = online.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget everything (session teardown)
    pub async fn clear(&self) {
        self.online.write().await.clear();
    }
}
