//! Fire-and-forget reward notifications.
//!
//! The engine publishes a `RewardGrant` after a review commit; nothing in
//! the scheduling path waits on, or fails because of, the consumer side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 1024;

/// Points earned by one successful review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardGrant {
    pub learner_id: Uuid,
    pub card_id: Uuid,
    pub quality: i32,
    pub points: i32,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    #[error("reward sink rejected notification: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait RewardSink: Send + Sync {
    async fn notify(&self, grant: RewardGrant) -> Result<(), RewardError>;
}

/// Broadcast fan-out so a gamification consumer (XP accounting, badges)
/// can subscribe without coupling into the scheduling path.
pub struct RewardBus {
    sender: broadcast::Sender<RewardGrant>,
}

impl RewardBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RewardGrant> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RewardBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RewardSink for RewardBus {
    async fn notify(&self, grant: RewardGrant) -> Result<(), RewardError> {
        match self.sender.send(grant) {
            Ok(delivered) => {
                debug!(delivered, "reward grant published");
                Ok(())
            }
            // No subscribers; the grant is dropped.
            Err(_) => {
                debug!("reward grant had no subscribers");
                Ok(())
            }
        }
    }
}

/// Sink of last resort: records the grant in the log stream only.
pub struct LogSink;

#[async_trait]
impl RewardSink for LogSink {
    async fn notify(&self, grant: RewardGrant) -> Result<(), RewardError> {
        tracing::info!(
            learner_id = %grant.learner_id,
            card_id = %grant.card_id,
            points = grant.points,
            "reward granted"
        );
        Ok(())
    }
}
