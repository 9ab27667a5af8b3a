//! Scheduler orchestration: the surface a transport layer calls into.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{EngineError, StoreError};
use crate::model::{CardRef, FlashcardProgress, ProgressStats, ReviewReceipt};
use crate::queue;
use crate::reward::{RewardGrant, RewardSink};
use crate::sm2;
use crate::store::ProgressStore;

pub struct Scheduler {
    store: Arc<dyn ProgressStore>,
    sink: Arc<dyn RewardSink>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        sink: Arc<dyn RewardSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    /// Apply one review and persist the outcome.
    ///
    /// The read-compute-write cycle retries on version conflicts up to the
    /// configured bound, re-reading the record each time, so the committed
    /// write always reflects the state it was computed from. The reward
    /// notification runs only after the commit and cannot fail the call.
    pub async fn submit_review(
        &self,
        learner_id: Uuid,
        card_id: Uuid,
        quality: i32,
        now: DateTime<Utc>,
    ) -> Result<ReviewReceipt, EngineError> {
        let receipt = timeout(
            self.config.submit_timeout,
            self.submit_cycle(learner_id, card_id, quality, now),
        )
        .await
        .map_err(|_| EngineError::Timeout("submit_review"))??;

        if receipt.reward_points > 0 {
            self.notify_reward(&receipt, quality).await;
        }
        Ok(receipt)
    }

    async fn submit_cycle(
        &self,
        learner_id: Uuid,
        card_id: Uuid,
        quality: i32,
        now: DateTime<Utc>,
    ) -> Result<ReviewReceipt, EngineError> {
        queue::ensure_learner(self.store.as_ref(), learner_id).await?;
        if !self.store.card_assigned(learner_id, card_id).await? {
            return Err(EngineError::NotFound(format!(
                "card {card_id} not assigned to learner {learner_id}"
            )));
        }

        let mut attempt = 0;
        loop {
            let current = self
                .store
                .get(learner_id, card_id)
                .await?
                .unwrap_or_else(|| FlashcardProgress::new(learner_id, card_id));

            let outcome = sm2::process(&current, quality, now)?;

            match self.store.upsert(&outcome.next).await {
                Ok(()) => {
                    let phase = outcome.next.phase();
                    return Ok(ReviewReceipt {
                        progress: outcome.next,
                        phase,
                        reward_points: outcome.reward_points,
                    });
                }
                Err(StoreError::Conflict { .. }) if attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    debug!(
                        %learner_id,
                        %card_id,
                        attempt,
                        "version conflict, retrying review cycle"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn notify_reward(&self, receipt: &ReviewReceipt, quality: i32) {
        let grant = RewardGrant {
            learner_id: receipt.progress.learner_id,
            card_id: receipt.progress.card_id,
            quality,
            points: receipt.reward_points,
            granted_at: Utc::now(),
        };
        match timeout(self.config.reward_timeout, self.sink.notify(grant)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(error = %err, "reward sink rejected grant, scheduling state is committed");
            }
            Err(_) => {
                warn!("reward sink notification timed out, scheduling state is committed");
            }
        }
    }

    /// Ordered study queue for the learner at `now`.
    pub async fn get_queue(
        &self,
        learner_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<CardRef>, EngineError> {
        timeout(
            self.config.queue_timeout,
            queue::build_queue(self.store.as_ref(), learner_id, now),
        )
        .await
        .map_err(|_| EngineError::Timeout("get_queue"))?
    }

    pub async fn get_due_count(
        &self,
        learner_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, EngineError> {
        timeout(
            self.config.queue_timeout,
            queue::count_due(self.store.as_ref(), learner_id, now),
        )
        .await
        .map_err(|_| EngineError::Timeout("get_due_count"))?
    }

    /// Progress aggregate for dashboards: phase counts, due load and the
    /// ease-derived mastery score, plus the never-reviewed card count.
    pub async fn get_stats(
        &self,
        learner_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProgressStats, EngineError> {
        timeout(self.config.queue_timeout, async {
            queue::ensure_learner(self.store.as_ref(), learner_id).await?;
            let mut stats = self.store.stats(learner_id, now).await?;
            stats.new_cards = self.store.count_never_reviewed(learner_id).await?;
            Ok(stats)
        })
        .await
        .map_err(|_| EngineError::Timeout("get_stats"))?
    }

    /// Wipe a record's scheduling state back to pristine. The `learned`
    /// flag is monotonic and survives the reset.
    pub async fn reset_progress(
        &self,
        learner_id: Uuid,
        card_id: Uuid,
    ) -> Result<FlashcardProgress, EngineError> {
        timeout(self.config.submit_timeout, async {
            let mut attempt = 0;
            loop {
                let current = self
                    .store
                    .get(learner_id, card_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::NotFound(format!(
                            "no progress for learner {learner_id} card {card_id}"
                        ))
                    })?;

                let mut reset = FlashcardProgress::new(learner_id, card_id);
                reset.learned = current.learned;
                reset.version = current.version + 1;

                match self.store.upsert(&reset).await {
                    Ok(()) => return Ok(reset),
                    Err(StoreError::Conflict { .. })
                        if attempt < self.config.max_conflict_retries =>
                    {
                        attempt += 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        })
        .await
        .map_err(|_| EngineError::Timeout("reset_progress"))?
    }

    /// Create an immediately-due pristine record if none exists. Idempotent:
    /// losing the insert race to another seeder or a first review is fine.
    pub async fn seed_card(
        &self,
        learner_id: Uuid,
        card_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        timeout(self.config.submit_timeout, async {
            queue::ensure_learner(self.store.as_ref(), learner_id).await?;
            if !self.store.card_assigned(learner_id, card_id).await? {
                return Err(EngineError::NotFound(format!(
                    "card {card_id} not assigned to learner {learner_id}"
                )));
            }
            if self.store.get(learner_id, card_id).await?.is_some() {
                return Ok(());
            }

            let mut seeded = FlashcardProgress::new(learner_id, card_id);
            seeded.next_review_at = Some(now);
            seeded.version = 1;

            match self.store.upsert(&seeded).await {
                Ok(()) | Err(StoreError::Conflict { .. }) => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
        .await
        .map_err(|_| EngineError::Timeout("seed_card"))?
    }
}
