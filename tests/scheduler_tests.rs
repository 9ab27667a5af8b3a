//! End-to-end scheduler tests over the in-memory store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use srs_engine::error::{EngineError, StoreError};
use srs_engine::model::{CardRef, FlashcardProgress, ProgressStats, ReviewPhase};
use srs_engine::reward::{RewardBus, RewardError, RewardGrant, RewardSink};
use srs_engine::store::ProgressStore;
use srs_engine::{MemoryStore, Scheduler, SchedulerConfig};

fn t0() -> DateTime<Utc> {
    "2026-03-01T09:00:00Z".parse().unwrap()
}

struct Fixture {
    store: Arc<MemoryStore>,
    bus: Arc<RewardBus>,
    scheduler: Scheduler,
    learner: Uuid,
    card: Uuid,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(RewardBus::new());
    let scheduler = Scheduler::new(
        store.clone(),
        bus.clone(),
        SchedulerConfig::default(),
    );
    let learner = Uuid::new_v4();
    let card = Uuid::new_v4();
    store.assign_card(learner, card);
    Fixture {
        store,
        bus,
        scheduler,
        learner,
        card,
    }
}

#[tokio::test]
async fn first_review_schedules_one_day_out() {
    let fx = fixture();

    let receipt = fx
        .scheduler
        .submit_review(fx.learner, fx.card, 5, t0())
        .await
        .unwrap();

    assert!((receipt.progress.ease_factor - 2.6).abs() < 1e-9);
    assert_eq!(receipt.progress.repetitions, 1);
    assert_eq!(receipt.progress.interval_days, 1);
    assert_eq!(
        receipt.progress.next_review_at,
        Some(t0() + Duration::days(1))
    );
    assert_eq!(receipt.reward_points, 10);
    assert_eq!(receipt.phase, ReviewPhase::Learning);
}

#[tokio::test]
async fn review_sequence_follows_interval_ladder() {
    let fx = fixture();

    // First success: one day.
    fx.scheduler
        .submit_review(fx.learner, fx.card, 5, t0())
        .await
        .unwrap();

    // Second success at quality 4: ease delta cancels out, six days.
    let second = fx
        .scheduler
        .submit_review(fx.learner, fx.card, 4, t0() + Duration::days(1))
        .await
        .unwrap();
    assert!((second.progress.ease_factor - 2.6).abs() < 1e-9);
    assert_eq!(second.progress.repetitions, 2);
    assert_eq!(second.progress.interval_days, 6);

    // Failure resets the streak and drops ease to 2.28.
    let third = fx
        .scheduler
        .submit_review(fx.learner, fx.card, 2, t0() + Duration::days(7))
        .await
        .unwrap();
    assert_eq!(third.progress.repetitions, 0);
    assert_eq!(third.progress.interval_days, 1);
    assert!((third.progress.ease_factor - 2.28).abs() < 1e-9);
    assert_eq!(third.reward_points, 0);
}

#[tokio::test]
async fn invalid_quality_leaves_state_untouched() {
    let fx = fixture();
    fx.scheduler
        .submit_review(fx.learner, fx.card, 4, t0())
        .await
        .unwrap();
    let before = fx.store.get(fx.learner, fx.card).await.unwrap().unwrap();

    let err = fx
        .scheduler
        .submit_review(fx.learner, fx.card, 7, t0() + Duration::days(1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let after = fx.store.get(fx.learner, fx.card).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn unknown_learner_and_unassigned_card_are_not_found() {
    let fx = fixture();

    let err = fx
        .scheduler
        .submit_review(Uuid::new_v4(), fx.card, 4, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let err = fx
        .scheduler
        .submit_review(fx.learner, Uuid::new_v4(), 4, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let err = fx.scheduler.get_queue(Uuid::new_v4(), t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn queue_orders_due_before_new_without_duplicates() {
    let fx = fixture();
    let overdue = fx.card;
    let barely_due = Uuid::new_v4();
    let fresh = Uuid::new_v4();
    fx.store.assign_card(fx.learner, barely_due);
    fx.store.assign_card(fx.learner, fresh);

    // Reviews two days and one day before `now` make both cards due,
    // the older one first.
    fx.scheduler
        .submit_review(fx.learner, overdue, 4, t0() - Duration::days(3))
        .await
        .unwrap();
    fx.scheduler
        .submit_review(fx.learner, barely_due, 4, t0() - Duration::days(2))
        .await
        .unwrap();

    let queue = fx.scheduler.get_queue(fx.learner, t0()).await.unwrap();
    assert_eq!(
        queue,
        vec![
            CardRef::new(overdue),
            CardRef::new(barely_due),
            CardRef::new(fresh)
        ]
    );

    let mut seen = queue.clone();
    seen.sort_by_key(|r| r.card_id);
    seen.dedup();
    assert_eq!(seen.len(), queue.len());

    assert_eq!(fx.scheduler.get_due_count(fx.learner, t0()).await.unwrap(), 3);
}

#[tokio::test]
async fn future_reviews_are_not_due() {
    let fx = fixture();
    fx.scheduler
        .submit_review(fx.learner, fx.card, 5, t0())
        .await
        .unwrap();

    // Next review is at t0 + 1d; nothing due before then.
    let queue = fx.scheduler.get_queue(fx.learner, t0()).await.unwrap();
    assert!(queue.is_empty());
    assert_eq!(fx.scheduler.get_due_count(fx.learner, t0()).await.unwrap(), 0);

    let later = t0() + Duration::days(1);
    assert_eq!(fx.scheduler.get_due_count(fx.learner, later).await.unwrap(), 1);
}

#[tokio::test]
async fn successful_review_publishes_one_grant() {
    let fx = fixture();
    let mut receiver = fx.bus.subscribe();

    fx.scheduler
        .submit_review(fx.learner, fx.card, 3, t0())
        .await
        .unwrap();

    let grant = receiver.recv().await.unwrap();
    assert_eq!(grant.learner_id, fx.learner);
    assert_eq!(grant.card_id, fx.card);
    assert_eq!(grant.points, 8);
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn failed_review_publishes_nothing() {
    let fx = fixture();
    let mut receiver = fx.bus.subscribe();

    fx.scheduler
        .submit_review(fx.learner, fx.card, 1, t0())
        .await
        .unwrap();

    assert!(receiver.try_recv().is_err());
}

struct FailingSink;

#[async_trait]
impl RewardSink for FailingSink {
    async fn notify(&self, _grant: RewardGrant) -> Result<(), RewardError> {
        Err(RewardError::Rejected("downstream unavailable".to_string()))
    }
}

#[tokio::test]
async fn sink_failure_does_not_fail_the_submission() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(FailingSink),
        SchedulerConfig::default(),
    );
    let learner = Uuid::new_v4();
    let card = Uuid::new_v4();
    store.assign_card(learner, card);

    let receipt = scheduler.submit_review(learner, card, 5, t0()).await.unwrap();
    assert_eq!(receipt.reward_points, 10);

    // The write committed despite the sink.
    assert!(store.get(learner, card).await.unwrap().is_some());
}

/// Delegates to a `MemoryStore` but fails the first N upserts with a
/// version conflict, as a racing writer would.
struct ContendedStore {
    inner: MemoryStore,
    conflicts_left: AtomicU32,
}

#[async_trait]
impl ProgressStore for ContendedStore {
    async fn get(
        &self,
        learner_id: Uuid,
        card_id: Uuid,
    ) -> Result<Option<FlashcardProgress>, StoreError> {
        self.inner.get(learner_id, card_id).await
    }

    async fn upsert(&self, progress: &FlashcardProgress) -> Result<(), StoreError> {
        if self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict {
                learner_id: progress.learner_id,
                card_id: progress.card_id,
            });
        }
        self.inner.upsert(progress).await
    }

    async fn scan_due(
        &self,
        learner_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Vec<FlashcardProgress>, StoreError> {
        self.inner.scan_due(learner_id, before).await
    }

    async fn scan_never_reviewed(&self, learner_id: Uuid) -> Result<Vec<CardRef>, StoreError> {
        self.inner.scan_never_reviewed(learner_id).await
    }

    async fn count_due(&self, learner_id: Uuid, before: DateTime<Utc>) -> Result<i64, StoreError> {
        self.inner.count_due(learner_id, before).await
    }

    async fn count_never_reviewed(&self, learner_id: Uuid) -> Result<i64, StoreError> {
        self.inner.count_never_reviewed(learner_id).await
    }

    async fn learner_exists(&self, learner_id: Uuid) -> Result<bool, StoreError> {
        self.inner.learner_exists(learner_id).await
    }

    async fn card_assigned(&self, learner_id: Uuid, card_id: Uuid) -> Result<bool, StoreError> {
        self.inner.card_assigned(learner_id, card_id).await
    }

    async fn stats(
        &self,
        learner_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProgressStats, StoreError> {
        self.inner.stats(learner_id, now).await
    }
}

#[tokio::test]
async fn conflicts_are_retried_until_the_write_lands() {
    let inner = MemoryStore::new();
    let learner = Uuid::new_v4();
    let card = Uuid::new_v4();
    inner.assign_card(learner, card);

    let store = Arc::new(ContendedStore {
        inner,
        conflicts_left: AtomicU32::new(2),
    });
    let scheduler = Scheduler::new(store.clone(), Arc::new(RewardBus::new()), SchedulerConfig::default());

    let receipt = scheduler.submit_review(learner, card, 4, t0()).await.unwrap();
    assert_eq!(receipt.progress.repetitions, 1);
    assert!(store.get(learner, card).await.unwrap().is_some());
}

#[tokio::test]
async fn conflict_retries_are_bounded() {
    let inner = MemoryStore::new();
    let learner = Uuid::new_v4();
    let card = Uuid::new_v4();
    inner.assign_card(learner, card);

    let store = Arc::new(ContendedStore {
        inner,
        conflicts_left: AtomicU32::new(u32::MAX),
    });
    let scheduler = Scheduler::new(store, Arc::new(RewardBus::new()), SchedulerConfig::default());

    let err = scheduler.submit_review(learner, card, 4, t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn stats_reflect_review_history() {
    let fx = fixture();
    let second = Uuid::new_v4();
    let untouched = Uuid::new_v4();
    fx.store.assign_card(fx.learner, second);
    fx.store.assign_card(fx.learner, untouched);

    // fx.card reaches the reviewing phase, `second` stays in learning.
    fx.scheduler
        .submit_review(fx.learner, fx.card, 5, t0() - Duration::days(10))
        .await
        .unwrap();
    fx.scheduler
        .submit_review(fx.learner, fx.card, 5, t0() - Duration::days(9))
        .await
        .unwrap();
    fx.scheduler
        .submit_review(fx.learner, second, 3, t0() - Duration::days(1))
        .await
        .unwrap();

    let stats = fx.scheduler.get_stats(fx.learner, t0()).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.new_cards, 1);
    assert_eq!(stats.learning, 1);
    assert_eq!(stats.reviewing, 1);
    assert_eq!(stats.due, 2);
    assert!(stats.mastery_score > 0);
}

#[tokio::test]
async fn reset_preserves_the_learned_flag() {
    let fx = fixture();

    // Build a streak long enough to set `learned`.
    let mut when = t0();
    for _ in 0..7 {
        fx.scheduler
            .submit_review(fx.learner, fx.card, 5, when)
            .await
            .unwrap();
        when = when + Duration::days(40);
    }
    let progressed = fx.store.get(fx.learner, fx.card).await.unwrap().unwrap();
    assert!(progressed.learned);

    let reset = fx.scheduler.reset_progress(fx.learner, fx.card).await.unwrap();
    assert_eq!(reset.repetitions, 0);
    assert_eq!(reset.interval_days, 0);
    assert!((reset.ease_factor - 2.5).abs() < 1e-9);
    assert!(reset.last_reviewed_at.is_none());
    assert!(reset.learned);

    // Resetting a card with no history is an error.
    let err = fx
        .scheduler
        .reset_progress(fx.learner, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn seeding_makes_a_card_immediately_due() {
    let fx = fixture();

    fx.scheduler.seed_card(fx.learner, fx.card, t0()).await.unwrap();
    // Idempotent.
    fx.scheduler.seed_card(fx.learner, fx.card, t0()).await.unwrap();

    let queue = fx.scheduler.get_queue(fx.learner, t0()).await.unwrap();
    assert_eq!(queue, vec![CardRef::new(fx.card)]);

    let seeded = fx.store.get(fx.learner, fx.card).await.unwrap().unwrap();
    assert_eq!(seeded.phase(), ReviewPhase::New);
    assert_eq!(seeded.next_review_at, Some(t0()));
}
