//! In-memory `ProgressStore` used by tests and single-process embedders.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{CardRef, FlashcardProgress, ProgressStats, ReviewPhase, MIN_EASE_FACTOR};
use crate::store::ProgressStore;

struct Entry {
    progress: FlashcardProgress,
    /// Global insertion sequence, the stable due-scan tie-break.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    records: HashMap<(Uuid, Uuid), Entry>,
    /// Learner -> curriculum cards in assignment order.
    curriculum: HashMap<Uuid, Vec<Uuid>>,
    learners: HashSet<Uuid>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learner registration is platform-owned; exposed here so tests and
    /// single-process embedders can stage learners.
    pub fn register_learner(&self, learner_id: Uuid) {
        self.inner.write().learners.insert(learner_id);
    }

    pub fn assign_card(&self, learner_id: Uuid, card_id: Uuid) {
        let mut inner = self.inner.write();
        inner.learners.insert(learner_id);
        let cards = inner.curriculum.entry(learner_id).or_default();
        if !cards.contains(&card_id) {
            cards.push(card_id);
        }
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn get(
        &self,
        learner_id: Uuid,
        card_id: Uuid,
    ) -> Result<Option<FlashcardProgress>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .get(&(learner_id, card_id))
            .map(|entry| entry.progress.clone()))
    }

    async fn upsert(&self, progress: &FlashcardProgress) -> Result<(), StoreError> {
        let key = (progress.learner_id, progress.card_id);
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        if let Some(entry) = inner.records.get_mut(&key) {
            if progress.version != entry.progress.version + 1 {
                return Err(StoreError::Conflict {
                    learner_id: progress.learner_id,
                    card_id: progress.card_id,
                });
            }
            entry.progress = progress.clone();
            return Ok(());
        }

        if progress.version != 1 {
            return Err(StoreError::Conflict {
                learner_id: progress.learner_id,
                card_id: progress.card_id,
            });
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.records.insert(
            key,
            Entry {
                progress: progress.clone(),
                seq,
            },
        );
        Ok(())
    }

    async fn scan_due(
        &self,
        learner_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Vec<FlashcardProgress>, StoreError> {
        let inner = self.inner.read();
        let mut due: Vec<(&Entry, DateTime<Utc>)> = inner
            .records
            .values()
            .filter(|entry| entry.progress.learner_id == learner_id)
            .filter_map(|entry| match entry.progress.next_review_at {
                Some(at) if at <= before => Some((entry, at)),
                _ => None,
            })
            .collect();
        due.sort_by_key(|(entry, at)| (*at, entry.seq));
        Ok(due
            .into_iter()
            .map(|(entry, _)| entry.progress.clone())
            .collect())
    }

    async fn scan_never_reviewed(&self, learner_id: Uuid) -> Result<Vec<CardRef>, StoreError> {
        let inner = self.inner.read();
        let cards = match inner.curriculum.get(&learner_id) {
            Some(cards) => cards,
            None => return Ok(Vec::new()),
        };
        Ok(cards
            .iter()
            .filter(|card_id| !inner.records.contains_key(&(learner_id, **card_id)))
            .map(|card_id| CardRef::new(*card_id))
            .collect())
    }

    async fn count_due(&self, learner_id: Uuid, before: DateTime<Utc>) -> Result<i64, StoreError> {
        let inner = self.inner.read();
        let count = inner
            .records
            .values()
            .filter(|entry| entry.progress.learner_id == learner_id)
            .filter(|entry| entry.progress.is_due(before))
            .count();
        Ok(count as i64)
    }

    async fn count_never_reviewed(&self, learner_id: Uuid) -> Result<i64, StoreError> {
        let inner = self.inner.read();
        let count = inner
            .curriculum
            .get(&learner_id)
            .map(|cards| {
                cards
                    .iter()
                    .filter(|card_id| !inner.records.contains_key(&(learner_id, **card_id)))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as i64)
    }

    async fn learner_exists(&self, learner_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.read().learners.contains(&learner_id))
    }

    async fn card_assigned(&self, learner_id: Uuid, card_id: Uuid) -> Result<bool, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .curriculum
            .get(&learner_id)
            .map(|cards| cards.contains(&card_id))
            .unwrap_or(false))
    }

    async fn stats(
        &self,
        learner_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProgressStats, StoreError> {
        let inner = self.inner.read();
        let mut stats = ProgressStats::default();
        let mut ease_norm_sum = 0.0;
        for entry in inner
            .records
            .values()
            .filter(|entry| entry.progress.learner_id == learner_id)
        {
            let progress = &entry.progress;
            stats.total += 1;
            match progress.phase() {
                ReviewPhase::Reviewing => stats.reviewing += 1,
                _ => stats.learning += 1,
            }
            if progress.learned {
                stats.learned += 1;
            }
            if progress.is_due(now) {
                stats.due += 1;
            }
            ease_norm_sum += ((progress.ease_factor - MIN_EASE_FACTOR) / 1.2).clamp(0.0, 1.0);
        }
        if stats.total > 0 {
            stats.mastery_score = (ease_norm_sum / stats.total as f64 * 100.0).round() as i32;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn due_at(learner: Uuid, card: Uuid, at: DateTime<Utc>, version: i64) -> FlashcardProgress {
        let mut progress = FlashcardProgress::new(learner, card);
        progress.last_reviewed_at = Some(at - Duration::days(1));
        progress.next_review_at = Some(at);
        progress.version = version;
        progress
    }

    #[tokio::test]
    async fn upsert_rejects_stale_version() {
        let store = MemoryStore::new();
        let learner = Uuid::new_v4();
        let card = Uuid::new_v4();
        let now = Utc::now();

        let first = due_at(learner, card, now, 1);
        store.upsert(&first).await.unwrap();

        // Re-submitting the same version races with the committed write.
        let stale = due_at(learner, card, now, 1);
        assert!(matches!(
            store.upsert(&stale).await,
            Err(StoreError::Conflict { .. })
        ));

        let mut fresh = first.clone();
        fresh.version = 2;
        store.upsert(&fresh).await.unwrap();
    }

    #[tokio::test]
    async fn first_write_must_be_version_one() {
        let store = MemoryStore::new();
        let mut progress = FlashcardProgress::new(Uuid::new_v4(), Uuid::new_v4());
        progress.version = 2;
        assert!(matches!(
            store.upsert(&progress).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn due_scan_orders_by_time_then_insertion() {
        let store = MemoryStore::new();
        let learner = Uuid::new_v4();
        let now = Utc::now();
        let later = due_at(learner, Uuid::new_v4(), now - Duration::days(1), 1);
        let earlier = due_at(learner, Uuid::new_v4(), now - Duration::days(2), 1);
        let tied = due_at(learner, Uuid::new_v4(), now - Duration::days(2), 1);

        store.upsert(&later).await.unwrap();
        store.upsert(&earlier).await.unwrap();
        store.upsert(&tied).await.unwrap();

        let due = store.scan_due(learner, now).await.unwrap();
        let cards: Vec<Uuid> = due.iter().map(|p| p.card_id).collect();
        assert_eq!(cards, vec![earlier.card_id, tied.card_id, later.card_id]);
    }

    #[tokio::test]
    async fn never_reviewed_scan_skips_progressed_cards() {
        let store = MemoryStore::new();
        let learner = Uuid::new_v4();
        let seen = Uuid::new_v4();
        let unseen = Uuid::new_v4();
        store.assign_card(learner, seen);
        store.assign_card(learner, unseen);

        let progress = due_at(learner, seen, Utc::now(), 1);
        store.upsert(&progress).await.unwrap();

        let fresh = store.scan_never_reviewed(learner).await.unwrap();
        assert_eq!(fresh, vec![CardRef::new(unseen)]);
        assert_eq!(store.count_never_reviewed(learner).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stats_partition_phases() {
        let store = MemoryStore::new();
        let learner = Uuid::new_v4();
        let now = Utc::now();

        let mut learning = due_at(learner, Uuid::new_v4(), now + Duration::days(1), 1);
        learning.repetitions = 1;
        let mut reviewing = due_at(learner, Uuid::new_v4(), now - Duration::days(1), 1);
        reviewing.repetitions = 4;
        reviewing.learned = true;

        store.upsert(&learning).await.unwrap();
        store.upsert(&reviewing).await.unwrap();

        let stats = store.stats(learner, now).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.learning, 1);
        assert_eq!(stats.reviewing, 1);
        assert_eq!(stats.learned, 1);
        assert_eq!(stats.due, 1);
    }
}
