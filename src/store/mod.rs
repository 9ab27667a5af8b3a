pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{CardRef, FlashcardProgress, ProgressStats};

/// Durable keyed store for per-(learner, card) scheduling state.
///
/// `upsert` must reject a write whose version is not exactly one ahead of
/// the stored record (`StoreError::Conflict`), so racing read-compute-write
/// cycles for the same pair cannot clobber each other. Pairs never share a
/// lock; unrelated submissions proceed independently.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(
        &self,
        learner_id: Uuid,
        card_id: Uuid,
    ) -> Result<Option<FlashcardProgress>, StoreError>;

    /// Insert or replace, guarded by the record's version counter. A fresh
    /// record carries version 1 (pristine state is version 0).
    async fn upsert(&self, progress: &FlashcardProgress) -> Result<(), StoreError>;

    /// Progress rows with `next_review_at <= before`, ordered ascending by
    /// review time with a stable creation-order tie-break.
    async fn scan_due(
        &self,
        learner_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Vec<FlashcardProgress>, StoreError>;

    /// Curriculum cards with no progress row yet, in assignment order.
    async fn scan_never_reviewed(&self, learner_id: Uuid) -> Result<Vec<CardRef>, StoreError>;

    async fn count_due(&self, learner_id: Uuid, before: DateTime<Utc>) -> Result<i64, StoreError>;

    async fn count_never_reviewed(&self, learner_id: Uuid) -> Result<i64, StoreError>;

    async fn learner_exists(&self, learner_id: Uuid) -> Result<bool, StoreError>;

    /// Whether the card belongs to the learner's curriculum.
    async fn card_assigned(&self, learner_id: Uuid, card_id: Uuid) -> Result<bool, StoreError>;

    /// Aggregate over the learner's progress rows only; the engine folds in
    /// the never-reviewed count.
    async fn stats(
        &self,
        learner_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProgressStats, StoreError>;
}
