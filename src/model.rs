use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const INITIAL_EASE_FACTOR: f64 = 2.5;
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Scheduling state for one (learner, card) pair. Created lazily on first
/// review; the version counter backs optimistic concurrency in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardProgress {
    pub learner_id: Uuid,
    pub card_id: Uuid,
    pub ease_factor: f64,
    pub repetitions: i32,
    pub interval_days: i32,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub next_review_at: Option<DateTime<Utc>>,
    pub learned: bool,
    pub version: i64,
}

impl FlashcardProgress {
    /// Pristine state for a card that has never been reviewed.
    pub fn new(learner_id: Uuid, card_id: Uuid) -> Self {
        Self {
            learner_id,
            card_id,
            ease_factor: INITIAL_EASE_FACTOR,
            repetitions: 0,
            interval_days: 0,
            last_reviewed_at: None,
            next_review_at: None,
            learned: false,
            version: 0,
        }
    }

    pub fn phase(&self) -> ReviewPhase {
        if self.last_reviewed_at.is_none() {
            ReviewPhase::New
        } else if self.repetitions <= 1 {
            ReviewPhase::Learning
        } else {
            ReviewPhase::Reviewing
        }
    }

    /// Due relative to `now`. Records without a scheduled review are never
    /// due; they surface through the never-reviewed scan instead.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.next_review_at, Some(at) if at <= now)
    }
}

/// Scheduling phase derived from the record. `learned` is an overlay flag
/// on `Reviewing`, not a phase of its own; reviews keep flowing normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewPhase {
    New,
    Learning,
    Reviewing,
}

impl ReviewPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Learning => "LEARNING",
            Self::Reviewing => "REVIEWING",
        }
    }
}

/// A queue entry; the study queue carries references, not card payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRef {
    pub card_id: Uuid,
}

impl CardRef {
    pub fn new(card_id: Uuid) -> Self {
        Self { card_id }
    }
}

/// Result of a committed review submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReceipt {
    pub progress: FlashcardProgress,
    pub phase: ReviewPhase,
    pub reward_points: i32,
}

/// Per-learner progress aggregate. `new_cards` counts curriculum cards
/// without a progress row; the rest partition the existing rows.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStats {
    pub total: i64,
    pub new_cards: i64,
    pub learning: i64,
    pub reviewing: i64,
    pub learned: i64,
    pub due: i64,
    /// 0-100, from the mean normalised ease `(ef - 1.3) / 1.2`.
    pub mastery_score: i32,
}
