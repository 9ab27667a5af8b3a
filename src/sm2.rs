//! SM-2 review-outcome processor.
//!
//! Pure state transitions: no store access, no clock reads. Callers pass
//! the current record and the wall-clock instant and persist the result.

use chrono::{DateTime, Duration, Utc};

use crate::error::EngineError;
use crate::model::{FlashcardProgress, MIN_EASE_FACTOR};

pub const MIN_QUALITY: i32 = 0;
pub const MAX_QUALITY: i32 = 5;

/// Grades below this reset the repetition streak.
pub const PASSING_QUALITY: i32 = 3;

const REWARD_BASE_POINTS: i32 = 5;
const LEARNED_MIN_STREAK: i32 = 5;

/// 100 years; keeps runaway streaks inside the representable date range.
const MAX_INTERVAL_DAYS: i32 = 36_500;

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub next: FlashcardProgress,
    pub reward_points: i32,
}

/// Apply one review with `quality` in `[0,5]` to `current` at instant `now`.
///
/// Ease update for every valid grade: `ef' = ef + (0.1 - (5-q)(0.08 + (5-q)0.02))`,
/// floored at 1.3. Passing grades walk the 1 / 6 / `round(interval * ef')`
/// interval ladder and earn `5 + quality` points; failing grades reset the
/// streak to a one-day interval and earn nothing.
pub fn process(
    current: &FlashcardProgress,
    quality: i32,
    now: DateTime<Utc>,
) -> Result<ReviewOutcome, EngineError> {
    if !(MIN_QUALITY..=MAX_QUALITY).contains(&quality) {
        return Err(EngineError::InvalidInput(format!(
            "quality must be in [{MIN_QUALITY},{MAX_QUALITY}], got {quality}"
        )));
    }

    let new_ease = next_ease_factor(current.ease_factor, quality);

    let mut next = current.clone();
    next.ease_factor = new_ease;

    let reward_points;
    if quality >= PASSING_QUALITY {
        next.interval_days = match current.repetitions {
            0 => 1,
            1 => 6,
            _ => ((f64::from(current.interval_days) * new_ease).round() as i32)
                .min(MAX_INTERVAL_DAYS),
        };
        next.repetitions = current.repetitions + 1;
        // Checked against the streak before incrementing; monotonic once set.
        if quality == MAX_QUALITY && current.repetitions > LEARNED_MIN_STREAK {
            next.learned = true;
        }
        reward_points = REWARD_BASE_POINTS + quality;
    } else {
        next.repetitions = 0;
        next.interval_days = 1;
        reward_points = 0;
    }

    next.last_reviewed_at = Some(now);
    next.next_review_at = Some(now + Duration::days(i64::from(next.interval_days)));
    next.version = current.version + 1;

    Ok(ReviewOutcome {
        next,
        reward_points,
    })
}

fn next_ease_factor(ease: f64, quality: i32) -> f64 {
    let miss = f64::from(MAX_QUALITY - quality);
    let updated = ease + (0.1 - miss * (0.08 + miss * 0.02));
    updated.max(MIN_EASE_FACTOR)
}
