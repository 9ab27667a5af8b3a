//! Due-set assembly: the ordered study queue and its counts.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::CardRef;
use crate::store::ProgressStore;

/// Assemble the learner's study queue at `now`: due records first, ordered
/// ascending by scheduled time with a stable creation-order tie-break, then
/// never-reviewed curriculum cards in assignment order. The two groups are
/// concatenated, never interleaved, and no card appears twice (a card either
/// has a progress row or it doesn't).
///
/// Reads are not snapshot-isolated: a record committed while the scans run
/// may or may not appear in this queue.
pub async fn build_queue(
    store: &dyn ProgressStore,
    learner_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<CardRef>, EngineError> {
    ensure_learner(store, learner_id).await?;

    let due = store.scan_due(learner_id, now).await?;
    let fresh = store.scan_never_reviewed(learner_id).await?;

    let mut queue = Vec::with_capacity(due.len() + fresh.len());
    queue.extend(due.into_iter().map(|progress| CardRef::new(progress.card_id)));
    queue.extend(fresh);
    Ok(queue)
}

/// Count of cards the learner should study at `now`: due progress rows plus
/// never-reviewed curriculum cards, via the count-only store paths.
pub async fn count_due(
    store: &dyn ProgressStore,
    learner_id: Uuid,
    now: DateTime<Utc>,
) -> Result<i64, EngineError> {
    ensure_learner(store, learner_id).await?;

    let due = store.count_due(learner_id, now).await?;
    let fresh = store.count_never_reviewed(learner_id).await?;
    Ok(due + fresh)
}

pub(crate) async fn ensure_learner(
    store: &dyn ProgressStore,
    learner_id: Uuid,
) -> Result<(), EngineError> {
    if store.learner_exists(learner_id).await? {
        Ok(())
    } else {
        Err(EngineError::NotFound(format!("unknown learner {learner_id}")))
    }
}
