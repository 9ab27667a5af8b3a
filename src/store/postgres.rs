//! Postgres-backed `ProgressStore`.
//!
//! The versioned upsert is a single statement, so a submission that times
//! out either committed fully or not at all. A racing writer whose version
//! is stale updates zero rows and surfaces as `Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{CardRef, FlashcardProgress, ProgressStats};
use crate::store::ProgressStore;

const PROGRESS_COLUMNS: &str = r#"
    "learnerId","cardId","easeFactor","repetitions","intervalDays",
    "lastReviewedAt","nextReviewAt","learned","version"
"#;

#[derive(Clone)]
pub struct PgProgressStore {
    pool: PgPool,
}

impl PgProgressStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations, tracked in a `_migrations` table.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS "_migrations" (
                "id" SERIAL PRIMARY KEY,
                "name" TEXT NOT NULL UNIQUE,
                "appliedAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let applied: Vec<String> =
            sqlx::query_scalar(r#"SELECT "name" FROM "_migrations" ORDER BY "id""#)
                .fetch_all(&self.pool)
                .await?;

        let migrations = [("001_init_schema", include_str!("../../sql/001_init_schema.sql"))];

        for (name, sql) in migrations {
            if applied.iter().any(|a| a == name) {
                continue;
            }
            tracing::info!(migration = name, "applying schema migration");
            let mut tx = self.pool.begin().await?;
            // Raw execute: migration files may hold multiple statements.
            (&mut *tx).execute(sql).await?;
            sqlx::query(r#"INSERT INTO "_migrations" ("name") VALUES ($1)"#)
                .bind(name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for PgProgressStore {
    async fn get(
        &self,
        learner_id: Uuid,
        card_id: Uuid,
    ) -> Result<Option<FlashcardProgress>, StoreError> {
        let query = format!(
            r#"
            SELECT {PROGRESS_COLUMNS}
            FROM "flashcard_progress"
            WHERE "learnerId" = $1 AND "cardId" = $2
            LIMIT 1
            "#
        );
        let row = sqlx::query(&query)
            .bind(learner_id)
            .bind(card_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| map_progress_row(&row)).transpose()
    }

    async fn upsert(&self, progress: &FlashcardProgress) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO "flashcard_progress"
              ("learnerId","cardId","easeFactor","repetitions","intervalDays",
               "lastReviewedAt","nextReviewAt","learned","version","updatedAt")
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,NOW())
            ON CONFLICT ("learnerId","cardId") DO UPDATE SET
              "easeFactor" = EXCLUDED."easeFactor",
              "repetitions" = EXCLUDED."repetitions",
              "intervalDays" = EXCLUDED."intervalDays",
              "lastReviewedAt" = EXCLUDED."lastReviewedAt",
              "nextReviewAt" = EXCLUDED."nextReviewAt",
              "learned" = EXCLUDED."learned",
              "version" = EXCLUDED."version",
              "updatedAt" = NOW()
            WHERE "flashcard_progress"."version" = EXCLUDED."version" - 1
            "#,
        )
        .bind(progress.learner_id)
        .bind(progress.card_id)
        .bind(progress.ease_factor)
        .bind(progress.repetitions)
        .bind(progress.interval_days)
        .bind(progress.last_reviewed_at)
        .bind(progress.next_review_at)
        .bind(progress.learned)
        .bind(progress.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                learner_id: progress.learner_id,
                card_id: progress.card_id,
            });
        }
        Ok(())
    }

    async fn scan_due(
        &self,
        learner_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Vec<FlashcardProgress>, StoreError> {
        let query = format!(
            r#"
            SELECT {PROGRESS_COLUMNS}
            FROM "flashcard_progress"
            WHERE "learnerId" = $1
              AND "nextReviewAt" IS NOT NULL
              AND "nextReviewAt" <= $2
            ORDER BY "nextReviewAt" ASC, "seq" ASC
            "#
        );
        let rows = sqlx::query(&query)
            .bind(learner_id)
            .bind(before)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_progress_row).collect()
    }

    async fn scan_never_reviewed(&self, learner_id: Uuid) -> Result<Vec<CardRef>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT cc."cardId"
            FROM "curriculum_cards" cc
            LEFT JOIN "flashcard_progress" fp
              ON fp."learnerId" = cc."learnerId" AND fp."cardId" = cc."cardId"
            WHERE cc."learnerId" = $1
              AND fp."cardId" IS NULL
            ORDER BY cc."createdAt" ASC, cc."cardId" ASC
            "#,
        )
        .bind(learner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(CardRef::new(row.try_get("cardId")?)))
            .collect()
    }

    async fn count_due(&self, learner_id: Uuid, before: DateTime<Utc>) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)::bigint
            FROM "flashcard_progress"
            WHERE "learnerId" = $1
              AND "nextReviewAt" IS NOT NULL
              AND "nextReviewAt" <= $2
            "#,
        )
        .bind(learner_id)
        .bind(before)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_never_reviewed(&self, learner_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)::bigint
            FROM "curriculum_cards" cc
            LEFT JOIN "flashcard_progress" fp
              ON fp."learnerId" = cc."learnerId" AND fp."cardId" = cc."cardId"
            WHERE cc."learnerId" = $1
              AND fp."cardId" IS NULL
            "#,
        )
        .bind(learner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn learner_exists(&self, learner_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS(SELECT 1 FROM "learners" WHERE "id" = $1)"#)
                .bind(learner_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn card_assigned(&self, learner_id: Uuid, card_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM "curriculum_cards"
                WHERE "learnerId" = $1 AND "cardId" = $2
            )
            "#,
        )
        .bind(learner_id)
        .bind(card_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn stats(
        &self,
        learner_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProgressStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
              COUNT(*)::bigint AS "total",
              COALESCE(SUM(CASE WHEN "repetitions" < 2 THEN 1 ELSE 0 END), 0)::bigint AS "learning",
              COALESCE(SUM(CASE WHEN "repetitions" >= 2 THEN 1 ELSE 0 END), 0)::bigint AS "reviewing",
              COALESCE(SUM(CASE WHEN "learned" THEN 1 ELSE 0 END), 0)::bigint AS "learned",
              COALESCE(SUM(CASE WHEN "nextReviewAt" IS NOT NULL AND "nextReviewAt" <= $2
                  THEN 1 ELSE 0 END), 0)::bigint AS "due",
              COALESCE(AVG(LEAST(1.0, GREATEST(0.0, ("easeFactor" - 1.3) / 1.2))), 0)
                  AS "easeNorm"
            FROM "flashcard_progress"
            WHERE "learnerId" = $1
            "#,
        )
        .bind(learner_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let ease_norm: f64 = row.try_get("easeNorm")?;
        Ok(ProgressStats {
            total,
            new_cards: 0,
            learning: row.try_get("learning")?,
            reviewing: row.try_get("reviewing")?,
            learned: row.try_get("learned")?,
            due: row.try_get("due")?,
            mastery_score: if total > 0 {
                (ease_norm * 100.0).round() as i32
            } else {
                0
            },
        })
    }
}

fn map_progress_row(row: &PgRow) -> Result<FlashcardProgress, StoreError> {
    Ok(FlashcardProgress {
        learner_id: row.try_get("learnerId")?,
        card_id: row.try_get("cardId")?,
        ease_factor: row.try_get("easeFactor")?,
        repetitions: row.try_get("repetitions")?,
        interval_days: row.try_get("intervalDays")?,
        last_reviewed_at: row.try_get("lastReviewedAt")?,
        next_review_at: row.try_get("nextReviewAt")?,
        learned: row.try_get("learned")?,
        version: row.try_get("version")?,
    })
}
