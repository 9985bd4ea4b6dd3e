//! Leaderboard over finalized attempts. Ordering is deterministic:
//! score descending, ties broken by started_at ascending, then student
//! id. Results are cached in Redis with a short TTL and invalidated on
//! finalize/grade.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::metrics::{record_cache_hit, record_cache_miss};
use crate::models::{Submission, SubmissionStatus};
use crate::store::SubmissionStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub position: u32,
    pub student_id: String,
    pub score: i32,
}

pub struct RankingService {
    submissions: Arc<dyn SubmissionStore>,
    redis: Option<ConnectionManager>,
    cache_ttl_secs: u64,
}

impl RankingService {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        redis: Option<ConnectionManager>,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            submissions,
            redis,
            cache_ttl_secs,
        }
    }

    /// Order the finalized submissions of a quiz. In-progress attempts
    /// are excluded; output is stable for a fixed input set.
    pub fn rank_submissions(submissions: &[Submission]) -> Vec<LeaderboardEntry> {
        let mut finalized: Vec<&Submission> = submissions
            .iter()
            .filter(|s| {
                matches!(
                    s.status,
                    SubmissionStatus::Submitted | SubmissionStatus::Graded
                )
            })
            .collect();

        finalized.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.started_at.cmp(&b.started_at))
                .then_with(|| a.student_id.cmp(&b.student_id))
        });

        finalized
            .into_iter()
            .enumerate()
            .map(|(idx, submission)| LeaderboardEntry {
                position: (idx + 1) as u32,
                student_id: submission.student_id.clone(),
                score: submission.score,
            })
            .collect()
    }

    pub async fn rank(&self, quiz_id: &str) -> Result<Vec<LeaderboardEntry>, ApiError> {
        if let Some(cached) = self.read_cache(quiz_id).await {
            record_cache_hit();
            return Ok(cached);
        }
        record_cache_miss();

        let submissions = self.submissions.list_for_quiz(quiz_id).await?;
        let entries = Self::rank_submissions(&submissions);
        self.write_cache(quiz_id, &entries).await;
        Ok(entries)
    }

    /// Drop the cached leaderboard after a finalize or manual grade.
    pub async fn invalidate(&self, quiz_id: &str) {
        let Some(redis) = &self.redis else {
            return;
        };
        let mut conn = redis.clone();
        if let Err(e) = redis::cmd("DEL")
            .arg(cache_key(quiz_id))
            .query_async::<()>(&mut conn)
            .await
        {
            tracing::warn!(quiz_id, error = %e, "Failed to invalidate leaderboard cache");
        }
    }

    async fn read_cache(&self, quiz_id: &str) -> Option<Vec<LeaderboardEntry>> {
        let redis = self.redis.as_ref()?;
        let mut conn = redis.clone();
        let cached: Option<String> = redis::cmd("GET")
            .arg(cache_key(quiz_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| tracing::warn!(quiz_id, error = %e, "Leaderboard cache read failed"))
            .ok()?;
        serde_json::from_str(&cached?).ok()
    }

    async fn write_cache(&self, quiz_id: &str, entries: &[LeaderboardEntry]) {
        let Some(redis) = &self.redis else {
            return;
        };
        let Ok(json) = serde_json::to_string(entries) else {
            return;
        };
        let mut conn = redis.clone();
        if let Err(e) = redis::cmd("SETEX")
            .arg(cache_key(quiz_id))
            .arg(self.cache_ttl_secs)
            .arg(json)
            .query_async::<()>(&mut conn)
            .await
        {
            tracing::warn!(quiz_id, error = %e, "Leaderboard cache write failed");
        }
    }
}

fn cache_key(quiz_id: &str) -> String {
    format!("quiz:leaderboard:{}", quiz_id)
}
