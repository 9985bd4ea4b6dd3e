use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FinalizeUpdate, GradeUpdate, Quiz, Submission};

pub mod memory;
pub mod mongo;

pub use memory::{MemoryQuizStore, MemorySubmissionStore, MemoryTaskStore};
pub use mongo::{MongoQuizStore, MongoSubmissionStore, MongoTaskStore};

pub type StoreResult<T> = anyhow::Result<T>;

#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn insert(&self, quiz: &Quiz) -> StoreResult<()>;
    async fn get(&self, quiz_id: &str) -> StoreResult<Option<Quiz>>;
    /// All quizzes, newest first. Eligibility filtering happens above
    /// this layer.
    async fn list(&self) -> StoreResult<Vec<Quiz>>;
}

/// Narrow persistence seam for attempts. Implementations must provide
/// the atomic operations the lifecycle relies on: find-or-insert keyed
/// by (quiz_id, student_id) and single conditional field transitions.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Atomic find-or-insert. Returns the submission plus whether this
    /// call created it. Safe under concurrent calls for the same pair;
    /// never produces two submissions for one (quiz, student).
    async fn find_or_create(&self, candidate: Submission) -> StoreResult<(Submission, bool)>;

    async fn get(&self, quiz_id: &str, student_id: &str) -> StoreResult<Option<Submission>>;

    /// Overwrite the working answer set, only while status is
    /// in-progress. Returns None when the guard did not match.
    async fn save_answers(
        &self,
        quiz_id: &str,
        student_id: &str,
        answers: &[crate::models::AnswerDetail],
    ) -> StoreResult<Option<Submission>>;

    /// The finalize transition: set answers/score/status/submitted_at
    /// and auto_submitted in one write, guarded by `submitted_at` still
    /// being null. Exactly one racing caller gets Some; the loser gets
    /// None and must re-read the already-final record.
    async fn finalize(
        &self,
        quiz_id: &str,
        student_id: &str,
        update: FinalizeUpdate,
    ) -> StoreResult<Option<Submission>>;

    /// Replace answers/score/status from the manual-grading flow,
    /// guarded by the submission already being finalized.
    async fn apply_grades(
        &self,
        quiz_id: &str,
        student_id: &str,
        update: GradeUpdate,
    ) -> StoreResult<Option<Submission>>;

    async fn list_for_quiz(&self, quiz_id: &str) -> StoreResult<Vec<Submission>>;

    /// In-progress timed attempts whose deadline has elapsed. Feeds the
    /// restart catch-up sweep.
    async fn list_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<Submission>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Done,
}

/// A durable deferred task. Rows survive process restarts; the worker
/// claims due rows atomically so each fires at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    #[serde(rename = "_id")]
    pub id: String,
    pub task_name: String,
    pub payload: serde_json::Value,
    pub run_at_ms: i64,
    pub status: TaskStatus,
    /// Times this task has been claimed. Incremented on claim; lets the
    /// worker cap retries of a failing handler.
    #[serde(default)]
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn new(task_name: &str, payload: serde_json::Value, run_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_name: task_name.to_string(),
            payload,
            run_at_ms: run_at.timestamp_millis(),
            status: TaskStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &ScheduledTask) -> StoreResult<()>;

    /// Atomically claim one due pending task (pending -> done,
    /// attempts += 1). Returns None when nothing is due. Called in a
    /// loop by the worker tick.
    async fn claim_due(&self, now: DateTime<Utc>) -> StoreResult<Option<ScheduledTask>>;

    /// Flip a claimed task back to pending at a later run time, so a
    /// failed handler gets another shot.
    async fn requeue(&self, task_id: &str, run_at: DateTime<Utc>) -> StoreResult<()>;
}
