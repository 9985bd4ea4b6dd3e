//! In-memory store implementations. They back the test suite and honor
//! the same atomic-conditional contract as the Mongo implementations:
//! every guarded transition happens under one lock acquisition.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::{
    AnswerDetail, FinalizeUpdate, GradeUpdate, Quiz, Submission, SubmissionStatus,
};

use super::{QuizStore, ScheduledTask, StoreResult, SubmissionStore, TaskStatus, TaskStore};

#[derive(Default)]
pub struct MemoryQuizStore {
    quizzes: Mutex<Vec<Quiz>>,
}

impl MemoryQuizStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuizStore for MemoryQuizStore {
    async fn insert(&self, quiz: &Quiz) -> StoreResult<()> {
        self.quizzes.lock().await.push(quiz.clone());
        Ok(())
    }

    async fn get(&self, quiz_id: &str) -> StoreResult<Option<Quiz>> {
        Ok(self
            .quizzes
            .lock()
            .await
            .iter()
            .find(|q| q.id == quiz_id)
            .cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Quiz>> {
        let mut quizzes = self.quizzes.lock().await.clone();
        quizzes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(quizzes)
    }
}

#[derive(Default)]
pub struct MemorySubmissionStore {
    // Keyed by (quiz_id, student_id): one attempt per pair by construction.
    submissions: Mutex<HashMap<(String, String), Submission>>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn find_or_create(&self, candidate: Submission) -> StoreResult<(Submission, bool)> {
        let mut submissions = self.submissions.lock().await;
        let key = (candidate.quiz_id.clone(), candidate.student_id.clone());
        if let Some(existing) = submissions.get(&key) {
            return Ok((existing.clone(), false));
        }
        submissions.insert(key, candidate.clone());
        Ok((candidate, true))
    }

    async fn get(&self, quiz_id: &str, student_id: &str) -> StoreResult<Option<Submission>> {
        let submissions = self.submissions.lock().await;
        Ok(submissions
            .get(&(quiz_id.to_string(), student_id.to_string()))
            .cloned())
    }

    async fn save_answers(
        &self,
        quiz_id: &str,
        student_id: &str,
        answers: &[AnswerDetail],
    ) -> StoreResult<Option<Submission>> {
        let mut submissions = self.submissions.lock().await;
        let key = (quiz_id.to_string(), student_id.to_string());
        match submissions.get_mut(&key) {
            Some(submission) if submission.status == SubmissionStatus::InProgress => {
                submission.answers = answers.to_vec();
                Ok(Some(submission.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn finalize(
        &self,
        quiz_id: &str,
        student_id: &str,
        update: FinalizeUpdate,
    ) -> StoreResult<Option<Submission>> {
        let mut submissions = self.submissions.lock().await;
        let key = (quiz_id.to_string(), student_id.to_string());
        match submissions.get_mut(&key) {
            Some(submission) if submission.submitted_at.is_none() => {
                submission.answers = update.answers;
                submission.score = update.score;
                submission.status = update.status;
                submission.submitted_at = Some(update.submitted_at);
                submission.auto_submitted = update.auto_submitted;
                Ok(Some(submission.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn apply_grades(
        &self,
        quiz_id: &str,
        student_id: &str,
        update: GradeUpdate,
    ) -> StoreResult<Option<Submission>> {
        let mut submissions = self.submissions.lock().await;
        let key = (quiz_id.to_string(), student_id.to_string());
        match submissions.get_mut(&key) {
            Some(submission) if submission.status != SubmissionStatus::InProgress => {
                submission.answers = update.answers;
                submission.score = update.score;
                submission.status = update.status;
                Ok(Some(submission.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_for_quiz(&self, quiz_id: &str) -> StoreResult<Vec<Submission>> {
        let submissions = self.submissions.lock().await;
        Ok(submissions
            .values()
            .filter(|s| s.quiz_id == quiz_id)
            .cloned()
            .collect())
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<Submission>> {
        let submissions = self.submissions.lock().await;
        Ok(submissions
            .values()
            .filter(|s| {
                s.status == SubmissionStatus::InProgress
                    && s.deadline_ms
                        .is_some_and(|deadline| deadline <= now.timestamp_millis())
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pending_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &ScheduledTask) -> StoreResult<()> {
        self.tasks.lock().await.push(task.clone());
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> StoreResult<Option<ScheduledTask>> {
        let mut tasks = self.tasks.lock().await;
        let due = tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::Pending && t.run_at_ms <= now.timestamp_millis())
            .min_by_key(|t| t.run_at_ms);
        match due {
            Some(task) => {
                task.status = TaskStatus::Done;
                task.attempts += 1;
                Ok(Some(task.clone()))
            }
            None => Ok(None),
        }
    }

    async fn requeue(&self, task_id: &str, run_at: DateTime<Utc>) -> StoreResult<()> {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::Pending;
            task.run_at_ms = run_at.timestamp_millis();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission(quiz_id: &str, student_id: &str) -> Submission {
        Submission {
            id: uuid::Uuid::new_v4().to_string(),
            quiz_id: quiz_id.to_string(),
            student_id: student_id.to_string(),
            answers: vec![],
            score: 0,
            status: SubmissionStatus::InProgress,
            started_at: Utc::now(),
            submitted_at: None,
            auto_submitted: false,
            question_order: vec![],
            deadline_ms: None,
        }
    }

    #[tokio::test]
    async fn find_or_create_returns_existing_for_same_pair() {
        let store = MemorySubmissionStore::new();
        let (first, created) = store.find_or_create(submission("q", "s")).await.unwrap();
        assert!(created);

        let (second, created) = store.find_or_create(submission("q", "s")).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn finalize_guard_rejects_second_transition() {
        let store = MemorySubmissionStore::new();
        store.find_or_create(submission("q", "s")).await.unwrap();

        let update = FinalizeUpdate {
            answers: vec![],
            score: 3,
            status: SubmissionStatus::Graded,
            submitted_at: Utc::now(),
            auto_submitted: false,
        };
        assert!(store.finalize("q", "s", update.clone()).await.unwrap().is_some());
        assert!(store.finalize("q", "s", update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_due_skips_future_tasks() {
        let store = MemoryTaskStore::new();
        let now = Utc::now();
        store
            .insert(&ScheduledTask::new(
                "quiz.auto_submit",
                json!({}),
                now + chrono::Duration::minutes(5),
            ))
            .await
            .unwrap();

        assert!(store.claim_due(now).await.unwrap().is_none());
        let later = now + chrono::Duration::minutes(6);
        assert!(store.claim_due(later).await.unwrap().is_some());
        // claimed once, never again
        assert!(store.claim_due(later).await.unwrap().is_none());
    }
}
