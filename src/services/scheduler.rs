//! Durable deferred execution for deadline-driven auto submits. Tasks
//! are persisted through the `TaskStore` seam, so the schedule survives
//! process restarts; the worker polls for due tasks on a fixed tick and
//! dispatches them to registered handlers. Over-firing is harmless:
//! the finalize guard makes a stale task a guaranteed no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::metrics::SCHEDULER_TICKS_TOTAL;
use crate::models::FinalizeTrigger;
use crate::services::attempts::AttemptManager;
use crate::store::{ScheduledTask, TaskStore};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

pub const AUTO_SUBMIT_TASK: &str = "quiz.auto_submit";

/// Handler invocations per task before it is abandoned.
const MAX_TASK_ATTEMPTS: i32 = 5;
/// Delay before a failed task is offered again.
const RETRY_DELAY_SECS: i64 = 30;

#[derive(Debug, Serialize, Deserialize)]
pub struct AutoSubmitPayload {
    pub quiz_id: String,
    pub student_id: String,
}

/// Schedule-side handle. Persisting the task row is the whole contract;
/// no in-process state is required for durability.
pub struct Scheduler {
    tasks: Arc<dyn TaskStore>,
}

impl Scheduler {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self { tasks }
    }

    pub async fn schedule(
        &self,
        run_at: DateTime<Utc>,
        task_name: &str,
        payload: serde_json::Value,
    ) -> Result<(), ApiError> {
        let task = ScheduledTask::new(task_name, payload, run_at);
        retry_async_with_config(RetryConfig::default(), || async {
            self.tasks.insert(&task).await
        })
        .await?;
        tracing::debug!(task = task_name, run_at = %run_at, "Deferred task scheduled");
        Ok(())
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: serde_json::Value) -> Result<()>;
}

/// Polling worker. Each tick claims every due task (atomically, so a
/// task fires at most once) and hands it to the handler registered for
/// its name.
pub struct SchedulerWorker {
    tasks: Arc<dyn TaskStore>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    tick: Duration,
}

impl SchedulerWorker {
    pub fn new(tasks: Arc<dyn TaskStore>, tick: Duration) -> Self {
        Self {
            tasks,
            handlers: HashMap::new(),
            tick,
        }
    }

    pub fn register(mut self, task_name: &str, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_name.to_string(), handler);
        self
    }

    pub async fn run(&self) {
        info!(tick_secs = self.tick.as_secs(), "Starting scheduler worker loop");
        loop {
            match self.run_once().await {
                Ok(dispatched) => {
                    SCHEDULER_TICKS_TOTAL.with_label_values(&["success"]).inc();
                    if dispatched > 0 {
                        info!(dispatched, "Scheduler tick dispatched tasks");
                    }
                }
                Err(err) => {
                    SCHEDULER_TICKS_TOTAL.with_label_values(&["error"]).inc();
                    warn!(error = %err, "Scheduler tick failed");
                }
            }
            sleep(self.tick).await;
        }
    }

    /// Drain everything currently due. A failed handler does not abort
    /// the tick; its task is requeued with a delay so a transient
    /// failure cannot lose a deadline.
    pub async fn run_once(&self) -> Result<usize> {
        let mut dispatched = 0usize;
        while let Some(task) = retry_async_with_config(RetryConfig::default(), || async {
            self.tasks.claim_due(Utc::now()).await
        })
        .await?
        {
            match self.handlers.get(&task.task_name) {
                Some(handler) => {
                    if let Err(err) = handler.handle(task.payload.clone()).await {
                        warn!(
                            task = %task.task_name,
                            task_id = %task.id,
                            attempt = task.attempts,
                            error = %err,
                            "Deferred task handler failed"
                        );
                        self.retry_later(&task).await;
                    }
                    dispatched += 1;
                }
                None => warn!(task = %task.task_name, "No handler registered for task"),
            }
        }
        Ok(dispatched)
    }

    async fn retry_later(&self, task: &ScheduledTask) {
        if task.attempts >= MAX_TASK_ATTEMPTS {
            error!(
                task = %task.task_name,
                task_id = %task.id,
                attempts = task.attempts,
                "Task exhausted its retry budget; giving up"
            );
            return;
        }
        let run_at = Utc::now() + chrono::Duration::seconds(RETRY_DELAY_SECS);
        if let Err(err) = self.tasks.requeue(&task.id, run_at).await {
            warn!(task_id = %task.id, error = %err, "Failed to requeue task");
        }
    }
}

/// Handler for the auto-submit deadline task. Re-checks submission
/// state through the finalize guard, so firing after a manual submit or
/// firing late is harmless.
pub struct AutoSubmitHandler {
    manager: Arc<AttemptManager>,
}

impl AutoSubmitHandler {
    pub fn new(manager: Arc<AttemptManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl TaskHandler for AutoSubmitHandler {
    async fn handle(&self, payload: serde_json::Value) -> Result<()> {
        let payload: AutoSubmitPayload = serde_json::from_value(payload)?;
        match self
            .manager
            .finalize_by_id(&payload.quiz_id, &payload.student_id, FinalizeTrigger::Auto)
            .await
        {
            Ok(_) => Ok(()),
            // Racing with a manual submit is expected; a vanished quiz
            // or attempt just means there is nothing left to do.
            Err(ApiError::InvalidState(_)) | Err(ApiError::NotFound(_)) => Ok(()),
            Err(err) => Err(anyhow::anyhow!(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AnswerValue, Question, QuestionKind, Quiz, SubmissionStatus, Targeting,
    };
    use crate::services::events::EventPublisher;
    use crate::services::ranking::RankingService;
    use crate::store::{
        MemoryQuizStore, MemorySubmissionStore, MemoryTaskStore, QuizStore, ScheduledTask,
        SubmissionStore, TaskStore,
    };
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap as StdHashMap;

    struct Fixture {
        manager: Arc<AttemptManager>,
        scheduler: Arc<Scheduler>,
        tasks: Arc<MemoryTaskStore>,
        quizzes: Arc<MemoryQuizStore>,
        submissions: Arc<MemorySubmissionStore>,
    }

    fn fixture() -> Fixture {
        let quizzes = Arc::new(MemoryQuizStore::new());
        let submissions = Arc::new(MemorySubmissionStore::new());
        let tasks = Arc::new(MemoryTaskStore::new());
        let scheduler = Arc::new(Scheduler::new(tasks.clone()));
        let ranking = Arc::new(RankingService::new(
            submissions.clone() as Arc<dyn SubmissionStore>,
            None,
            30,
        ));
        let manager = Arc::new(AttemptManager::new(
            quizzes.clone(),
            submissions.clone(),
            scheduler.clone(),
            ranking,
            EventPublisher::default(),
        ));
        Fixture {
            manager,
            scheduler,
            tasks,
            quizzes,
            submissions,
        }
    }

    fn timed_quiz() -> Quiz {
        Quiz {
            id: "quiz-1".into(),
            owner_id: "teacher-1".into(),
            title: "Quiz".into(),
            due_date: Utc::now() + ChronoDuration::days(1),
            time_limit_minutes: Some(10),
            questions: vec![Question {
                id: "mc".into(),
                prompt: "pick one".into(),
                kind: QuestionKind::MultipleChoice,
                points: 2,
                options: vec!["A".into(), "B".into()],
                correct_answer: Some("B".into()),
                correct_answers: None,
            }],
            targeting: Targeting {
                grades: vec![7],
                ..Targeting::default()
            },
            created_at: Utc::now(),
        }
    }

    fn worker(fx: &Fixture) -> SchedulerWorker {
        SchedulerWorker::new(fx.tasks.clone(), Duration::from_secs(5)).register(
            AUTO_SUBMIT_TASK,
            Arc::new(AutoSubmitHandler::new(fx.manager.clone())),
        )
    }

    async fn start_attempt_with_past_deadline(fx: &Fixture, quiz: &Quiz) {
        fx.quizzes.insert(quiz).await.unwrap();
        fx.manager
            .get_or_create_attempt(quiz, "student-1")
            .await
            .unwrap();
        // Re-point the task into the past so the next tick claims it.
        let payload = AutoSubmitPayload {
            quiz_id: quiz.id.clone(),
            student_id: "student-1".into(),
        };
        fx.tasks.claim_due(Utc::now() + ChronoDuration::hours(1)).await.unwrap();
        fx.scheduler
            .schedule(
                Utc::now() - ChronoDuration::minutes(1),
                AUTO_SUBMIT_TASK,
                serde_json::to_value(&payload).unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn due_task_auto_finalizes_with_last_autosaved_answers() {
        let fx = fixture();
        let quiz = timed_quiz();
        start_attempt_with_past_deadline(&fx, &quiz).await;

        let mut answer_map = StdHashMap::new();
        answer_map.insert("mc".to_string(), AnswerValue::Text("B".into()));
        fx.manager
            .save_answers(&quiz, "student-1", &answer_map)
            .await
            .unwrap();

        let dispatched = worker(&fx).run_once().await.unwrap();
        assert_eq!(dispatched, 1);

        let submission = fx
            .submissions
            .get("quiz-1", "student-1")
            .await
            .unwrap()
            .unwrap();
        assert!(submission.auto_submitted);
        assert_eq!(submission.score, 2);
        assert_eq!(submission.status, SubmissionStatus::Graded);
    }

    #[tokio::test]
    async fn stale_task_after_manual_submit_is_a_no_op() {
        let fx = fixture();
        let quiz = timed_quiz();
        start_attempt_with_past_deadline(&fx, &quiz).await;

        let manual = fx
            .manager
            .finalize(&quiz, "student-1", FinalizeTrigger::Manual)
            .await
            .unwrap();

        let dispatched = worker(&fx).run_once().await.unwrap();
        assert_eq!(dispatched, 1);

        let submission = fx
            .submissions
            .get("quiz-1", "student-1")
            .await
            .unwrap()
            .unwrap();
        assert!(!submission.auto_submitted);
        assert_eq!(submission.submitted_at, manual.submitted_at);
        assert_eq!(submission.score, manual.score);
    }

    #[tokio::test]
    async fn future_task_is_not_dispatched() {
        let fx = fixture();
        let quiz = timed_quiz();
        fx.quizzes.insert(&quiz).await.unwrap();
        fx.manager
            .get_or_create_attempt(&quiz, "student-1")
            .await
            .unwrap();

        let dispatched = worker(&fx).run_once().await.unwrap();
        assert_eq!(dispatched, 0);

        let submission = fx
            .submissions
            .get("quiz-1", "student-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.status, SubmissionStatus::InProgress);
    }

    struct FailingHandler;

    #[async_trait]
    impl TaskHandler for FailingHandler {
        async fn handle(&self, _payload: serde_json::Value) -> Result<()> {
            Err(anyhow::anyhow!("transient store error"))
        }
    }

    #[tokio::test]
    async fn failed_handler_requeues_task_for_retry() {
        let fx = fixture();
        fx.scheduler
            .schedule(
                Utc::now() - ChronoDuration::minutes(1),
                AUTO_SUBMIT_TASK,
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let worker = SchedulerWorker::new(fx.tasks.clone(), Duration::from_secs(5))
            .register(AUTO_SUBMIT_TASK, Arc::new(FailingHandler));
        worker.run_once().await.unwrap();

        // The task is pending again, offered after the retry delay.
        assert_eq!(fx.tasks.pending_count().await, 1);
        let retried = fx
            .tasks
            .claim_due(Utc::now() + ChronoDuration::minutes(5))
            .await
            .unwrap()
            .expect("task should be claimable again");
        assert_eq!(retried.attempts, 2);
    }

    #[tokio::test]
    async fn task_retries_stop_at_the_attempt_cap() {
        let fx = fixture();
        let mut task = ScheduledTask::new(
            AUTO_SUBMIT_TASK,
            serde_json::json!({}),
            Utc::now() - ChronoDuration::minutes(1),
        );
        task.attempts = 4; // the claim below makes it the fifth
        fx.tasks.insert(&task).await.unwrap();

        let worker = SchedulerWorker::new(fx.tasks.clone(), Duration::from_secs(5))
            .register(AUTO_SUBMIT_TASK, Arc::new(FailingHandler));
        worker.run_once().await.unwrap();

        assert_eq!(fx.tasks.pending_count().await, 0);
    }

    #[tokio::test]
    async fn task_for_missing_quiz_is_absorbed() {
        let fx = fixture();
        let payload = AutoSubmitPayload {
            quiz_id: "ghost".into(),
            student_id: "student-1".into(),
        };
        fx.scheduler
            .schedule(
                Utc::now() - ChronoDuration::minutes(1),
                AUTO_SUBMIT_TASK,
                serde_json::to_value(&payload).unwrap(),
            )
            .await
            .unwrap();

        let dispatched = worker(&fx).run_once().await.unwrap();
        assert_eq!(dispatched, 1);
    }
}
