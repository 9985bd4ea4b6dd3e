//! Attempt lifecycle: lazy creation, answer autosave, and the
//! exactly-once finalize transition shared by the student's manual
//! submit and the scheduler's auto submit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics::{record_attempt_started, record_finalize};
use crate::models::{
    AnswerDetail, AnswerValue, Correctness, FinalizeTrigger, FinalizeUpdate, GradeUpdate,
    Question, QuestionKind, Quiz, Submission, SubmissionStatus,
};
use crate::services::events::{DomainEvent, EventPublisher};
use crate::services::grading;
use crate::services::ranking::RankingService;
use crate::services::scheduler::{AutoSubmitPayload, Scheduler, AUTO_SUBMIT_TASK};
use crate::store::{QuizStore, SubmissionStore};

#[derive(Debug, Clone, Deserialize)]
pub struct ManualGrade {
    pub question_id: String,
    pub points_awarded: i32,
}

pub struct AttemptManager {
    quizzes: Arc<dyn QuizStore>,
    submissions: Arc<dyn SubmissionStore>,
    scheduler: Arc<Scheduler>,
    ranking: Arc<RankingService>,
    events: EventPublisher,
}

impl AttemptManager {
    pub fn new(
        quizzes: Arc<dyn QuizStore>,
        submissions: Arc<dyn SubmissionStore>,
        scheduler: Arc<Scheduler>,
        ranking: Arc<RankingService>,
        events: EventPublisher,
    ) -> Self {
        Self {
            quizzes,
            submissions,
            scheduler,
            ranking,
            events,
        }
    }

    /// Atomically find or create the student's attempt. Creation fixes
    /// the per-student question order and, for timed quizzes, persists
    /// the deadline and arms the auto-submit task.
    pub async fn get_or_create_attempt(
        &self,
        quiz: &Quiz,
        student_id: &str,
    ) -> Result<(Submission, bool), ApiError> {
        let started_at = Utc::now();
        let deadline = quiz
            .time_limit_minutes
            .map(|minutes| started_at + Duration::minutes(minutes));

        let mut question_order: Vec<String> =
            quiz.questions.iter().map(|q| q.id.clone()).collect();
        question_order.shuffle(&mut rand::rng());

        let candidate = Submission {
            id: Uuid::new_v4().to_string(),
            quiz_id: quiz.id.clone(),
            student_id: student_id.to_string(),
            answers: vec![],
            score: 0,
            status: SubmissionStatus::InProgress,
            started_at,
            submitted_at: None,
            auto_submitted: false,
            question_order,
            deadline_ms: deadline.map(|d| d.timestamp_millis()),
        };

        let (submission, created) = self.submissions.find_or_create(candidate).await?;
        if !created {
            return Ok((submission, false));
        }

        record_attempt_started(deadline.is_some());
        tracing::info!(
            quiz_id = %quiz.id,
            student_id = %student_id,
            timed = deadline.is_some(),
            "Attempt created"
        );

        if let Some(run_at) = submission.deadline() {
            let payload = AutoSubmitPayload {
                quiz_id: quiz.id.clone(),
                student_id: student_id.to_string(),
            };
            self.scheduler
                .schedule(run_at, AUTO_SUBMIT_TASK, serde_json::to_value(&payload)?)
                .await?;
        }

        Ok((submission, true))
    }

    /// Overwrite the working answer set (last write wins). Correctness
    /// is not computed here; grading is deferred to finalize.
    pub async fn save_answers(
        &self,
        quiz: &Quiz,
        student_id: &str,
        answer_map: &HashMap<String, AnswerValue>,
    ) -> Result<Submission, ApiError> {
        let answers = build_answer_details(quiz, answer_map)?;

        match self
            .submissions
            .save_answers(&quiz.id, student_id, &answers)
            .await?
        {
            Some(submission) => Ok(submission),
            None => match self.submissions.get(&quiz.id, student_id).await? {
                Some(_) => Err(ApiError::invalid_state(
                    "Submission is already finalized; answers can no longer change",
                )),
                None => Err(ApiError::not_found("No attempt found for this quiz")),
            },
        }
    }

    /// Finalize the attempt. Safe to invoke concurrently from the
    /// student's request and the scheduler: the store transition is
    /// guarded by `submitted_at == null`, so exactly one caller wins
    /// and the loser observes the already-final record. A manual
    /// trigger against a finalized attempt is rejected; an auto trigger
    /// is absorbed silently.
    pub async fn finalize(
        &self,
        quiz: &Quiz,
        student_id: &str,
        trigger: FinalizeTrigger,
    ) -> Result<Submission, ApiError> {
        let submission = self
            .submissions
            .get(&quiz.id, student_id)
            .await?
            .ok_or_else(|| ApiError::not_found("No attempt found for this quiz"))?;

        if submission.is_finalized() {
            return self.absorb_already_finalized(submission, trigger);
        }

        let outcome = grading::grade_submission(quiz, &submission.answers);
        let now = Utc::now();
        // An auto trigger that fires late (scheduler granularity or a
        // restart sweep) is stamped with the logical deadline, keeping
        // submitted_at within the time-limit invariant.
        let submitted_at = match trigger {
            FinalizeTrigger::Auto => submission.deadline().map(|d| d.min(now)).unwrap_or(now),
            FinalizeTrigger::Manual => now,
        };

        let update = FinalizeUpdate {
            answers: outcome.answers,
            score: outcome.score,
            status: outcome.status,
            submitted_at,
            auto_submitted: trigger == FinalizeTrigger::Auto,
        };

        match self
            .submissions
            .finalize(&quiz.id, student_id, update)
            .await?
        {
            Some(finalized) => {
                record_finalize(trigger.as_str(), "won");
                tracing::info!(
                    quiz_id = %quiz.id,
                    student_id = %student_id,
                    trigger = trigger.as_str(),
                    score = finalized.score,
                    status = ?finalized.status,
                    "Attempt finalized"
                );
                if finalized.status == SubmissionStatus::Graded {
                    self.events.publish(DomainEvent::QuizGraded {
                        quiz_id: quiz.id.clone(),
                        student_id: student_id.to_string(),
                        score: finalized.score,
                        auto_submitted: finalized.auto_submitted,
                    });
                }
                self.ranking.invalidate(&quiz.id).await;
                Ok(finalized)
            }
            None => {
                // Lost the race; the other entry point won. No second
                // grading pass is persisted.
                let current = self
                    .submissions
                    .get(&quiz.id, student_id)
                    .await?
                    .ok_or_else(|| ApiError::not_found("No attempt found for this quiz"))?;
                self.absorb_already_finalized(current, trigger)
            }
        }
    }

    fn absorb_already_finalized(
        &self,
        submission: Submission,
        trigger: FinalizeTrigger,
    ) -> Result<Submission, ApiError> {
        record_finalize(trigger.as_str(), "already_finalized");
        match trigger {
            FinalizeTrigger::Manual => Err(ApiError::invalid_state(
                "Submission was already finalized",
            )),
            FinalizeTrigger::Auto => {
                tracing::debug!(
                    quiz_id = %submission.quiz_id,
                    student_id = %submission.student_id,
                    "Auto submit fired after finalization; no-op"
                );
                Ok(submission)
            }
        }
    }

    /// Convenience for the scheduler path, which only carries ids.
    pub async fn finalize_by_id(
        &self,
        quiz_id: &str,
        student_id: &str,
        trigger: FinalizeTrigger,
    ) -> Result<Submission, ApiError> {
        let quiz = self
            .quizzes
            .get(quiz_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Quiz not found"))?;
        self.finalize(&quiz, student_id, trigger).await
    }

    /// Owner's manual-grading flow. Recomputes the score and flips the
    /// submission to Graded once every answer has a non-pending grade.
    pub async fn apply_manual_grades(
        &self,
        quiz: &Quiz,
        student_id: &str,
        grades: &[ManualGrade],
    ) -> Result<Submission, ApiError> {
        let submission = self
            .submissions
            .get(&quiz.id, student_id)
            .await?
            .ok_or_else(|| ApiError::not_found("No submission found for this student"))?;

        if submission.status == SubmissionStatus::InProgress {
            return Err(ApiError::invalid_state(
                "Submission has not been finalized yet",
            ));
        }

        let mut answers = submission.answers.clone();
        let mut status = submission.status;
        for grade in grades {
            let question = quiz
                .question(&grade.question_id)
                .ok_or_else(|| ApiError::not_found("Question not found on this quiz"))?;
            if grade.points_awarded < 0 || grade.points_awarded > question.points {
                return Err(ApiError::validation(format!(
                    "Grade for question {} must be within 0..={}",
                    question.id, question.points
                )));
            }
            if !answers.iter().any(|a| a.question_id == question.id) {
                return Err(ApiError::not_found(
                    "Student did not answer this question",
                ));
            }
            status = grading::apply_manual_grade(&mut answers, question, grade.points_awarded);
        }

        let update = GradeUpdate {
            score: grading::score(&answers),
            answers,
            status,
        };

        let updated = self
            .submissions
            .apply_grades(&quiz.id, student_id, update)
            .await?
            .ok_or_else(|| {
                ApiError::invalid_state("Submission is no longer gradable")
            })?;

        if submission.status != SubmissionStatus::Graded
            && updated.status == SubmissionStatus::Graded
        {
            self.events.publish(DomainEvent::QuizGraded {
                quiz_id: quiz.id.clone(),
                student_id: student_id.to_string(),
                score: updated.score,
                auto_submitted: updated.auto_submitted,
            });
        }
        self.ranking.invalidate(&quiz.id).await;

        Ok(updated)
    }

    /// Restart catch-up: finalize every in-progress timed attempt whose
    /// deadline already elapsed. Complements the event-driven task
    /// queue after a process restart.
    pub async fn catch_up_overdue(&self) -> Result<usize, ApiError> {
        let overdue = self.submissions.list_overdue(Utc::now()).await?;
        let mut finalized = 0usize;
        for submission in overdue {
            match self
                .finalize_by_id(
                    &submission.quiz_id,
                    &submission.student_id,
                    FinalizeTrigger::Auto,
                )
                .await
            {
                Ok(_) => finalized += 1,
                Err(ApiError::NotFound(_)) => {
                    tracing::warn!(
                        quiz_id = %submission.quiz_id,
                        student_id = %submission.student_id,
                        "Overdue attempt references a missing quiz; skipping"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        if finalized > 0 {
            tracing::info!(count = finalized, "Catch-up sweep finalized overdue attempts");
        }
        Ok(finalized)
    }
}

/// Validate the autosave payload against the quiz definition and build
/// the working answer set, ungraded. Answers keep the quiz's authored
/// question order so reads are deterministic.
fn build_answer_details(
    quiz: &Quiz,
    answer_map: &HashMap<String, AnswerValue>,
) -> Result<Vec<AnswerDetail>, ApiError> {
    for question_id in answer_map.keys() {
        if quiz.question(question_id).is_none() {
            return Err(ApiError::validation(format!(
                "Answer references unknown question {}",
                question_id
            )));
        }
    }

    let mut details = Vec::with_capacity(answer_map.len());
    for question in &quiz.questions {
        let Some(answer) = answer_map.get(&question.id) else {
            continue;
        };
        validate_answer_shape(question, answer)?;
        details.push(AnswerDetail {
            question_id: question.id.clone(),
            answer: answer.clone(),
            correctness: Correctness::Pending,
            points_awarded: 0,
        });
    }
    Ok(details)
}

fn validate_answer_shape(question: &Question, answer: &AnswerValue) -> Result<(), ApiError> {
    match (question.kind, answer) {
        (QuestionKind::Checkboxes, AnswerValue::Selection(_)) => Ok(()),
        (QuestionKind::Checkboxes, AnswerValue::Text(_)) => Err(ApiError::validation(format!(
            "Question {} expects an array of selections",
            question.id
        ))),
        (_, AnswerValue::Selection(_)) => Err(ApiError::validation(format!(
            "Question {} expects a single answer string",
            question.id
        ))),
        (_, AnswerValue::Text(_)) => Ok(()),
    }
}
