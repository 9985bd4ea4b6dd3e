use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A student's answer: free text for multiple-choice and short-answer
/// questions, a selection set for checkboxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    Selection(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correctness {
    Correct,
    Incorrect,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerDetail {
    pub question_id: String,
    pub answer: AnswerValue,
    pub correctness: Correctness,
    pub points_awarded: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    InProgress,
    Submitted,
    Graded,
}

/// Who triggered finalization of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeTrigger {
    Manual,
    Auto,
}

impl FinalizeTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeTrigger::Manual => "manual",
            FinalizeTrigger::Auto => "auto",
        }
    }
}

/// A student's unique attempt at a quiz, keyed by (quiz_id, student_id)
/// in the `submissions` collection. `started_at` is write-once;
/// `submitted_at` transitions null -> timestamp exactly once; status
/// never regresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "_id")]
    pub id: String,
    pub quiz_id: String,
    pub student_id: String,
    pub answers: Vec<AnswerDetail>,
    pub score: i32,
    pub status: SubmissionStatus,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub auto_submitted: bool,
    /// Question order fixed at attempt creation, persisted so later
    /// review matches what the student saw.
    pub question_order: Vec<String>,
    /// Epoch millis of `started_at + time_limit`, set for timed quizzes.
    /// Kept as an integer so the catch-up sweep can range-query it.
    pub deadline_ms: Option<i64>,
}

impl Submission {
    pub fn is_finalized(&self) -> bool {
        self.submitted_at.is_some()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline_ms.and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

/// The atomic update applied when an attempt is finalized. Written as a
/// single conditional store operation guarded by `submitted_at == null`.
#[derive(Debug, Clone)]
pub struct FinalizeUpdate {
    pub answers: Vec<AnswerDetail>,
    pub score: i32,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    pub auto_submitted: bool,
}

/// Update applied by the owner's manual-grading flow.
#[derive(Debug, Clone)]
pub struct GradeUpdate {
    pub answers: Vec<AnswerDetail>,
    pub score: i32,
    pub status: SubmissionStatus,
}

/// Submission projection returned to API callers. Carries no canonical
/// answers; those only ever live on the quiz definition.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionView {
    pub quiz_id: String,
    pub student_id: String,
    pub answers: Vec<AnswerDetail>,
    pub score: i32,
    pub status: SubmissionStatus,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub auto_submitted: bool,
}

impl From<&Submission> for SubmissionView {
    fn from(submission: &Submission) -> Self {
        Self {
            quiz_id: submission.quiz_id.clone(),
            student_id: submission.student_id.clone(),
            answers: submission.answers.clone(),
            score: submission.score,
            status: submission.status,
            started_at: submission.started_at,
            submitted_at: submission.submitted_at,
            auto_submitted: submission.auto_submitted,
        }
    }
}
