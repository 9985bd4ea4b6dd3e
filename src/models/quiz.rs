use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quiz definition as stored in the `quizzes` collection. Treated as
/// read-only once attempts are active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub due_date: DateTime<Utc>,
    pub time_limit_minutes: Option<i64>,
    pub questions: Vec<Question>,
    pub targeting: Targeting,
    pub created_at: DateTime<Utc>,
}

impl Quiz {
    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    Checkboxes,
    ShortAnswer,
}

/// A single question. `correct_answer` / `correct_answers` are instructor
/// ground truth and must never reach a student-facing projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    pub points: i32,
    #[serde(default)]
    pub options: Vec<String>,
    /// Canonical answer for multiple-choice questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    /// Canonical answer set for checkbox questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<Vec<String>>,
}

/// The five targeting dimensions. A student is eligible when they match
/// any one of them (OR semantics).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Targeting {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub grades: Vec<i32>,
    #[serde(default)]
    pub other_grades: Vec<i32>,
    #[serde(default)]
    pub programs: Vec<String>,
    #[serde(default)]
    pub school_ids: Vec<String>,
}

impl Targeting {
    /// A quiz with all five sets empty is eligible to no one and is
    /// rejected at creation time.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
            && self.grades.is_empty()
            && self.other_grades.is_empty()
            && self.programs.is_empty()
            && self.school_ids.is_empty()
    }
}

/// Student-facing projection of a question: prompt and options only.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    pub points: i32,
    pub options: Vec<String>,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            prompt: question.prompt.clone(),
            kind: question.kind,
            points: question.points,
            options: question.options.clone(),
        }
    }
}

/// Owner-facing projection: the full definition, canonical answers
/// included, with the id under its API name rather than the Mongo
/// document key.
#[derive(Debug, Clone, Serialize)]
pub struct QuizOwnerView {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub due_date: DateTime<Utc>,
    pub time_limit_minutes: Option<i64>,
    pub questions: Vec<Question>,
    pub targeting: Targeting,
    pub created_at: DateTime<Utc>,
}

impl From<&Quiz> for QuizOwnerView {
    fn from(quiz: &Quiz) -> Self {
        Self {
            id: quiz.id.clone(),
            owner_id: quiz.owner_id.clone(),
            title: quiz.title.clone(),
            due_date: quiz.due_date,
            time_limit_minutes: quiz.time_limit_minutes,
            questions: quiz.questions.clone(),
            targeting: quiz.targeting.clone(),
            created_at: quiz.created_at,
        }
    }
}

/// Sanitized quiz view returned to students. Canonical answers are
/// stripped unconditionally.
#[derive(Debug, Clone, Serialize)]
pub struct QuizView {
    pub id: String,
    pub title: String,
    pub due_date: DateTime<Utc>,
    pub time_limit_minutes: Option<i64>,
    pub questions: Vec<QuestionView>,
}

impl QuizView {
    /// Project the quiz with its authored question order.
    pub fn sanitized(quiz: &Quiz) -> Self {
        Self {
            id: quiz.id.clone(),
            title: quiz.title.clone(),
            due_date: quiz.due_date,
            time_limit_minutes: quiz.time_limit_minutes,
            questions: quiz.questions.iter().map(QuestionView::from).collect(),
        }
    }

    /// Project the quiz with the question order persisted on a student's
    /// attempt, so result review matches what the student actually saw.
    pub fn sanitized_in_order(quiz: &Quiz, order: &[String]) -> Self {
        let mut view = Self::sanitized(quiz);
        view.questions = order
            .iter()
            .filter_map(|id| quiz.question(id).map(QuestionView::from))
            .collect();
        view
    }
}
