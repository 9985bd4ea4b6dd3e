use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::ApiError,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{Question, QuestionKind, Quiz, QuizOwnerView, QuizView, Targeting},
    services::{
        eligibility::EligibilityResolver,
        events::DomainEvent,
        ranking::LeaderboardEntry,
        AppState,
    },
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub due_date: DateTime<Utc>,
    #[validate(range(min = 1, max = 1440))]
    pub time_limit_minutes: Option<i64>,
    pub questions: Vec<CreateQuestion>,
    #[serde(default)]
    pub targeting: Targeting,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestion {
    #[validate(length(min = 1))]
    pub prompt: String,
    pub kind: QuestionKind,
    #[validate(range(min = 1))]
    pub points: i32,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_answer: Option<String>,
    pub correct_answers: Option<Vec<String>>,
}

pub async fn create_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(payload): AppJson<CreateQuizRequest>,
) -> Result<(StatusCode, Json<QuizOwnerView>), ApiError> {
    if !claims.is_staff() {
        return Err(ApiError::forbidden("Only teachers can create quizzes"));
    }
    payload.validate()?;
    if payload.questions.is_empty() {
        return Err(ApiError::validation("Quiz needs at least one question"));
    }
    if payload.targeting.is_empty() {
        return Err(ApiError::validation(
            "At least one targeting dimension must be set; an untargeted quiz is visible to no one",
        ));
    }

    let questions = payload
        .questions
        .into_iter()
        .map(build_question)
        .collect::<Result<Vec<_>, _>>()?;

    let quiz = Quiz {
        id: Uuid::new_v4().to_string(),
        owner_id: claims.sub.clone(),
        title: payload.title,
        due_date: payload.due_date,
        time_limit_minutes: payload.time_limit_minutes,
        questions,
        targeting: payload.targeting,
        created_at: Utc::now(),
    };

    state.quizzes.insert(&quiz).await?;
    tracing::info!(quiz_id = %quiz.id, owner_id = %quiz.owner_id, "Quiz created");
    state.events.publish(DomainEvent::QuizCreated {
        quiz_id: quiz.id.clone(),
        owner_id: quiz.owner_id.clone(),
        title: quiz.title.clone(),
        due_date: quiz.due_date,
    });

    // The owner gets the full definition back, canonical answers included.
    Ok((StatusCode::CREATED, Json(QuizOwnerView::from(&quiz))))
}

fn build_question(payload: CreateQuestion) -> Result<Question, ApiError> {
    payload.validate()?;
    match payload.kind {
        QuestionKind::MultipleChoice => {
            let correct = payload
                .correct_answer
                .as_deref()
                .ok_or_else(|| ApiError::validation("Multiple-choice question needs a correct answer"))?;
            if !payload.options.iter().any(|o| o == correct) {
                return Err(ApiError::validation(
                    "Correct answer must be one of the question options",
                ));
            }
        }
        QuestionKind::Checkboxes => {
            let correct = payload
                .correct_answers
                .as_deref()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| ApiError::validation("Checkbox question needs a correct answer set"))?;
            if correct.iter().any(|c| !payload.options.contains(c)) {
                return Err(ApiError::validation(
                    "Correct answers must be a subset of the question options",
                ));
            }
        }
        QuestionKind::ShortAnswer => {
            if payload.correct_answer.is_some() || payload.correct_answers.is_some() {
                return Err(ApiError::validation(
                    "Short-answer questions are graded manually and carry no canonical answer",
                ));
            }
        }
    }

    Ok(Question {
        id: Uuid::new_v4().to_string(),
        prompt: payload.prompt,
        kind: payload.kind,
        points: payload.points,
        options: payload.options,
        correct_answer: payload.correct_answer,
        correct_answers: payload.correct_answers,
    })
}

/// Quizzes visible to the caller, sanitized. Read-only: listing never
/// starts an attempt clock.
pub async fn list_quizzes(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<Vec<QuizView>>, ApiError> {
    let quizzes = state.quizzes.list().await?;
    let views: Vec<QuizView> = EligibilityResolver::eligible_quizzes(&claims, &quizzes).collect();
    Ok(Json(views))
}

pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(quiz_id): Path<String>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let quiz = state
        .quizzes
        .get(&quiz_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Quiz not found"))?;

    let is_owner = quiz.owner_id == claims.sub || claims.role == "admin";
    if !is_owner && !EligibilityResolver::is_eligible(&claims, &quiz) {
        return Err(ApiError::forbidden("You are not eligible for this quiz"));
    }

    let entries = state.ranking.rank(&quiz_id).await?;
    Ok(Json(entries))
}
