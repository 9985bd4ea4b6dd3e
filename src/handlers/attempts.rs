use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{AnswerValue, FinalizeTrigger, Quiz, QuizView, SubmissionView},
    services::{eligibility::EligibilityResolver, AppState},
};

#[derive(Debug, Serialize)]
pub struct AttemptResponse {
    pub quiz: QuizView,
    pub submission: SubmissionView,
}

#[derive(Debug, Deserialize)]
pub struct SaveAnswersRequest {
    pub answers: HashMap<String, AnswerValue>,
}

async fn load_eligible_quiz(
    state: &AppState,
    claims: &JwtClaims,
    quiz_id: &str,
) -> Result<Quiz, ApiError> {
    let quiz = state
        .quizzes
        .get(quiz_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Quiz not found"))?;
    if !EligibilityResolver::is_eligible(claims, &quiz) {
        return Err(ApiError::forbidden("You are not eligible for this quiz"));
    }
    Ok(quiz)
}

/// Explicit start-attempt action: this is the call that starts the
/// clock and arms the deadline timer, not the quiz listing.
pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(quiz_id): Path<String>,
) -> Result<(StatusCode, Json<AttemptResponse>), ApiError> {
    let quiz = load_eligible_quiz(&state, &claims, &quiz_id).await?;

    let (submission, created) = state
        .attempts
        .get_or_create_attempt(&quiz, &claims.sub)
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let response = AttemptResponse {
        quiz: QuizView::sanitized_in_order(&quiz, &submission.question_order),
        submission: SubmissionView::from(&submission),
    };
    Ok((status, Json(response)))
}

pub async fn save_answers(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(quiz_id): Path<String>,
    AppJson(payload): AppJson<SaveAnswersRequest>,
) -> Result<Json<SubmissionView>, ApiError> {
    let quiz = load_eligible_quiz(&state, &claims, &quiz_id).await?;

    let submission = state
        .attempts
        .save_answers(&quiz, &claims.sub, &payload.answers)
        .await?;
    Ok(Json(SubmissionView::from(&submission)))
}

pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(quiz_id): Path<String>,
) -> Result<Json<SubmissionView>, ApiError> {
    let quiz = load_eligible_quiz(&state, &claims, &quiz_id).await?;

    let submission = state
        .attempts
        .finalize(&quiz, &claims.sub, FinalizeTrigger::Manual)
        .await?;
    Ok(Json(SubmissionView::from(&submission)))
}
