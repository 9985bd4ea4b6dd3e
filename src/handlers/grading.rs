//! Owner-only grading surface: list a quiz's submissions and apply
//! manual grades to short-answer questions.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;

use crate::{
    error::ApiError,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{Quiz, SubmissionView},
    services::{attempts::ManualGrade, AppState},
};

#[derive(Debug, Deserialize)]
pub struct GradeSubmissionRequest {
    pub grades: Vec<ManualGrade>,
}

async fn load_owned_quiz(
    state: &AppState,
    claims: &JwtClaims,
    quiz_id: &str,
) -> Result<Quiz, ApiError> {
    let quiz = state
        .quizzes
        .get(quiz_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Quiz not found"))?;
    if quiz.owner_id != claims.sub && claims.role != "admin" {
        return Err(ApiError::forbidden("Only the quiz owner can grade it"));
    }
    Ok(quiz)
}

pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(quiz_id): Path<String>,
) -> Result<Json<Vec<SubmissionView>>, ApiError> {
    load_owned_quiz(&state, &claims, &quiz_id).await?;

    let mut submissions = state.submissions.list_for_quiz(&quiz_id).await?;
    submissions.sort_by(|a, b| a.student_id.cmp(&b.student_id));
    Ok(Json(submissions.iter().map(SubmissionView::from).collect()))
}

pub async fn grade_submission(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((quiz_id, student_id)): Path<(String, String)>,
    AppJson(payload): AppJson<GradeSubmissionRequest>,
) -> Result<Json<SubmissionView>, ApiError> {
    let quiz = load_owned_quiz(&state, &claims, &quiz_id).await?;

    if payload.grades.is_empty() {
        return Err(ApiError::validation("No grades provided"));
    }

    let submission = state
        .attempts
        .apply_manual_grades(&quiz, &student_id, &payload.grades)
        .await?;
    Ok(Json(SubmissionView::from(&submission)))
}
