use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// JSON extractor whose rejection matches the error body shape the rest
/// of the API uses.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                let message = format!("Invalid JSON request body: {}", rejection);
                tracing::warn!("{}", message);
                Err((
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "message": message, "status": 400 })),
                )
                    .into_response())
            }
        }
    }
}
