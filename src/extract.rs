use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection},
        FromRequest, FromRequestParts, Path, Request,
    },
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::AppError;

/// `Json` whose rejection is a 400 `VALIDATION_ERROR` body.
pub struct ApiJson<T>(pub T);

/// `Path` whose rejection is a 400 `VALIDATION_ERROR` body.
pub struct ApiPath<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection.body_text(), "malformed request body");
        AppError::validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        warn!(error = %rejection.body_text(), "malformed path parameter");
        AppError::validation(rejection.body_text())
    }
}

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, response::IntoResponse};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TitleBody {
        title: String,
    }

    async fn extract(body: &str) -> Result<ApiJson<TitleBody>, AppError> {
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        ApiJson::<TitleBody>::from_request(req, &()).await
    }

    #[tokio::test]
    async fn well_formed_body_is_extracted() {
        let ApiJson(body) = extract(r#"{"title":"Run"}"#).await.unwrap();
        assert_eq!(body.title, "Run");
    }

    #[tokio::test]
    async fn malformed_body_is_a_validation_error() {
        for raw in [r#"{"title":5}"#, "{}", "not json"] {
            let err = extract(raw).await.err().unwrap();
            assert!(matches!(err, AppError::Validation(_)), "{raw}");
            assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        }
    }
}
